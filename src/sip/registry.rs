//! Process-wide header/body type registry: a name (or content-type) maps
//! to a factory closure that parses a raw value into a typed holder.
//!
//! The original builds this table via constructor-attribute side effects
//! running before `main`. Rust has no equivalent linker trick to reach for
//! here (nor would we want one) -- `OnceLock` gives the same "populated
//! once, read many times, process-wide" shape through an explicit
//! initializer instead of hidden global construction order.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use crate::error::Result;
use crate::sip::bodies::{Body, GenericBody};
use crate::sip::headers::{self, CSeq, CallId, ContentType, GenericHeader, Header, To};

pub type HeaderFactory = Box<dyn Fn(&str) -> Result<Box<dyn Header>> + Send + Sync>;
pub type BodyFactory = Box<dyn Fn(&str, &[u8]) -> Result<Box<dyn Body>> + Send + Sync>;

static HEADERS: OnceLock<Mutex<HashMap<String, HeaderFactory>>> = OnceLock::new();
static BODIES: OnceLock<Mutex<HashMap<String, BodyFactory>>> = OnceLock::new();

fn header_registry() -> &'static Mutex<HashMap<String, HeaderFactory>> {
    HEADERS.get_or_init(|| Mutex::new(default_headers()))
}

fn body_registry() -> &'static Mutex<HashMap<String, BodyFactory>> {
    BODIES.get_or_init(|| Mutex::new(default_bodies()))
}

pub fn register_header(name: &str, factory: HeaderFactory) {
    header_registry().lock().unwrap().insert(name.to_ascii_lowercase(), factory);
}

pub fn register_body(content_type: &str, factory: BodyFactory) {
    body_registry().lock().unwrap().insert(content_type.to_ascii_lowercase(), factory);
}

/// Falls back to [`GenericHeader`] for any name with no registered factory,
/// or whose factory rejects the raw value (malformed but not absent).
pub fn create_header(name: &str, value: &str) -> Box<dyn Header> {
    let registry = header_registry().lock().unwrap();
    if let Some(factory) = registry.get(&name.to_ascii_lowercase()) {
        if let Ok(header) = factory(value) {
            return header;
        }
    }
    Box::new(GenericHeader {
        name: name.to_string(),
        value: value.to_string(),
    })
}

pub fn create_body(content_type: &str, bytes: &[u8]) -> Box<dyn Body> {
    let registry = body_registry().lock().unwrap();
    if let Some(factory) = registry.get(&content_type.to_ascii_lowercase()) {
        if let Ok(body) = factory(content_type, bytes) {
            return body;
        }
    }
    Box::new(GenericBody {
        content_type: content_type.to_string(),
        raw: bytes.to_vec(),
    })
}

fn default_headers() -> HashMap<String, HeaderFactory> {
    let mut map: HashMap<String, HeaderFactory> = HashMap::new();
    map.insert(
        "cseq".to_string(),
        Box::new(|v: &str| headers::parse_cseq(v).map(|h| Box::new(h) as Box<dyn Header>)),
    );
    map.insert(
        "from".to_string(),
        Box::new(|v: &str| Ok(Box::new(headers::From { raw: v.to_string() }) as Box<dyn Header>)),
    );
    map.insert(
        "to".to_string(),
        Box::new(|v: &str| Ok(Box::new(To { raw: v.to_string() }) as Box<dyn Header>)),
    );
    map.insert(
        "call-id".to_string(),
        Box::new(|v: &str| Ok(Box::new(CallId { id: v.trim().to_string() }) as Box<dyn Header>)),
    );
    map.insert(
        "content-length".to_string(),
        Box::new(|v: &str| headers::parse_content_length(v).map(|h| Box::new(h) as Box<dyn Header>)),
    );
    map.insert(
        "content-type".to_string(),
        Box::new(|v: &str| {
            Ok(Box::new(ContentType {
                media_type: v.trim().to_string(),
            }) as Box<dyn Header>)
        }),
    );
    map.insert(
        "max-forwards".to_string(),
        Box::new(|v: &str| headers::parse_max_forwards(v).map(|h| Box::new(h) as Box<dyn Header>)),
    );
    map.insert(
        "expires".to_string(),
        Box::new(|v: &str| headers::parse_expires(v).map(|h| Box::new(h) as Box<dyn Header>)),
    );
    map
}

fn default_bodies() -> HashMap<String, BodyFactory> {
    let mut map: HashMap<String, BodyFactory> = HashMap::new();
    map.insert(
        "application/sdp".to_string(),
        Box::new(|content_type: &str, bytes: &[u8]| {
            Ok(Box::new(GenericBody {
                content_type: content_type.to_string(),
                raw: bytes.to_vec(),
            }) as Box<dyn Body>)
        }),
    );
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cseq_parses_known_header() {
        let header = create_header("CSeq", "314159 INVITE");
        let cseq = header.as_any().downcast_ref::<CSeq>().unwrap();
        assert_eq!(cseq.sequence, 314159);
        assert_eq!(cseq.method, crate::sip::method::Method::Invite);
    }

    #[test]
    fn unknown_header_falls_back_to_generic() {
        let header = create_header("X-Custom", "anything");
        assert!(header.as_any().downcast_ref::<GenericHeader>().is_some());
    }

    #[test]
    fn malformed_known_header_falls_back_to_generic() {
        let header = create_header("CSeq", "not-a-number");
        assert!(header.as_any().downcast_ref::<GenericHeader>().is_some());
    }
}
