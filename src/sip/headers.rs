//! Concrete header types the registry knows about out of the box.
//! Grounded in `register_known_types()` in `message.cpp`: `CSeq`, `From`,
//! `To`, `Call-ID`, `Content-Length`, `Content-Type`, `Max-Forwards`,
//! `Expires`. Fine-grained textual formatting (URI parameter escaping,
//! display-name quoting) is out of scope -- these store and round-trip
//! the header's raw value rather than modeling SIP-URI grammar.

use std::any::Any;

use crate::error::{Error, Result};
use crate::sip::method::Method;

pub trait Header: Any + Send + Sync {
    fn name(&self) -> &'static str;
    fn write_value(&self, out: &mut String);
    fn as_any(&self) -> &dyn Any;
}

pub struct GenericHeader {
    pub name: String,
    pub value: String,
}

impl Header for GenericHeader {
    fn name(&self) -> &'static str {
        "generic"
    }
    fn write_value(&self, out: &mut String) {
        out.push_str(&self.value);
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct CSeq {
    pub sequence: u32,
    pub method: Method,
}

impl Header for CSeq {
    fn name(&self) -> &'static str {
        "cseq"
    }
    fn write_value(&self, out: &mut String) {
        out.push_str(&format!("{} {}", self.sequence, self.method));
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn parse_cseq(value: &str) -> Result<CSeq> {
    let mut parts = value.trim().splitn(2, char::is_whitespace);
    let sequence: u32 = parts.next().ok_or(Error::MalformedMessage)?.parse().map_err(|_| Error::MalformedMessage)?;
    let method: Method = parts.next().ok_or(Error::MalformedMessage)?.trim().parse()?;
    Ok(CSeq { sequence, method })
}

pub struct From {
    pub raw: String,
}

impl Header for From {
    fn name(&self) -> &'static str {
        "from"
    }
    fn write_value(&self, out: &mut String) {
        out.push_str(&self.raw);
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct To {
    pub raw: String,
}

impl Header for To {
    fn name(&self) -> &'static str {
        "to"
    }
    fn write_value(&self, out: &mut String) {
        out.push_str(&self.raw);
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct CallId {
    pub id: String,
}

impl Header for CallId {
    fn name(&self) -> &'static str {
        "call-id"
    }
    fn write_value(&self, out: &mut String) {
        out.push_str(&self.id);
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct ContentLength {
    pub length: usize,
}

impl Header for ContentLength {
    fn name(&self) -> &'static str {
        "content-length"
    }
    fn write_value(&self, out: &mut String) {
        out.push_str(&self.length.to_string());
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn parse_content_length(value: &str) -> Result<ContentLength> {
    let length = value.trim().parse().map_err(|_| Error::MalformedMessage)?;
    Ok(ContentLength { length })
}

pub struct ContentType {
    pub media_type: String,
}

impl Header for ContentType {
    fn name(&self) -> &'static str {
        "content-type"
    }
    fn write_value(&self, out: &mut String) {
        out.push_str(&self.media_type);
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MaxForwards {
    pub value: u32,
}

impl Header for MaxForwards {
    fn name(&self) -> &'static str {
        "max-forwards"
    }
    fn write_value(&self, out: &mut String) {
        out.push_str(&self.value.to_string());
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn parse_max_forwards(value: &str) -> Result<MaxForwards> {
    let value = value.trim().parse().map_err(|_| Error::MalformedMessage)?;
    Ok(MaxForwards { value })
}

pub struct Expires {
    pub seconds: u32,
}

impl Header for Expires {
    fn name(&self) -> &'static str {
        "expires"
    }
    fn write_value(&self, out: &mut String) {
        out.push_str(&self.seconds.to_string());
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn parse_expires(value: &str) -> Result<Expires> {
    let seconds = value.trim().parse().map_err(|_| Error::MalformedMessage)?;
    Ok(Expires { seconds })
}
