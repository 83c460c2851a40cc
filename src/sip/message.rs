//! A parsed SIP request or response: start line, headers, optional body.
//! Grounded in `message.cpp`/`message.h`: `read_headers`/`read_body`/
//! `read_message` and their `write_*` counterparts, plus the typed
//! `header<T>()`/`headers<T>()`/`body<T>()` accessors.
//!
//! The original reads from a `std::istream` built over a byte span and
//! signals "not enough bytes yet" by returning `-1` from `read_message`.
//! Framing here works the same way but in terms of a `&[u8]` slice
//! directly: [`read_message`] returns `Ok(None)` when the buffer doesn't
//! yet hold a complete message rather than forcing the caller to retry
//! with more data and an error path it has to tell apart from a real
//! parse failure.

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::sip::bodies::Body;
use crate::sip::headers::Header;
use crate::sip::method::Method;
use crate::sip::registry;
use crate::sip::status_code::StatusCode;

const SEPARATOR: &[u8] = b"\r\n\r\n";

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StartLine {
    Request {
        method: Method,
        uri: String,
        version: String,
    },
    Response {
        version: String,
        code: StatusCode,
        reason: String,
    },
}

pub struct Message {
    start_line: Option<StartLine>,
    headers: IndexMap<String, Vec<Box<dyn Header>>>,
    body: Option<Box<dyn Body>>,
}

impl Message {
    pub fn new() -> Message {
        Message {
            start_line: None,
            headers: IndexMap::new(),
            body: None,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self.start_line, Some(StartLine::Request { .. }))
    }

    pub fn start_line(&self) -> Option<&StartLine> {
        self.start_line.as_ref()
    }

    pub fn set_start_line(&mut self, line: StartLine) {
        self.start_line = Some(line);
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(&name.to_ascii_lowercase())
    }

    pub fn header<T: Header>(&self, name: &str) -> Result<&T> {
        let holders = self.headers.get(&name.to_ascii_lowercase()).ok_or(Error::MalformedMessage)?;
        holders
            .first()
            .and_then(|h| h.as_any().downcast_ref::<T>())
            .ok_or(Error::MalformedMessage)
    }

    pub fn headers<T: Header>(&self, name: &str) -> Result<Vec<&T>> {
        let holders = self.headers.get(&name.to_ascii_lowercase()).ok_or(Error::MalformedMessage)?;
        let result: Vec<&T> = holders.iter().filter_map(|h| h.as_any().downcast_ref::<T>()).collect();
        if result.is_empty() {
            return Err(Error::MalformedMessage);
        }
        Ok(result)
    }

    pub fn add_header(&mut self, name: &str, header: Box<dyn Header>) {
        self.headers.entry(name.to_ascii_lowercase()).or_default().push(header);
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    pub fn body<T: Body>(&self) -> Result<&T> {
        self.body
            .as_ref()
            .and_then(|b| b.as_any().downcast_ref::<T>())
            .ok_or(Error::MalformedMessage)
    }

    /// Stores `body` and adds a matching `Content-Type` header, mirroring
    /// `message::set_body`'s side effect in the original.
    pub fn set_body(&mut self, body: Box<dyn Body>) {
        let content_type = body.content_type().to_string();
        self.body = Some(body);
        self.add_header(
            "content-type",
            Box::new(crate::sip::headers::ContentType { media_type: content_type }),
        );
    }

    fn set_body_from_parse(&mut self, body: Box<dyn Body>) {
        self.body = Some(body);
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        write_headers(self, &mut out)?;
        write_body(self, &mut out);
        Ok(out)
    }
}

impl Default for Message {
    fn default() -> Message {
        Message::new()
    }
}

fn write_headers(msg: &Message, out: &mut Vec<u8>) -> Result<()> {
    match msg.start_line.as_ref().ok_or(Error::MalformedMessage)? {
        StartLine::Request { method, uri, version } => {
            out.extend_from_slice(format!("{} {} {}", method, uri, version).as_bytes());
        }
        StartLine::Response { version, code, reason } => {
            out.extend_from_slice(format!("{} {} {}", version, code, reason).as_bytes());
        }
    }
    out.extend_from_slice(b"\r\n");

    for holders in msg.headers.values() {
        for holder in holders {
            let mut value = String::new();
            holder.write_value(&mut value);
            out.extend_from_slice(format!("{}: {}\r\n", holder.name(), value).as_bytes());
        }
    }
    out.extend_from_slice(b"\r\n");
    Ok(())
}

fn write_body(msg: &Message, out: &mut Vec<u8>) {
    if let Some(body) = msg.body.as_ref() {
        out.extend_from_slice(body.bytes());
    }
}

fn parse_start_line(line: &str) -> Result<StartLine> {
    if let Some(rest) = line.strip_prefix("SIP/2.0 ") {
        let mut parts = rest.splitn(2, ' ');
        let code: u16 = parts.next().ok_or(Error::MalformedMessage)?.parse().map_err(|_| Error::MalformedMessage)?;
        let reason = parts.next().unwrap_or("").to_string();
        return Ok(StartLine::Response {
            version: "SIP/2.0".to_string(),
            code: StatusCode::new(code),
            reason,
        });
    }

    let mut parts = line.splitn(3, ' ');
    let method: Method = parts.next().ok_or(Error::MalformedMessage)?.parse()?;
    let uri = parts.next().ok_or(Error::MalformedMessage)?.to_string();
    let version = parts.next().ok_or(Error::MalformedMessage)?.to_string();
    if version != "SIP/2.0" {
        return Err(Error::MalformedMessage);
    }
    Ok(StartLine::Request { method, uri, version })
}

fn read_headers(header_region: &[u8], msg: &mut Message) -> Result<()> {
    let text = std::str::from_utf8(header_region).map_err(|_| Error::MalformedMessage)?;
    let mut lines = text.split("\r\n");

    let start_line = lines.next().ok_or(Error::MalformedMessage)?;
    msg.set_start_line(parse_start_line(start_line)?);

    for line in lines {
        if line.is_empty() {
            continue;
        }
        let mut parts = line.splitn(2, ':');
        let name = parts.next().ok_or(Error::MalformedMessage)?.trim();
        let value = parts.next().ok_or(Error::MalformedMessage)?.trim();
        let header = registry::create_header(name, value);
        msg.add_header(name, header);
    }
    Ok(())
}

fn read_body(body_bytes: &[u8], msg: &mut Message) {
    if body_bytes.is_empty() {
        return;
    }
    let content_type = msg
        .header::<crate::sip::headers::ContentType>("content-type")
        .map(|h| h.media_type.clone())
        .unwrap_or_default();
    let body = registry::create_body(&content_type, body_bytes);
    msg.set_body_from_parse(body);
}

/// Parses one message out of the front of `buffer`. Returns `Ok(None)` if
/// the buffer doesn't yet hold a full message (either the header block or
/// the declared body isn't fully buffered), rather than erroring -- the
/// caller is expected to read more bytes and retry.
pub fn read_message(buffer: &[u8]) -> Result<Option<(Message, usize)>> {
    let sep = match buffer.windows(SEPARATOR.len()).position(|w| w == SEPARATOR) {
        Some(i) => i,
        None => return Ok(None),
    };

    let mut msg = Message::new();
    read_headers(&buffer[..sep], &mut msg)?;

    let header_end = sep + SEPARATOR.len();
    let expected_body_size = msg
        .header::<crate::sip::headers::ContentLength>("content-length")
        .map(|h| h.length)
        .unwrap_or(0);

    if header_end + expected_body_size > buffer.len() {
        return Ok(None);
    }

    if expected_body_size > 0 {
        read_body(&buffer[header_end..header_end + expected_body_size], &mut msg);
    }

    Ok(Some((msg, header_end + expected_body_size)))
}

pub fn write_message(msg: &Message) -> Result<Vec<u8>> {
    msg.to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sip::headers::CSeq;

    #[test]
    fn parses_a_complete_request_with_no_body() {
        let raw = b"INVITE sip:bob@example.com SIP/2.0\r\nCSeq: 1 INVITE\r\nCall-ID: abc123\r\n\r\n";
        let (msg, consumed) = read_message(raw).unwrap().unwrap();
        assert_eq!(consumed, raw.len());
        assert!(msg.is_request());
        let cseq = msg.header::<CSeq>("cseq").unwrap();
        assert_eq!(cseq.sequence, 1);
        assert_eq!(cseq.method, crate::sip::method::Method::Invite);
    }

    #[test]
    fn incomplete_header_block_reads_as_none() {
        let raw = b"INVITE sip:bob@example.com SIP/2.0\r\nCSeq: 1 INVITE\r\n";
        assert!(read_message(raw).unwrap().is_none());
    }

    #[test]
    fn waits_for_full_body_declared_by_content_length() {
        let raw = b"INVITE sip:bob@example.com SIP/2.0\r\nContent-Length: 10\r\n\r\nhello";
        assert!(read_message(raw).unwrap().is_none());

        let mut full = raw.to_vec();
        full.extend_from_slice(b"world");
        let (msg, consumed) = read_message(&full).unwrap().unwrap();
        assert_eq!(consumed, full.len());
        assert!(msg.has_body());
    }

    #[test]
    fn parses_a_response_start_line() {
        let raw = b"SIP/2.0 200 OK\r\nCSeq: 2 INVITE\r\n\r\n";
        let (msg, _) = read_message(raw).unwrap().unwrap();
        assert!(!msg.is_request());
        match msg.start_line().unwrap() {
            StartLine::Response { code, reason, .. } => {
                assert_eq!(*code, StatusCode::OK);
                assert_eq!(reason, "OK");
            }
            _ => panic!("expected a response start line"),
        }
    }

    #[test]
    fn round_trips_through_write_message() {
        let mut msg = Message::new();
        msg.set_start_line(StartLine::Request {
            method: Method::Invite,
            uri: "sip:bob@example.com".to_string(),
            version: "SIP/2.0".to_string(),
        });
        msg.add_header("cseq", Box::new(CSeq { sequence: 1, method: Method::Invite }));

        let bytes = write_message(&msg).unwrap();
        let (parsed, consumed) = read_message(&bytes).unwrap().unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(parsed.header::<CSeq>("cseq").unwrap().sequence, 1);
    }
}
