//! Body type registry entries. Only `application/sdp` is registered by
//! default, matching `register_known_types()`'s `sdp_body` -- but actually
//! modeling SDP's grammar is out of scope here (collaborator concern per
//! the message-framing boundary), so it's backed by [`GenericBody`] like
//! any other unregistered content type.

use std::any::Any;

pub trait Body: Any + Send + Sync {
    fn content_type(&self) -> &str;
    fn bytes(&self) -> &[u8];
    fn as_any(&self) -> &dyn Any;
}

pub struct GenericBody {
    pub content_type: String,
    pub raw: Vec<u8>,
}

impl Body for GenericBody {
    fn content_type(&self) -> &str {
        &self.content_type
    }
    fn bytes(&self) -> &[u8] {
        &self.raw
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}
