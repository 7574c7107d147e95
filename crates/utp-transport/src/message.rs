//! The message exchanged over a transport socket.

use std::collections::HashMap;

use bincode::{Decode, Encode};

/// A single transport message: string headers plus an opaque body.
///
/// The RPC layer above decides what goes into the body; the transport only
/// frames and moves it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct Message {
    pub header: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Message {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            header: HashMap::new(),
            body: body.into(),
        }
    }

    /// Builder-style header insertion.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.header.insert(key.into(), value.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.header.get(key).map(String::as_str)
    }
}
