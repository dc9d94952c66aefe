//! # Request Header
//!
//! Correlation token binding a request to its response.
//!
//! ```text
//! Client ──send_request──→ seq = 7 ──→ Service.take_request(header)
//!                                          header = {guid(client), 7}
//! Client.take_response(header) ←── Service.send_response(header)
//!          header.sequence_number() == 7
//! ```
//!
//! A header is populated only by `take_request` / `take_response`. The
//! header returned by `take_request` is the routing address for the reply,
//! so it must be passed unchanged to `send_response`.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// 16-byte identity of the writer (client) that issued a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct WriterGuid(pub [u8; 16]);

impl WriterGuid {
    /// Fresh random identity.
    #[must_use]
    pub fn generate() -> Self {
        Self(*Uuid::new_v4().as_bytes())
    }

    /// Raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for WriterGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Uuid::from_bytes(self.0))
    }
}

/// Per-call correlation token.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestHeader {
    writer_guid: WriterGuid,
    sequence_number: i64,
    populated: bool,
}

impl RequestHeader {
    /// Fresh, empty header.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number stamped by the transport.
    ///
    /// Reading an unpopulated header is a caller error; it yields `0`.
    #[must_use]
    pub fn sequence_number(&self) -> i64 {
        self.sequence_number
    }

    /// Identity of the requesting client.
    #[must_use]
    pub fn writer_guid(&self) -> WriterGuid {
        self.writer_guid
    }

    /// Whether a take call has filled this header.
    #[must_use]
    pub fn is_populated(&self) -> bool {
        self.populated
    }

    pub(crate) fn populate(&mut self, writer_guid: WriterGuid, sequence_number: i64) {
        self.writer_guid = writer_guid;
        self.sequence_number = sequence_number;
        self.populated = true;
    }

    pub(crate) fn stamped(writer_guid: WriterGuid, sequence_number: i64) -> Self {
        let mut header = Self::new();
        header.populate(writer_guid, sequence_number);
        header
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_header_is_empty() {
        let header = RequestHeader::new();
        assert!(!header.is_populated());
        assert_eq!(header.sequence_number(), 0);
    }

    #[test]
    fn test_populate() {
        let guid = WriterGuid::generate();
        let mut header = RequestHeader::new();
        header.populate(guid, 9);
        assert!(header.is_populated());
        assert_eq!(header.sequence_number(), 9);
        assert_eq!(header.writer_guid(), guid);
    }

    #[test]
    fn test_guids_are_unique() {
        assert_ne!(WriterGuid::generate(), WriterGuid::generate());
        assert_eq!(WriterGuid::generate().to_string().len(), 36);
    }
}
