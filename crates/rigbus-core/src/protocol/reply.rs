//! Reply framing helpers.
//!
//! A reply is kept exactly as the channel returned it (stop byte included).
//! The helpers here give views without the trailing delimiter and check for
//! the leading negative-acknowledge marker.

use std::fmt;

/// Raw reply read from a channel.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Reply {
    bytes: Vec<u8>,
}

impl Reply {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Raw bytes, delimiter included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Reply with every trailing byte found in `delimiter` removed.
    pub fn payload(&self, delimiter: &[u8]) -> &[u8] {
        let end = self
            .bytes
            .iter()
            .rposition(|b| !delimiter.contains(b))
            .map_or(0, |pos| pos + 1);
        &self.bytes[..end]
    }

    /// Payload as lossy UTF-8 text.
    pub fn text(&self, delimiter: &[u8]) -> String {
        String::from_utf8_lossy(self.payload(delimiter)).into_owned()
    }

    /// Check whether the reply starts with the negative-acknowledge marker.
    pub fn is_rejection(&self, marker: u8) -> bool {
        self.bytes.first() == Some(&marker)
    }

    /// Printable rendering, non-graphic bytes shown as `.`.
    pub fn as_ascii(&self) -> String {
        self.bytes
            .iter()
            .map(|&b| {
                if b.is_ascii_graphic() || b == b' ' {
                    b as char
                } else {
                    '.'
                }
            })
            .collect()
    }
}

impl From<Vec<u8>> for Reply {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for Reply {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reply({} bytes '{}')", self.bytes.len(), self.as_ascii())
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ascii())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_strips_trailing_delimiters() {
        let reply = Reply::from(&b"AZ=120 EL=045\r\n"[..]);
        assert_eq!(reply.payload(b"\r\n"), b"AZ=120 EL=045");
        assert_eq!(reply.text(b"\r\n"), "AZ=120 EL=045");
        assert_eq!(reply.len(), 15);
    }

    #[test]
    fn test_payload_of_bare_delimiter_is_empty() {
        let reply = Reply::from(&b"\r\n"[..]);
        assert!(reply.payload(b"\r\n").is_empty());
        assert!(!reply.is_empty());
    }

    #[test]
    fn test_rejection_marker() {
        assert!(Reply::from(&b"?>\r\n"[..]).is_rejection(b'?'));
        assert!(!Reply::from(&b"AZ=000\r\n"[..]).is_rejection(b'?'));
        assert!(!Reply::default().is_rejection(b'?'));
    }

    #[test]
    fn test_ascii_rendering() {
        let reply = Reply::from(&b"OK\r\n"[..]);
        assert_eq!(reply.as_ascii(), "OK..");
        assert_eq!(format!("{:?}", reply), "Reply(4 bytes 'OK..')");
    }
}
