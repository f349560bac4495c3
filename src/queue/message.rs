//! Payload wrapper handed from the socket layer to the broker client.

use std::io::{self, Read, Seek, SeekFrom};

use bytes::Bytes;

/// One payload read from exactly one local connection.
///
/// Immutable once constructed; ownership moves into the publish call. Also
/// usable as a seekable reader for broker clients that consume streams.
#[derive(Debug, Clone)]
pub struct Message {
    body: Bytes,
    pos: u64,
}

impl Message {
    /// Wrap a raw byte buffer.
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            pos: 0,
        }
    }

    /// The raw payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.body
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

impl From<Vec<u8>> for Message {
    fn from(body: Vec<u8>) -> Self {
        Self::new(body)
    }
}

impl Read for Message {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.body.len() as u64;
        if self.pos >= len {
            return Ok(0);
        }
        let remaining = &self.body[self.pos as usize..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for Message {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(offset) => self.pos.checked_add_signed(offset),
            SeekFrom::End(offset) => (self.body.len() as u64).checked_add_signed(offset),
        };

        match new_pos {
            Some(p) => {
                self.pos = p;
                Ok(p)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of message",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_full_payload() {
        let mut msg = Message::new(b"DSN-BODY-1".to_vec());
        let mut out = Vec::new();
        msg.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"DSN-BODY-1");
    }

    #[test]
    fn test_read_after_end_returns_zero() {
        let mut msg = Message::new(b"abc".to_vec());
        let mut out = Vec::new();
        msg.read_to_end(&mut out).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(msg.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_read_in_chunks() {
        let mut msg = Message::new(b"abcdef".to_vec());
        let mut buf = [0u8; 4];
        assert_eq!(msg.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(msg.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
    }

    #[test]
    fn test_seek_start_and_rewind() {
        let mut msg = Message::new(b"abcdef".to_vec());
        msg.seek(SeekFrom::Start(3)).unwrap();
        let mut out = Vec::new();
        msg.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"def");

        msg.seek(SeekFrom::Start(0)).unwrap();
        let mut out = Vec::new();
        msg.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abcdef");
    }

    #[test]
    fn test_seek_from_end() {
        let mut msg = Message::new(b"abcdef".to_vec());
        let pos = msg.seek(SeekFrom::End(-2)).unwrap();
        assert_eq!(pos, 4);
        let mut out = Vec::new();
        msg.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"ef");
    }

    #[test]
    fn test_seek_before_start_fails() {
        let mut msg = Message::new(b"abc".to_vec());
        assert!(msg.seek(SeekFrom::Current(-1)).is_err());
    }

    #[test]
    fn test_empty_payload() {
        let mut msg = Message::new(Vec::new());
        assert!(msg.is_empty());
        let mut buf = [0u8; 4];
        assert_eq!(msg.read(&mut buf).unwrap(), 0);
    }
}
