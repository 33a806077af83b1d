use bytes::{Buf, BufMut, BytesMut};

use crate::error::{FrameError, Result};
use crate::order::{put_string, ByteOrder};

/// Hello magic: "SGWV".
pub const HELLO_MAGIC: [u8; 4] = *b"SGWV";

/// Wire protocol version spoken by this build.
pub const PROTOCOL_VERSION: u8 = 1;

/// Fixed part of a hello: magic (4) + version (1) + order (1) + family (1) + topic length (2).
pub const HELLO_FIXED_SIZE: usize = 9;

/// Which frame family a link carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// Stream header followed by sample data frames.
    Stream,
    /// Event header followed by event frames.
    Event,
}

impl Family {
    fn code(self) -> u8 {
        match self {
            Family::Stream => 1,
            Family::Event => 2,
        }
    }

    fn from_code(code: u8) -> Result<Self> {
        match code {
            1 => Ok(Family::Stream),
            2 => Ok(Family::Event),
            other => Err(FrameError::InvalidField(format!("frame family {other}"))),
        }
    }
}

/// Fixed-format greeting each side sends before any frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub version: u8,
    /// Byte order for every multi-byte field this side sends.
    pub order: ByteOrder,
    pub family: Family,
    pub topic: String,
}

impl Hello {
    pub fn new(topic: impl Into<String>, family: Family, order: ByteOrder) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            order,
            family,
            topic: topic.into(),
        }
    }

    /// Encode the hello.
    ///
    /// ```text
    /// ┌──────────┬─────────┬───────┬────────┬──────────────┬────────┐
    /// │ "SGWV"   │ version │ order │ family │ topic length │ topic  │
    /// │ (4B)     │ (1B)    │ B / L │ (1B)   │ (2B, order)  │ UTF-8  │
    /// └──────────┴─────────┴───────┴────────┴──────────────┴────────┘
    /// ```
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(HELLO_FIXED_SIZE + self.topic.len());
        dst.put_slice(&HELLO_MAGIC);
        dst.put_u8(self.version);
        dst.put_u8(self.order.marker());
        dst.put_u8(self.family.code());
        put_string(self.order, dst, &self.topic, "topic")
    }

    /// Decode a hello from the front of `src`.
    ///
    /// Returns `Ok(None)` if the buffer does not hold a complete hello yet.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>> {
        if src.len() < HELLO_FIXED_SIZE {
            return Ok(None);
        }
        if src[0..4] != HELLO_MAGIC {
            return Err(FrameError::InvalidMagic);
        }
        let version = src[4];
        if version != PROTOCOL_VERSION {
            return Err(FrameError::UnsupportedVersion(version));
        }
        let order = ByteOrder::from_marker(src[5])?;
        let family = Family::from_code(src[6])?;
        let topic_len = order.read_u16([src[7], src[8]]) as usize;
        if src.len() < HELLO_FIXED_SIZE + topic_len {
            return Ok(None);
        }

        src.advance(HELLO_FIXED_SIZE);
        let topic = src.split_to(topic_len);
        let topic = String::from_utf8(topic.to_vec())
            .map_err(|_| FrameError::InvalidField("topic is not valid UTF-8".to_string()))?;

        Ok(Some(Self {
            version,
            order,
            family,
            topic,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_roundtrip_both_orders() {
        for order in [ByteOrder::Big, ByteOrder::Little] {
            let hello = Hello::new("acc", Family::Stream, order);
            let mut buf = BytesMut::new();
            hello.encode(&mut buf).unwrap();
            assert_eq!(buf.len(), HELLO_FIXED_SIZE + 3);

            let decoded = Hello::decode(&mut buf).unwrap().unwrap();
            assert_eq!(decoded, hello);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn partial_hello_needs_more() {
        let mut buf = BytesMut::new();
        Hello::new("event", Family::Event, ByteOrder::Big)
            .encode(&mut buf)
            .unwrap();
        let mut partial = BytesMut::from(&buf[..buf.len() - 2]);
        assert!(Hello::decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn rejects_bad_magic_and_version() {
        let mut buf = BytesMut::from(&b"NOPE\x01B\x01\x00\x00"[..]);
        assert!(matches!(
            Hello::decode(&mut buf),
            Err(FrameError::InvalidMagic)
        ));

        let mut buf = BytesMut::from(&b"SGWV\x09B\x01\x00\x00"[..]);
        assert!(matches!(
            Hello::decode(&mut buf),
            Err(FrameError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn rejects_unknown_family() {
        let mut buf = BytesMut::from(&b"SGWV\x01B\x07\x00\x00"[..]);
        assert!(matches!(
            Hello::decode(&mut buf),
            Err(FrameError::InvalidField(_))
        ));
    }
}
