use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Byte order a sender uses for every multi-byte field after its hello.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ByteOrder {
    /// Network order.
    #[default]
    Big,
    Little,
}

impl ByteOrder {
    /// The order of the machine running this code.
    pub fn native() -> Self {
        if cfg!(target_endian = "little") {
            Self::Little
        } else {
            Self::Big
        }
    }

    /// Single-byte marker written in the hello.
    pub fn marker(self) -> u8 {
        match self {
            Self::Big => b'B',
            Self::Little => b'L',
        }
    }

    /// Parse a hello marker byte.
    pub fn from_marker(marker: u8) -> Result<Self> {
        match marker {
            b'B' => Ok(Self::Big),
            b'L' => Ok(Self::Little),
            other => Err(FrameError::InvalidField(format!(
                "byte order marker {other:#04x}"
            ))),
        }
    }

    pub(crate) fn put_u16(self, dst: &mut BytesMut, v: u16) {
        match self {
            Self::Big => dst.put_u16(v),
            Self::Little => dst.put_u16_le(v),
        }
    }

    pub(crate) fn put_u32(self, dst: &mut BytesMut, v: u32) {
        match self {
            Self::Big => dst.put_u32(v),
            Self::Little => dst.put_u32_le(v),
        }
    }

    pub(crate) fn put_i64(self, dst: &mut BytesMut, v: i64) {
        match self {
            Self::Big => dst.put_i64(v),
            Self::Little => dst.put_i64_le(v),
        }
    }

    pub(crate) fn put_f64(self, dst: &mut BytesMut, v: f64) {
        match self {
            Self::Big => dst.put_f64(v),
            Self::Little => dst.put_f64_le(v),
        }
    }

    /// Read a u32 from a raw 4-byte slice (envelope length field).
    pub(crate) fn read_u32(self, raw: [u8; 4]) -> u32 {
        match self {
            Self::Big => u32::from_be_bytes(raw),
            Self::Little => u32::from_le_bytes(raw),
        }
    }

    pub(crate) fn read_u16(self, raw: [u8; 2]) -> u16 {
        match self {
            Self::Big => u16::from_be_bytes(raw),
            Self::Little => u16::from_le_bytes(raw),
        }
    }
}

/// Strict field reader over one frame body.
///
/// Every getter checks that enough bytes remain, and [`Fields::finish`]
/// checks that nothing is left over.
pub(crate) struct Fields {
    body: Bytes,
    order: ByteOrder,
    declared: usize,
}

impl Fields {
    pub(crate) fn new(body: Bytes, order: ByteOrder) -> Self {
        let declared = body.len();
        Self {
            body,
            order,
            declared,
        }
    }

    /// Body length the fields are read from.
    pub(crate) fn declared(&self) -> usize {
        self.declared
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.body.remaining() < n {
            return Err(FrameError::LengthMismatch {
                declared: (self.declared - self.body.remaining()).saturating_add(n),
                actual: self.declared,
            });
        }
        Ok(())
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.body.get_u8())
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        self.need(2)?;
        Ok(match self.order {
            ByteOrder::Big => self.body.get_u16(),
            ByteOrder::Little => self.body.get_u16_le(),
        })
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(match self.order {
            ByteOrder::Big => self.body.get_u32(),
            ByteOrder::Little => self.body.get_u32_le(),
        })
    }

    pub(crate) fn i64(&mut self) -> Result<i64> {
        self.need(8)?;
        Ok(match self.order {
            ByteOrder::Big => self.body.get_i64(),
            ByteOrder::Little => self.body.get_i64_le(),
        })
    }

    pub(crate) fn f64(&mut self) -> Result<f64> {
        self.need(8)?;
        Ok(match self.order {
            ByteOrder::Big => self.body.get_f64(),
            ByteOrder::Little => self.body.get_f64_le(),
        })
    }

    pub(crate) fn bytes(&mut self, n: usize) -> Result<Bytes> {
        self.need(n)?;
        Ok(self.body.split_to(n))
    }

    /// A u16 length-prefixed UTF-8 string.
    pub(crate) fn string(&mut self, what: &str) -> Result<String> {
        let len = self.u16()? as usize;
        let raw = self.bytes(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| FrameError::InvalidField(format!("{what} is not valid UTF-8")))
    }

    /// Fail if bytes are left over after the last field.
    pub(crate) fn finish(self) -> Result<()> {
        if self.body.has_remaining() {
            return Err(FrameError::LengthMismatch {
                declared: self.declared - self.body.remaining(),
                actual: self.declared,
            });
        }
        Ok(())
    }
}

/// Write a u16 length-prefixed string.
pub(crate) fn put_string(order: ByteOrder, dst: &mut BytesMut, value: &str, what: &str) -> Result<()> {
    let len = u16::try_from(value.len()).map_err(|_| {
        FrameError::InvalidField(format!("{what} too long ({} bytes)", value.len()))
    })?;
    order.put_u16(dst, len);
    dst.put_slice(value.as_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_roundtrip() {
        for order in [ByteOrder::Big, ByteOrder::Little] {
            assert_eq!(ByteOrder::from_marker(order.marker()).unwrap(), order);
        }
        assert!(ByteOrder::from_marker(b'X').is_err());
    }

    #[test]
    fn fields_respect_declared_order() {
        let mut buf = BytesMut::new();
        ByteOrder::Little.put_u32(&mut buf, 0x0102_0304);
        assert_eq!(&buf[..], &[0x04, 0x03, 0x02, 0x01]);

        let mut fields = Fields::new(buf.clone().freeze(), ByteOrder::Little);
        assert_eq!(fields.u32().unwrap(), 0x0102_0304);
        fields.finish().unwrap();

        let mut fields = Fields::new(buf.freeze(), ByteOrder::Big);
        assert_eq!(fields.u32().unwrap(), 0x0403_0201);
    }

    #[test]
    fn short_body_is_length_mismatch() {
        let mut fields = Fields::new(Bytes::from_static(&[0, 1, 2]), ByteOrder::Big);
        assert!(matches!(
            fields.u32(),
            Err(FrameError::LengthMismatch {
                declared: 4,
                actual: 3
            })
        ));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut fields = Fields::new(Bytes::from_static(&[0, 1, 2]), ByteOrder::Big);
        fields.u16().unwrap();
        assert!(matches!(
            fields.finish(),
            Err(FrameError::LengthMismatch { .. })
        ));
    }
}
