use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::order::{put_string, ByteOrder, Fields};

/// Envelope header: magic (2) + kind (1) + body length (4) = 7 bytes.
pub const HEADER_SIZE: usize = 7;

/// Envelope magic bytes: "SG" (0x53 0x47).
pub const MAGIC: [u8; 2] = [0x53, 0x47];

/// Default maximum body size: 16 MiB.
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

/// Fixed part of a data frame body: count (4) + timestamp (8).
const DATA_FIXED_SIZE: usize = 12;

/// What an envelope carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    StreamHeader,
    Data,
    EventHeader,
    Event,
}

impl FrameKind {
    pub fn code(self) -> u8 {
        match self {
            FrameKind::StreamHeader => 0x01,
            FrameKind::Data => 0x02,
            FrameKind::EventHeader => 0x03,
            FrameKind::Event => 0x04,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0x01 => Ok(FrameKind::StreamHeader),
            0x02 => Ok(FrameKind::Data),
            0x03 => Ok(FrameKind::EventHeader),
            0x04 => Ok(FrameKind::Event),
            other => Err(FrameError::UnknownKind(other)),
        }
    }
}

/// One enveloped frame with its undecoded body.
#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: FrameKind,
    pub body: Bytes,
}

impl Frame {
    /// The total wire size of this frame (envelope + body).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }

    /// Fail unless this frame is of the `expected` kind.
    pub fn expect(&self, expected: FrameKind) -> Result<()> {
        if self.kind != expected {
            return Err(FrameError::UnexpectedKind {
                expected,
                got: self.kind,
            });
        }
        Ok(())
    }
}

/// Encode one envelope.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────┬──────────────┬─────────────────┐
/// │ Magic (2B)   │ Kind     │ Length       │ Body            │
/// │ 0x53 0x47    │ (1B)     │ (4B, order)  │ (Length bytes)  │
/// │ "SG"         │          │              │                 │
/// └──────────────┴──────────┴──────────────┴─────────────────┘
/// ```
pub fn encode_frame(kind: FrameKind, body: &[u8], order: ByteOrder, dst: &mut BytesMut) -> Result<()> {
    let len = u32::try_from(body.len()).map_err(|_| FrameError::FrameTooLarge {
        size: body.len(),
        max: u32::MAX as usize,
    })?;
    dst.reserve(HEADER_SIZE + body.len());
    dst.put_slice(&MAGIC);
    dst.put_u8(kind.code());
    order.put_u32(dst, len);
    dst.put_slice(body);
    Ok(())
}

/// Decode one envelope from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, order: ByteOrder, max_body: usize) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    if src[0..2] != MAGIC {
        return Err(FrameError::InvalidMagic);
    }
    let kind = FrameKind::from_code(src[2])?;
    let body_len = order.read_u32([src[3], src[4], src[5], src[6]]) as usize;

    if body_len > max_body {
        return Err(FrameError::FrameTooLarge {
            size: body_len,
            max: max_body,
        });
    }

    let total = HEADER_SIZE + body_len;
    if src.len() < total {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let body = src.split_to(body_len).freeze();

    Ok(Some(Frame { kind, body }))
}

/// One-time header opening a stream link.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamHeader {
    pub topic: String,
    pub sample_rate: f64,
    pub dim: u32,
    pub bytes_per_value: u32,
    pub type_code: u32,
}

impl StreamHeader {
    /// Bytes per sample across all dimensions.
    pub fn sample_bytes(&self) -> usize {
        self.dim as usize * self.bytes_per_value as usize
    }

    /// Payload bytes of `count` samples, `None` if that overflows.
    pub fn payload_len(&self, count: u32) -> Option<usize> {
        (count as usize).checked_mul(self.sample_bytes())
    }

    /// Reject headers whose single sample cannot fit in a data frame of at
    /// most `max_frame_size` bytes.
    pub fn check_frame_size(&self, max_frame_size: usize) -> Result<()> {
        let size = self.sample_bytes().saturating_add(DATA_FIXED_SIZE);
        if size > max_frame_size {
            return Err(FrameError::FrameTooLarge {
                size,
                max: max_frame_size,
            });
        }
        Ok(())
    }

    pub fn encode_body(&self, order: ByteOrder, dst: &mut BytesMut) -> Result<()> {
        put_string(order, dst, &self.topic, "topic")?;
        order.put_f64(dst, self.sample_rate);
        order.put_u32(dst, self.dim);
        order.put_u32(dst, self.bytes_per_value);
        order.put_u32(dst, self.type_code);
        Ok(())
    }

    pub fn decode_body(body: Bytes, order: ByteOrder) -> Result<Self> {
        let mut fields = Fields::new(body, order);
        let header = Self {
            topic: fields.string("topic")?,
            sample_rate: fields.f64()?,
            dim: fields.u32()?,
            bytes_per_value: fields.u32()?,
            type_code: fields.u32()?,
        };
        fields.finish()?;

        if !(header.sample_rate.is_finite() && header.sample_rate > 0.0) {
            return Err(FrameError::InvalidField(format!(
                "sample rate {}",
                header.sample_rate
            )));
        }
        if header.dim == 0 || header.bytes_per_value == 0 {
            return Err(FrameError::InvalidField(format!(
                "dimension {} x {} bytes",
                header.dim, header.bytes_per_value
            )));
        }
        Ok(header)
    }
}

/// A block of samples on a stream link.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame {
    /// Number of samples in `payload`.
    pub count: u32,
    /// Timestamp of the first sample, microseconds on the sender's timebase.
    pub time_us: i64,
    pub payload: Bytes,
}

impl DataFrame {
    /// Encode the body, checking the payload against the stream header.
    pub fn encode_body(&self, header: &StreamHeader, order: ByteOrder, dst: &mut BytesMut) -> Result<()> {
        let expected = header.payload_len(self.count).unwrap_or(usize::MAX);
        if self.payload.len() != expected {
            return Err(FrameError::LengthMismatch {
                declared: expected,
                actual: self.payload.len(),
            });
        }
        dst.reserve(DATA_FIXED_SIZE + self.payload.len());
        order.put_u32(dst, self.count);
        order.put_i64(dst, self.time_us);
        dst.put_slice(&self.payload);
        Ok(())
    }

    /// Decode a body; the payload must be exactly `count` samples long.
    pub fn decode_body(body: Bytes, header: &StreamHeader, order: ByteOrder) -> Result<Self> {
        let mut fields = Fields::new(body, order);
        let count = fields.u32()?;
        let time_us = fields.i64()?;
        let declared = header
            .payload_len(count)
            .ok_or(FrameError::LengthMismatch {
                declared: usize::MAX,
                actual: fields.declared(),
            })?;
        let payload = fields.bytes(declared)?;
        fields.finish()?;
        Ok(Self {
            count,
            time_us,
            payload,
        })
    }
}

/// One-time header opening an event link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHeader {
    pub topic: String,
}

impl EventHeader {
    pub fn encode_body(&self, order: ByteOrder, dst: &mut BytesMut) -> Result<()> {
        put_string(order, dst, &self.topic, "topic")
    }

    pub fn decode_body(body: Bytes, order: ByteOrder) -> Result<Self> {
        let mut fields = Fields::new(body, order);
        let topic = fields.string("topic")?;
        fields.finish()?;
        Ok(Self { topic })
    }
}

/// One discrete event on an event link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFrame {
    pub sender: String,
    pub time_us: i64,
    pub duration_us: i64,
    /// Payload type tag, interpreted by the pipeline layer.
    pub payload_kind: u8,
    pub payload: Bytes,
}

impl EventFrame {
    pub fn encode_body(&self, order: ByteOrder, dst: &mut BytesMut) -> Result<()> {
        let payload_len = u32::try_from(self.payload.len()).map_err(|_| FrameError::FrameTooLarge {
            size: self.payload.len(),
            max: u32::MAX as usize,
        })?;
        put_string(order, dst, &self.sender, "sender")?;
        order.put_i64(dst, self.time_us);
        order.put_i64(dst, self.duration_us);
        dst.put_u8(self.payload_kind);
        order.put_u32(dst, payload_len);
        dst.put_slice(&self.payload);
        Ok(())
    }

    pub fn decode_body(body: Bytes, order: ByteOrder) -> Result<Self> {
        let mut fields = Fields::new(body, order);
        let sender = fields.string("sender")?;
        let time_us = fields.i64()?;
        let duration_us = fields.i64()?;
        let payload_kind = fields.u8()?;
        let payload_len = fields.u32()? as usize;
        let payload = fields.bytes(payload_len)?;
        fields.finish()?;
        if duration_us < 0 {
            return Err(FrameError::InvalidField(format!(
                "negative event duration {duration_us}"
            )));
        }
        Ok(Self {
            sender,
            time_us,
            duration_us,
            payload_kind,
            payload,
        })
    }
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum body size in bytes. Default: 16 MiB.
    pub max_frame_size: usize,
    /// Byte order used for frames this side writes.
    pub byte_order: ByteOrder,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME,
            byte_order: ByteOrder::default(),
            read_timeout: None,
            write_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn acc_header() -> StreamHeader {
        StreamHeader {
            topic: "acc".to_string(),
            sample_rate: 50.0,
            dim: 3,
            bytes_per_value: 4,
            type_code: 6,
        }
    }

    fn encode_data(header: &StreamHeader, frame: &DataFrame, order: ByteOrder) -> BytesMut {
        let mut body = BytesMut::new();
        frame.encode_body(header, order, &mut body).unwrap();
        let mut wire = BytesMut::new();
        encode_frame(FrameKind::Data, &body, order, &mut wire).unwrap();
        wire
    }

    #[test]
    fn envelope_roundtrip() {
        let mut buf = BytesMut::new();
        encode_frame(FrameKind::Event, b"body", ByteOrder::Big, &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + 4);

        let frame = decode_frame(&mut buf, ByteOrder::Big, DEFAULT_MAX_FRAME)
            .unwrap()
            .unwrap();
        assert_eq!(frame.kind, FrameKind::Event);
        assert_eq!(frame.body.as_ref(), b"body");
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_incomplete_envelope() {
        let mut buf = BytesMut::from(&[0x53, 0x47, 0x02][..]);
        assert!(decode_frame(&mut buf, ByteOrder::Big, DEFAULT_MAX_FRAME)
            .unwrap()
            .is_none());

        let mut buf = BytesMut::new();
        encode_frame(FrameKind::Data, b"hello", ByteOrder::Big, &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 2);
        assert!(decode_frame(&mut buf, ByteOrder::Big, DEFAULT_MAX_FRAME)
            .unwrap()
            .is_none());
    }

    #[test]
    fn decode_invalid_magic_and_kind() {
        let mut buf = BytesMut::from(&[0xFF, 0xFF, 0x01, 0, 0, 0, 0][..]);
        assert!(matches!(
            decode_frame(&mut buf, ByteOrder::Big, DEFAULT_MAX_FRAME),
            Err(FrameError::InvalidMagic)
        ));

        let mut buf = BytesMut::from(&[0x53, 0x47, 0x7F, 0, 0, 0, 0][..]);
        assert!(matches!(
            decode_frame(&mut buf, ByteOrder::Big, DEFAULT_MAX_FRAME),
            Err(FrameError::UnknownKind(0x7F))
        ));
    }

    #[test]
    fn decode_frame_too_large() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u8(FrameKind::Data.code());
        buf.put_u32(1024 * 1024 * 32);
        assert!(matches!(
            decode_frame(&mut buf, ByteOrder::Big, DEFAULT_MAX_FRAME),
            Err(FrameError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn stream_header_roundtrip() {
        let header = acc_header();
        let mut body = BytesMut::new();
        header.encode_body(ByteOrder::Little, &mut body).unwrap();
        let decoded = StreamHeader::decode_body(body.freeze(), ByteOrder::Little).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn stream_header_rejects_zero_rate() {
        let header = StreamHeader {
            sample_rate: 0.0,
            ..acc_header()
        };
        let mut body = BytesMut::new();
        header.encode_body(ByteOrder::Big, &mut body).unwrap();
        assert!(matches!(
            StreamHeader::decode_body(body.freeze(), ByteOrder::Big),
            Err(FrameError::InvalidField(_))
        ));
    }

    #[test]
    fn data_frame_with_short_payload_is_rejected() {
        let header = acc_header();
        let mut body = BytesMut::new();
        ByteOrder::Big.put_u32(&mut body, 2);
        ByteOrder::Big.put_i64(&mut body, 1_000);
        // two samples of 3 x f32 need 24 bytes, supply 20
        body.put_slice(&[0u8; 20]);
        assert!(matches!(
            DataFrame::decode_body(body.freeze(), &header, ByteOrder::Big),
            Err(FrameError::LengthMismatch {
                declared: 36,
                actual: 32
            })
        ));
    }

    #[test]
    fn data_frame_with_trailing_bytes_is_rejected() {
        let header = acc_header();
        let mut body = BytesMut::new();
        ByteOrder::Big.put_u32(&mut body, 1);
        ByteOrder::Big.put_i64(&mut body, 0);
        body.put_slice(&[0u8; 13]);
        assert!(matches!(
            DataFrame::decode_body(body.freeze(), &header, ByteOrder::Big),
            Err(FrameError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn encode_refuses_payload_not_matching_count() {
        let frame = DataFrame {
            count: 2,
            time_us: 0,
            payload: Bytes::from_static(&[0u8; 12]),
        };
        let mut body = BytesMut::new();
        assert!(matches!(
            frame.encode_body(&acc_header(), ByteOrder::Big, &mut body),
            Err(FrameError::LengthMismatch {
                declared: 24,
                actual: 12
            })
        ));
    }

    #[test]
    fn event_frame_roundtrip() {
        let event = EventFrame {
            sender: "mean".to_string(),
            time_us: 2_000_000,
            duration_us: 1_000_000,
            payload_kind: 2,
            payload: Bytes::from_static(b"\x3f\x80\x00\x00"),
        };
        let mut body = BytesMut::new();
        event.encode_body(ByteOrder::Big, &mut body).unwrap();
        let decoded = EventFrame::decode_body(body.freeze(), ByteOrder::Big).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn event_frame_payload_length_mismatch() {
        let event = EventFrame {
            sender: "s".to_string(),
            time_us: 0,
            duration_us: 0,
            payload_kind: 3,
            payload: Bytes::from_static(b"abc"),
        };
        let mut body = BytesMut::new();
        event.encode_body(ByteOrder::Big, &mut body).unwrap();
        body.truncate(body.len() - 1);
        assert!(matches!(
            EventFrame::decode_body(body.freeze(), ByteOrder::Big),
            Err(FrameError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn oversized_sample_layout_is_an_error_not_a_panic() {
        let header = StreamHeader {
            dim: u32::MAX,
            bytes_per_value: u32::MAX,
            ..acc_header()
        };
        let mut body = BytesMut::new();
        body.put_u32(2);
        body.put_i64(0);
        body.put_slice(&[0u8; 16]);
        assert!(matches!(
            DataFrame::decode_body(body.freeze(), &header, ByteOrder::Big),
            Err(FrameError::LengthMismatch { .. })
        ));
        assert!(matches!(
            header.check_frame_size(DEFAULT_MAX_FRAME),
            Err(FrameError::FrameTooLarge { .. })
        ));

        let wide = StreamHeader {
            dim: 65_536,
            bytes_per_value: 65_536,
            ..acc_header()
        };
        assert!(wide.check_frame_size(DEFAULT_MAX_FRAME).is_err());
        assert!(acc_header().check_frame_size(DEFAULT_MAX_FRAME).is_ok());
    }

    #[test]
    fn stream_roundtrip_for_zero_one_and_many_frames() {
        let header = acc_header();
        for k in [0usize, 1, 1000] {
            let mut wire = BytesMut::new();
            let mut body = BytesMut::new();
            header.encode_body(ByteOrder::Big, &mut body).unwrap();
            encode_frame(FrameKind::StreamHeader, &body, ByteOrder::Big, &mut wire).unwrap();

            let frames: Vec<DataFrame> = (0..k)
                .map(|i| DataFrame {
                    count: 1 + (i % 4) as u32,
                    time_us: i as i64 * 20_000,
                    payload: Bytes::from(
                        (0..(1 + i % 4) * header.sample_bytes())
                            .map(|b| (b + i) as u8)
                            .collect::<Vec<u8>>(),
                    ),
                })
                .collect();
            for frame in &frames {
                wire.extend_from_slice(&encode_data(&header, frame, ByteOrder::Big));
            }

            let first = decode_frame(&mut wire, ByteOrder::Big, DEFAULT_MAX_FRAME)
                .unwrap()
                .unwrap();
            first.expect(FrameKind::StreamHeader).unwrap();
            let decoded_header = StreamHeader::decode_body(first.body, ByteOrder::Big).unwrap();
            assert_eq!(decoded_header, header);

            let mut decoded = Vec::new();
            while let Some(frame) = decode_frame(&mut wire, ByteOrder::Big, DEFAULT_MAX_FRAME).unwrap() {
                frame.expect(FrameKind::Data).unwrap();
                decoded.push(DataFrame::decode_body(frame.body, &decoded_header, ByteOrder::Big).unwrap());
            }
            assert_eq!(decoded, frames, "k = {k}");
        }
    }

    proptest! {
        #[test]
        fn data_frames_survive_either_byte_order(
            little in any::<bool>(),
            dim in 1u32..8,
            width in prop::sample::select(vec![1u32, 2, 4, 8]),
            count in 0u32..32,
            time_us in any::<i64>(),
            seed in any::<u8>(),
        ) {
            let order = if little { ByteOrder::Little } else { ByteOrder::Big };
            let header = StreamHeader {
                topic: "p".to_string(),
                sample_rate: 100.0,
                dim,
                bytes_per_value: width,
                type_code: 1,
            };
            let len = count as usize * header.sample_bytes();
            let frame = DataFrame {
                count,
                time_us,
                payload: Bytes::from((0..len).map(|i| (i as u8).wrapping_add(seed)).collect::<Vec<u8>>()),
            };
            let mut wire = encode_data(&header, &frame, order);
            let env = decode_frame(&mut wire, order, DEFAULT_MAX_FRAME).unwrap().unwrap();
            let back = DataFrame::decode_body(env.body, &header, order).unwrap();
            prop_assert_eq!(back, frame);
        }
    }
}
