//! Mapping between pipeline values and wire frames.

use bytes::{BufMut, Bytes, BytesMut};
use sigweave_core::{swap_element_order, Event, EventPayload, SampleFormat, SampleType};
use sigweave_frame::{ByteOrder, EventFrame, StreamHeader};

use crate::error::{LinkError, Result};

pub const PAYLOAD_EMPTY: u8 = 0;
pub const PAYLOAD_FLOATS: u8 = 1;
pub const PAYLOAD_TEXT: u8 = 2;
pub const PAYLOAD_BYTES: u8 = 3;

/// Stream header announcing `format` under `topic`.
pub fn header_for(topic: &str, format: &SampleFormat) -> StreamHeader {
    StreamHeader {
        topic: topic.to_string(),
        sample_rate: format.sample_rate,
        dim: format.dim,
        bytes_per_value: format.bytes_per_value,
        type_code: format.sample_type.code(),
    }
}

/// Sample format described by a received stream header.
pub fn format_from(header: &StreamHeader) -> Result<SampleFormat> {
    let sample_type = SampleType::from_code(header.type_code).ok_or_else(|| {
        LinkError::InvalidPayload(format!("unknown sample type code {}", header.type_code))
    })?;
    SampleFormat::new(
        header.sample_rate,
        header.dim,
        header.bytes_per_value,
        sample_type,
    )
    .map_err(|err| LinkError::InvalidPayload(err.to_string()))
}

/// Convert element bytes between native order and `wire` order.
///
/// The swap is its own inverse, so the same call serves both directions.
pub fn to_wire_elements(data: &Bytes, width: u32, wire: ByteOrder) -> Bytes {
    if wire == ByteOrder::native() {
        data.clone()
    } else {
        swap_element_order(data, width as usize)
    }
}

pub fn event_to_frame(event: &Event, order: ByteOrder) -> EventFrame {
    let (payload_kind, payload) = match &event.payload {
        EventPayload::Empty => (PAYLOAD_EMPTY, Bytes::new()),
        EventPayload::Floats(values) => {
            let mut buf = BytesMut::with_capacity(values.len() * 4);
            for v in values {
                match order {
                    ByteOrder::Big => buf.put_f32(*v),
                    ByteOrder::Little => buf.put_f32_le(*v),
                }
            }
            (PAYLOAD_FLOATS, buf.freeze())
        }
        EventPayload::Text(text) => (PAYLOAD_TEXT, Bytes::copy_from_slice(text.as_bytes())),
        EventPayload::Bytes(bytes) => (PAYLOAD_BYTES, bytes.clone()),
    };
    EventFrame {
        sender: event.sender.clone(),
        time_us: event.time_us,
        duration_us: event.duration_us,
        payload_kind,
        payload,
    }
}

pub fn event_from_frame(frame: EventFrame, order: ByteOrder) -> Result<Event> {
    let payload = match frame.payload_kind {
        PAYLOAD_EMPTY => {
            if !frame.payload.is_empty() {
                return Err(LinkError::InvalidPayload(format!(
                    "empty event carries {} bytes",
                    frame.payload.len()
                )));
            }
            EventPayload::Empty
        }
        PAYLOAD_FLOATS => {
            if frame.payload.len() % 4 != 0 {
                return Err(LinkError::InvalidPayload(format!(
                    "float payload of {} bytes",
                    frame.payload.len()
                )));
            }
            let values = frame
                .payload
                .chunks_exact(4)
                .map(|raw| {
                    let raw = [raw[0], raw[1], raw[2], raw[3]];
                    match order {
                        ByteOrder::Big => f32::from_be_bytes(raw),
                        ByteOrder::Little => f32::from_le_bytes(raw),
                    }
                })
                .collect();
            EventPayload::Floats(values)
        }
        PAYLOAD_TEXT => EventPayload::Text(
            String::from_utf8(frame.payload.to_vec())
                .map_err(|_| LinkError::InvalidPayload("text payload is not UTF-8".to_string()))?,
        ),
        PAYLOAD_BYTES => EventPayload::Bytes(frame.payload),
        other => {
            return Err(LinkError::InvalidPayload(format!(
                "unknown event payload kind {other}"
            )))
        }
    };
    Ok(Event {
        sender: frame.sender,
        time_us: frame.time_us,
        duration_us: frame.duration_us,
        payload,
    })
}
