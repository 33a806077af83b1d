use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use sigweave_transport::LinkStream;

use crate::codec::{
    encode_frame, DataFrame, EventFrame, EventHeader, FrameConfig, FrameKind, StreamHeader,
};
use crate::error::{FrameError, Result};
use crate::hello::Hello;
use crate::order::ByteOrder;
use crate::reader::transport_to_frame_error;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete frames to any `Write` stream.
///
/// Frames are encoded in the byte order from [`FrameConfig::byte_order`],
/// which must match the order announced in this side's hello.
pub struct FrameWriter<T> {
    inner: T,
    body: BytesMut,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            body: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Byte order used for outgoing frames.
    pub fn order(&self) -> ByteOrder {
        self.config.byte_order
    }

    /// Send this side's hello.
    pub fn write_hello(&mut self, hello: &Hello) -> Result<()> {
        self.buf.clear();
        hello.encode(&mut self.buf)?;
        self.write_buf()
    }

    /// Send a frame with a pre-encoded body.
    pub fn write_frame(&mut self, kind: FrameKind, body: &[u8]) -> Result<()> {
        self.body.clear();
        self.body.extend_from_slice(body);
        self.send_body(kind)
    }

    /// Send the stream header that opens a stream link.
    pub fn write_stream_header(&mut self, header: &StreamHeader) -> Result<()> {
        self.body.clear();
        header.encode_body(self.config.byte_order, &mut self.body)?;
        self.send_body(FrameKind::StreamHeader)
    }

    /// Send one data frame; its payload must match `header`.
    pub fn write_data(&mut self, header: &StreamHeader, frame: &DataFrame) -> Result<()> {
        self.body.clear();
        frame.encode_body(header, self.config.byte_order, &mut self.body)?;
        self.send_body(FrameKind::Data)
    }

    /// Send the event header that opens an event link.
    pub fn write_event_header(&mut self, header: &EventHeader) -> Result<()> {
        self.body.clear();
        header.encode_body(self.config.byte_order, &mut self.body)?;
        self.send_body(FrameKind::EventHeader)
    }

    /// Send one event frame.
    pub fn write_event(&mut self, event: &EventFrame) -> Result<()> {
        self.body.clear();
        event.encode_body(self.config.byte_order, &mut self.body)?;
        self.send_body(FrameKind::Event)
    }

    fn send_body(&mut self, kind: FrameKind) -> Result<()> {
        if self.body.len() > self.config.max_frame_size {
            return Err(FrameError::FrameTooLarge {
                size: self.body.len(),
                max: self.config.max_frame_size,
            });
        }
        self.buf.clear();
        encode_frame(kind, &self.body, self.config.byte_order, &mut self.buf)?;
        self.write_buf()
    }

    fn write_buf(&mut self) -> Result<()> {
        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl FrameWriter<LinkStream> {
    /// Create a frame writer for a `LinkStream` and apply the write timeout from config.
    pub fn with_config_link(inner: LinkStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }

    /// Change the write timeout after construction.
    pub fn set_write_timeout(&mut self, timeout: Option<std::time::Duration>) -> Result<()> {
        self.config.write_timeout = timeout;
        self.inner
            .set_write_timeout(timeout)
            .map_err(transport_to_frame_error)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::Bytes;

    use super::*;
    use crate::codec::{decode_frame, DEFAULT_MAX_FRAME, HEADER_SIZE};

    #[test]
    fn write_event_header_frame() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        writer
            .write_event_header(&EventHeader {
                topic: "ev".to_string(),
            })
            .unwrap();

        let mut wire = BytesMut::from(writer.into_inner().into_inner().as_slice());
        assert_eq!(wire.len(), HEADER_SIZE + 4);
        let frame = decode_frame(&mut wire, ByteOrder::Big, DEFAULT_MAX_FRAME)
            .unwrap()
            .unwrap();
        assert_eq!(frame.kind, FrameKind::EventHeader);
        assert_eq!(frame.body.as_ref(), b"\x00\x02ev");
    }

    #[test]
    fn little_endian_writer_encodes_lengths_little_endian() {
        let mut writer = FrameWriter::with_config(
            Vec::<u8>::new(),
            FrameConfig {
                byte_order: ByteOrder::Little,
                ..FrameConfig::default()
            },
        );
        writer
            .write_event_header(&EventHeader {
                topic: "x".to_string(),
            })
            .unwrap();
        let wire = writer.into_inner();
        // envelope length (3) little endian, then topic length (1) little endian
        assert_eq!(&wire[3..7], &[3, 0, 0, 0]);
        assert_eq!(&wire[7..9], &[1, 0]);
    }

    #[test]
    fn rejects_frame_above_limit() {
        let cfg = FrameConfig {
            max_frame_size: 8,
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config(Cursor::new(Vec::<u8>::new()), cfg);
        let event = EventFrame {
            sender: "too-long-sender".to_string(),
            time_us: 0,
            duration_us: 0,
            payload_kind: 0,
            payload: Bytes::new(),
        };
        assert!(matches!(
            writer.write_event(&event),
            Err(FrameError::FrameTooLarge { .. })
        ));
        assert!(writer.into_inner().into_inner().is_empty());
    }

    #[test]
    fn write_zero_is_connection_closed() {
        let mut writer = FrameWriter::new(ZeroWriter);
        let err = writer
            .write_event_header(&EventHeader {
                topic: "z".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn write_error_propagates_as_io() {
        let mut writer = FrameWriter::new(BrokenPipeWriter);
        let err = writer
            .write_event_header(&EventHeader {
                topic: "z".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::BrokenPipe));
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct BrokenPipeWriter;

    impl Write for BrokenPipeWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
