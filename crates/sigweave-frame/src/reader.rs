use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use sigweave_transport::LinkStream;

use crate::codec::{
    decode_frame, DataFrame, EventFrame, EventHeader, Frame, FrameConfig, FrameKind, StreamHeader,
};
use crate::error::{FrameError, Result};
use crate::hello::Hello;
use crate::order::ByteOrder;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete frames.
/// Frames are decoded in the byte order the peer declared in its hello
/// (see [`FrameReader::read_hello`]).
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
    peer_order: ByteOrder,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        let peer_order = config.byte_order;
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
            peer_order,
        }
    }

    /// Read the peer's hello and adopt its byte order for later frames.
    pub fn read_hello(&mut self) -> Result<Hello> {
        loop {
            if let Some(hello) = Hello::decode(&mut self.buf)? {
                tracing::debug!(
                    topic = %hello.topic,
                    family = ?hello.family,
                    order = ?hello.order,
                    "peer hello received"
                );
                self.peer_order = hello.order;
                return Ok(hello);
            }
            self.fill()?;
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached between
    /// frames and `Err(FrameError::Truncated)` when it is reached inside one.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) =
                decode_frame(&mut self.buf, self.peer_order, self.config.max_frame_size)?
            {
                tracing::trace!(kind = ?frame.kind, len = frame.body.len(), "frame decoded");
                return Ok(frame);
            }
            self.fill()?;
        }
    }

    /// Read the stream header that opens a stream link.
    pub fn read_stream_header(&mut self) -> Result<StreamHeader> {
        let frame = self.read_frame()?;
        frame.expect(FrameKind::StreamHeader)?;
        let header = StreamHeader::decode_body(frame.body, self.peer_order)?;
        header.check_frame_size(self.config.max_frame_size)?;
        Ok(header)
    }

    /// Read one data frame of a stream described by `header`.
    pub fn read_data(&mut self, header: &StreamHeader) -> Result<DataFrame> {
        let frame = self.read_frame()?;
        frame.expect(FrameKind::Data)?;
        DataFrame::decode_body(frame.body, header, self.peer_order)
    }

    /// Read the event header that opens an event link.
    pub fn read_event_header(&mut self) -> Result<EventHeader> {
        let frame = self.read_frame()?;
        frame.expect(FrameKind::EventHeader)?;
        EventHeader::decode_body(frame.body, self.peer_order)
    }

    /// Read one event frame.
    pub fn read_event(&mut self) -> Result<EventFrame> {
        let frame = self.read_frame()?;
        frame.expect(FrameKind::Event)?;
        EventFrame::decode_body(frame.body, self.peer_order)
    }

    fn fill(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                if self.buf.is_empty() {
                    return Err(FrameError::ConnectionClosed);
                }
                return Err(FrameError::Truncated {
                    buffered: self.buf.len(),
                });
            }

            self.buf.extend_from_slice(&chunk[..read]);
            return Ok(());
        }
    }

    /// Byte order currently used to decode incoming frames.
    pub fn peer_order(&self) -> ByteOrder {
        self.peer_order
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl FrameReader<LinkStream> {
    /// Create a frame reader for a `LinkStream` and apply the read timeout from config.
    pub fn with_config_link(inner: LinkStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }

    /// Change the read timeout after construction (e.g. once a handshake is done).
    pub fn set_read_timeout(&mut self, timeout: Option<std::time::Duration>) -> Result<()> {
        self.config.read_timeout = timeout;
        self.inner
            .set_read_timeout(timeout)
            .map_err(transport_to_frame_error)
    }
}

pub(crate) fn transport_to_frame_error(err: sigweave_transport::TransportError) -> FrameError {
    match err {
        sigweave_transport::TransportError::Io(io)
        | sigweave_transport::TransportError::Accept(io) => FrameError::Io(io),
        sigweave_transport::TransportError::Bind { source, .. }
        | sigweave_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
