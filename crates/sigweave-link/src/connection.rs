use std::time::Duration;

use serde::{Deserialize, Serialize};
use sigweave_frame::{
    ByteOrder, DataFrame, EventFrame, EventHeader, Family, Frame, FrameConfig, FrameKind,
    FrameReader, FrameWriter, Hello, StreamHeader,
};
use sigweave_transport::{connect_with_retry, Endpoint, LinkListener, LinkStream, ShutdownHandle};
use tracing::{debug, info};

use crate::error::{LinkError, Result};
use crate::handshake::exchange_hello;

pub const DEFAULT_CONNECT_TIMEOUT_SECONDS: f64 = 10.0;
pub const MAX_CONNECT_TIMEOUT_SECONDS: f64 = 86_400.0;

fn default_connect_timeout() -> f64 {
    DEFAULT_CONNECT_TIMEOUT_SECONDS
}

/// Which end of the link opens the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Binds the endpoint and waits for one peer.
    Listener,
    /// Connects to the peer's endpoint, retrying until it is up.
    Initiator,
}

/// Byte order announced in this side's hello.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireOrder {
    #[default]
    Native,
    Big,
    Little,
}

impl WireOrder {
    pub fn resolve(self) -> ByteOrder {
        match self {
            WireOrder::Native => ByteOrder::native(),
            WireOrder::Big => ByteOrder::Big,
            WireOrder::Little => ByteOrder::Little,
        }
    }
}

/// How to open one link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    pub role: Role,
    pub endpoint: Endpoint,
    /// Name both ends must agree on.
    pub topic: String,
    /// Seconds to wait for the peer (accept or connect retries).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: f64,
    #[serde(default)]
    pub byte_order: WireOrder,
}

impl ConnectionConfig {
    pub fn new(role: Role, endpoint: Endpoint, topic: impl Into<String>) -> Self {
        Self {
            role,
            endpoint,
            topic: topic.into(),
            connect_timeout_seconds: DEFAULT_CONNECT_TIMEOUT_SECONDS,
            byte_order: WireOrder::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.topic.is_empty() {
            return Err(LinkError::InvalidConfig("topic must not be empty".to_string()));
        }
        if self.topic.len() > u16::MAX as usize {
            return Err(LinkError::InvalidConfig(format!(
                "topic is {} bytes, at most {} allowed",
                self.topic.len(),
                u16::MAX
            )));
        }
        let timeout = self.connect_timeout_seconds;
        if !(timeout > 0.0 && timeout <= MAX_CONNECT_TIMEOUT_SECONDS) {
            return Err(LinkError::InvalidConfig(format!(
                "connect_timeout_seconds must be in (0, {MAX_CONNECT_TIMEOUT_SECONDS}], got {}",
                self.connect_timeout_seconds
            )));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.connect_timeout_seconds.min(MAX_CONNECT_TIMEOUT_SECONDS))
            .unwrap_or(Duration::from_secs(10))
    }
}

/// An open, handshaken link carrying one frame family.
pub struct Connection {
    role: Role,
    topic: String,
    family: Family,
    peer: String,
    reader: FrameReader<LinkStream>,
    writer: FrameWriter<LinkStream>,
    open: bool,
    // Keeps a listener's endpoint bound (and its socket file alive) while connected.
    _listener: Option<LinkListener>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("topic", &self.topic)
            .field("family", &self.family)
            .field("peer", &self.peer)
            .field("open", &self.open)
            .finish()
    }
}

impl Connection {
    /// Open the transport in the configured role and run the handshake.
    ///
    /// Blocks up to the connect timeout waiting for the peer.
    pub fn open(config: &ConnectionConfig, family: Family) -> Result<Self> {
        config.validate()?;
        let timeout = config.connect_timeout();
        let (stream, listener) = match config.role {
            Role::Listener => {
                let listener = LinkListener::bind(&config.endpoint)?;
                info!(
                    endpoint = %listener.local_endpoint(),
                    topic = %config.topic,
                    "waiting for peer"
                );
                let stream = listener.accept(Some(timeout))?;
                (stream, Some(listener))
            }
            Role::Initiator => {
                debug!(endpoint = %config.endpoint, topic = %config.topic, "connecting to peer");
                (connect_with_retry(&config.endpoint, timeout)?, None)
            }
        };

        Self::handshake(stream, listener, config, family)
    }

    /// Run the handshake over an already connected stream.
    pub fn from_stream(stream: LinkStream, config: &ConnectionConfig, family: Family) -> Result<Self> {
        config.validate()?;
        Self::handshake(stream, None, config, family)
    }

    fn handshake(
        stream: LinkStream,
        listener: Option<LinkListener>,
        config: &ConnectionConfig,
        family: Family,
    ) -> Result<Self> {
        let timeout = config.connect_timeout();
        let order = config.byte_order.resolve();
        let frame_config = FrameConfig {
            byte_order: order,
            read_timeout: Some(timeout),
            write_timeout: Some(timeout),
            ..FrameConfig::default()
        };
        let peer = stream.peer_label();
        let shutdown = stream.shutdown_handle()?;

        let reader_stream = stream.try_clone()?;
        let mut reader = FrameReader::with_config_link(reader_stream, frame_config.clone())?;
        let mut writer = FrameWriter::with_config_link(stream, frame_config)?;

        let local = Hello::new(config.topic.clone(), family, order);
        if let Err(err) = exchange_hello(&mut reader, &mut writer, &local) {
            shutdown.shutdown();
            return Err(err);
        }
        reader.set_read_timeout(None)?;
        writer.set_write_timeout(None)?;

        info!(
            role = ?config.role,
            topic = %config.topic,
            family = ?family,
            peer = %peer,
            "connected to {peer}"
        );
        Ok(Self {
            role: config.role,
            topic: config.topic.clone(),
            family,
            peer,
            reader,
            writer,
            open: true,
            _listener: listener,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn family(&self) -> Family {
        self.family
    }

    /// Human-readable peer address.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Byte order of frames this side writes.
    pub fn local_order(&self) -> ByteOrder {
        self.writer.order()
    }

    /// Byte order of frames the peer writes.
    pub fn peer_order(&self) -> ByteOrder {
        self.reader.peer_order()
    }

    fn ensure_open(&self) -> Result<()> {
        if !self.open {
            return Err(LinkError::Closed);
        }
        Ok(())
    }

    /// Read the next frame of any kind.
    pub fn read_frame(&mut self) -> Result<Frame> {
        self.ensure_open()?;
        Ok(self.reader.read_frame()?)
    }

    /// Write a frame with a pre-encoded body.
    pub fn write_frame(&mut self, kind: FrameKind, body: &[u8]) -> Result<()> {
        self.ensure_open()?;
        Ok(self.writer.write_frame(kind, body)?)
    }

    pub fn write_stream_header(&mut self, header: &StreamHeader) -> Result<()> {
        self.ensure_open()?;
        Ok(self.writer.write_stream_header(header)?)
    }

    pub fn read_stream_header(&mut self) -> Result<StreamHeader> {
        self.ensure_open()?;
        Ok(self.reader.read_stream_header()?)
    }

    pub fn write_data(&mut self, header: &StreamHeader, frame: &DataFrame) -> Result<()> {
        self.ensure_open()?;
        Ok(self.writer.write_data(header, frame)?)
    }

    pub fn read_data(&mut self, header: &StreamHeader) -> Result<DataFrame> {
        self.ensure_open()?;
        Ok(self.reader.read_data(header)?)
    }

    pub fn write_event_header(&mut self, header: &EventHeader) -> Result<()> {
        self.ensure_open()?;
        Ok(self.writer.write_event_header(header)?)
    }

    pub fn read_event_header(&mut self) -> Result<EventHeader> {
        self.ensure_open()?;
        Ok(self.reader.read_event_header()?)
    }

    pub fn write_event(&mut self, event: &EventFrame) -> Result<()> {
        self.ensure_open()?;
        Ok(self.writer.write_event(event)?)
    }

    pub fn read_event(&mut self) -> Result<EventFrame> {
        self.ensure_open()?;
        Ok(self.reader.read_event()?)
    }

    /// A handle that shuts the transport down from another thread, failing
    /// any read or write blocked on it.
    pub fn shutdown_handle(&self) -> Result<ShutdownHandle> {
        Ok(self.writer.get_ref().shutdown_handle()?)
    }

    /// Close the transport. Idempotent.
    pub fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Err(err) = self.writer.flush() {
            debug!(error = %err, "flush before close failed");
        }
        if let Err(err) = self.writer.get_ref().shutdown() {
            debug!(error = %err, "transport shutdown failed");
        }
        info!(topic = %self.topic, peer = %self.peer, "link closed");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
