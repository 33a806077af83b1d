//! Pipeline components that mirror a sample stream over a link.

use sigweave_core::{
    AbortHandle, ComponentError, Connectable, ConnectContext, Consumer, Event, Provider,
    SampleBlock, SampleFormat, SampleWindow, TickContext,
};
use sigweave_frame::{ByteOrder, DataFrame, Family, StreamHeader};
use tracing::{debug, info};

use crate::connection::{Connection, ConnectionConfig};
use crate::convert::{format_from, header_for, to_wire_elements};

fn abort_for(conn: Option<&Connection>) -> Option<AbortHandle> {
    let handle = conn?.shutdown_handle().ok()?;
    Some(AbortHandle::new(move || handle.shutdown()))
}

fn close(conn: &mut Option<Connection>) {
    if let Some(mut conn) = conn.take() {
        conn.close();
    }
}

/// Sends the windows of exactly one input stream to a peer's [`StreamReader`].
///
/// The stream header is sent on connect; every window becomes one data frame.
pub struct StreamWriter {
    name: String,
    config: ConnectionConfig,
    conn: Option<Connection>,
    header: Option<StreamHeader>,
    frames: u64,
}

impl StreamWriter {
    pub fn new(name: impl Into<String>, config: ConnectionConfig) -> Self {
        Self {
            name: name.into(),
            config,
            conn: None,
            header: None,
            frames: 0,
        }
    }

    /// Data frames sent so far.
    pub fn frames_sent(&self) -> u64 {
        self.frames
    }
}

impl Connectable for StreamWriter {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self, ctx: &ConnectContext<'_>) -> Result<(), ComponentError> {
        let [format] = ctx.inputs else {
            return Err(ComponentError::Setup(format!(
                "stream writer needs exactly one input, got {}",
                ctx.inputs.len()
            )));
        };
        let mut conn = Connection::open(&self.config, Family::Stream)?;
        let header = header_for(&self.config.topic, format);
        conn.write_stream_header(&header)?;
        info!(
            component = %self.name,
            topic = %header.topic,
            sample_rate = header.sample_rate,
            dim = header.dim,
            "stream header sent"
        );
        self.header = Some(header);
        self.conn = Some(conn);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), ComponentError> {
        debug!(component = %self.name, frames = self.frames, "closing stream writer");
        close(&mut self.conn);
        Ok(())
    }

    fn abort_handle(&self) -> Option<AbortHandle> {
        abort_for(self.conn.as_ref())
    }
}

impl Consumer for StreamWriter {
    fn consume(
        &mut self,
        windows: &[SampleWindow],
        _tick: &TickContext,
    ) -> Result<Option<Event>, ComponentError> {
        let (Some(conn), Some(header)) = (self.conn.as_mut(), self.header.as_ref()) else {
            return Err(ComponentError::Runtime("stream writer is not connected".to_string()));
        };
        let Some(window) = windows.first().map(SampleWindow::fresh) else {
            return Ok(None);
        };
        if window.count == 0 {
            return Ok(None);
        }
        let count = u32::try_from(window.count)
            .map_err(|_| ComponentError::Runtime(format!("window of {} samples", window.count)))?;
        let frame = DataFrame {
            count,
            time_us: window.time_us,
            payload: to_wire_elements(&window.data, header.bytes_per_value, conn.local_order()),
        };
        conn.write_data(header, &frame)?;
        self.frames += 1;
        Ok(None)
    }
}

/// Provides the samples a peer's [`StreamWriter`] sends.
///
/// The format comes from the peer's stream header, read on connect. Each
/// step blocks for one data frame, so the peer paces this provider.
pub struct StreamReader {
    name: String,
    config: ConnectionConfig,
    conn: Option<Connection>,
    header: Option<StreamHeader>,
    format: Option<SampleFormat>,
}

impl StreamReader {
    pub fn new(name: impl Into<String>, config: ConnectionConfig) -> Self {
        Self {
            name: name.into(),
            config,
            conn: None,
            header: None,
            format: None,
        }
    }
}

impl Connectable for StreamReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self, _ctx: &ConnectContext<'_>) -> Result<(), ComponentError> {
        let mut conn = Connection::open(&self.config, Family::Stream)?;
        let header = conn.read_stream_header()?;
        if header.topic != self.config.topic {
            return Err(ComponentError::Protocol(format!(
                "stream header topic '{}' differs from link topic '{}'",
                header.topic, self.config.topic
            )));
        }
        let format = format_from(&header)?;
        info!(
            component = %self.name,
            topic = %header.topic,
            sample_rate = format.sample_rate,
            dim = format.dim,
            sample_type = %format.sample_type,
            "stream header received"
        );
        self.format = Some(format);
        self.header = Some(header);
        self.conn = Some(conn);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), ComponentError> {
        close(&mut self.conn);
        Ok(())
    }

    fn abort_handle(&self) -> Option<AbortHandle> {
        abort_for(self.conn.as_ref())
    }
}

impl Provider for StreamReader {
    fn format(&self) -> Option<SampleFormat> {
        self.format
    }

    fn produce(&mut self, tick: &TickContext) -> Result<SampleBlock, ComponentError> {
        let (Some(conn), Some(header), Some(format)) =
            (self.conn.as_mut(), self.header.as_ref(), self.format)
        else {
            return Err(ComponentError::Runtime("stream reader is not connected".to_string()));
        };
        let frame = conn.read_data(header)?;
        let peer: ByteOrder = conn.peer_order();
        let data = to_wire_elements(&frame.payload, format.bytes_per_value, peer);
        Ok(SampleBlock::new(format, tick.time_us, frame.count, data)?)
    }
}
