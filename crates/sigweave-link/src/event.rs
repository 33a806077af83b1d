//! Pipeline components that mirror an event channel over a link.

use std::sync::Arc;

use sigweave_core::{
    AbortHandle, ComponentError, Connectable, ConnectContext, Consumer, Event, PipelineContext,
    SampleWindow, TickContext,
};
use sigweave_frame::{EventHeader, Family};
use tracing::{debug, info};

use crate::connection::{Connection, ConnectionConfig};
use crate::convert::{event_from_frame, event_to_frame};

fn abort_for(conn: Option<&Connection>) -> Option<AbortHandle> {
    let handle = conn?.shutdown_handle().ok()?;
    Some(AbortHandle::new(move || handle.shutdown()))
}

/// Forwards every event it listens to over the link.
///
/// Register it without inputs and bind it to channels with
/// `Pipeline::listen`; it never consumes windows.
pub struct EventWriter {
    name: String,
    config: ConnectionConfig,
    conn: Option<Connection>,
    sent: u64,
}

impl EventWriter {
    pub fn new(name: impl Into<String>, config: ConnectionConfig) -> Self {
        Self {
            name: name.into(),
            config,
            conn: None,
            sent: 0,
        }
    }

    pub fn events_sent(&self) -> u64 {
        self.sent
    }
}

impl Connectable for EventWriter {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self, _ctx: &ConnectContext<'_>) -> Result<(), ComponentError> {
        let mut conn = Connection::open(&self.config, Family::Event)?;
        conn.write_event_header(&EventHeader {
            topic: self.config.topic.clone(),
        })?;
        self.conn = Some(conn);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), ComponentError> {
        debug!(component = %self.name, events = self.sent, "closing event writer");
        if let Some(mut conn) = self.conn.take() {
            conn.close();
        }
        Ok(())
    }

    fn abort_handle(&self) -> Option<AbortHandle> {
        abort_for(self.conn.as_ref())
    }
}

impl Consumer for EventWriter {
    fn listen(&mut self, event: &Event) -> Result<(), ComponentError> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(ComponentError::Runtime("event writer is not connected".to_string()));
        };
        let frame = event_to_frame(event, conn.local_order());
        conn.write_event(&frame)?;
        self.sent += 1;
        Ok(())
    }

    fn consume(
        &mut self,
        _windows: &[SampleWindow],
        _tick: &TickContext,
    ) -> Result<Option<Event>, ComponentError> {
        Ok(None)
    }
}

/// Maps peer event times onto the local pipeline clock.
///
/// The first event fixes the offset between the two clocks, so later events
/// keep the spacing the peer gave them. A stamp never runs ahead of the local
/// clock and never runs backwards.
#[derive(Debug, Default)]
struct PeerClock {
    offset_us: Option<i64>,
    last_us: Option<i64>,
}

impl PeerClock {
    fn stamp(&mut self, peer_us: i64, now_us: i64) -> i64 {
        let offset = *self
            .offset_us
            .get_or_insert_with(|| now_us.saturating_sub(peer_us));
        let mut stamp = peer_us.saturating_add(offset).min(now_us);
        if let Some(last) = self.last_us {
            stamp = stamp.max(last);
        }
        self.last_us = Some(stamp);
        stamp
    }
}

/// Emits the events a peer's [`EventWriter`] sends.
///
/// Register it without inputs together with an event channel. Each step
/// blocks for one event. Received events keep their sender, duration and
/// payload. Their times are moved onto the local pipeline clock, keeping the
/// peer's spacing between events.
pub struct EventReader {
    name: String,
    config: ConnectionConfig,
    conn: Option<Connection>,
    pipeline: Option<Arc<PipelineContext>>,
    clock: PeerClock,
}

impl EventReader {
    pub fn new(name: impl Into<String>, config: ConnectionConfig) -> Self {
        Self {
            name: name.into(),
            config,
            conn: None,
            pipeline: None,
            clock: PeerClock::default(),
        }
    }
}

impl Connectable for EventReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self, ctx: &ConnectContext<'_>) -> Result<(), ComponentError> {
        let mut conn = Connection::open(&self.config, Family::Event)?;
        let header = conn.read_event_header()?;
        if header.topic != self.config.topic {
            return Err(ComponentError::Protocol(format!(
                "event header topic '{}' differs from link topic '{}'",
                header.topic, self.config.topic
            )));
        }
        info!(component = %self.name, topic = %header.topic, "event header received");
        self.pipeline = Some(Arc::clone(ctx.pipeline));
        self.conn = Some(conn);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), ComponentError> {
        if let Some(mut conn) = self.conn.take() {
            conn.close();
        }
        Ok(())
    }

    fn abort_handle(&self) -> Option<AbortHandle> {
        abort_for(self.conn.as_ref())
    }
}

impl Consumer for EventReader {
    /// Block for one event. Peer times are relative to the peer's own start,
    /// so the reader shifts them by the clock offset seen at the first
    /// event. Intervals between events survive; absolute peer times do not.
    fn consume(
        &mut self,
        _windows: &[SampleWindow],
        _tick: &TickContext,
    ) -> Result<Option<Event>, ComponentError> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(ComponentError::Runtime("event reader is not connected".to_string()));
        };
        let frame = conn.read_event()?;
        let mut event = event_from_frame(frame, conn.peer_order())?;
        let peer_us = event.time_us;
        let now = self
            .pipeline
            .as_ref()
            .map_or(peer_us, |ctx| ctx.elapsed_us());
        event.time_us = self.clock.stamp(peer_us, now);
        debug!(
            component = %self.name,
            sender = %event.sender,
            peer_us,
            local_us = event.time_us,
            "event received"
        );
        Ok(Some(event))
    }
}
