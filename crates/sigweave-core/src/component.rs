//! Capability traits implemented by pipeline components.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use crate::error::ComponentError;
use crate::event::Event;
use crate::sample::{SampleBlock, SampleFormat, SampleWindow};
use crate::schedule::TickContext;

/// Pipeline-wide state shared explicitly with every component.
#[derive(Debug, Default)]
pub struct PipelineContext {
    start: OnceLock<Instant>,
    stopping: AtomicBool,
}

impl PipelineContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// The global start instant, once the pipeline is running.
    pub fn start_instant(&self) -> Option<Instant> {
        self.start.get().copied()
    }

    /// Microseconds since the pipeline started (zero before).
    pub fn elapsed_us(&self) -> i64 {
        self.start_instant()
            .map(|t0| i64::try_from(t0.elapsed().as_micros()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    pub(crate) fn stop_flag(&self) -> &AtomicBool {
        &self.stopping
    }

    pub(crate) fn mark_started(&self, at: Instant) -> Instant {
        *self.start.get_or_init(|| at)
    }

    pub(crate) fn request_stop(&self) {
        self.stopping.store(true, Ordering::Release);
    }
}

/// What a component learns when it is connected.
#[derive(Debug, Clone, Copy)]
pub struct ConnectContext<'a> {
    pub pipeline: &'a Arc<PipelineContext>,
    /// Formats of the consumer's bound inputs, in binding order.
    pub inputs: &'a [SampleFormat],
}

/// Forcibly interrupts a component blocked in I/O.
pub struct AbortHandle(Box<dyn Fn() + Send + Sync>);

impl AbortHandle {
    pub fn new(f: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Box::new(f))
    }

    pub fn abort(&self) {
        (self.0)()
    }
}

impl fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AbortHandle")
    }
}

/// Lifecycle shared by providers and consumers.
pub trait Connectable: Send {
    fn name(&self) -> &str;

    /// Acquire resources. Called once, in registration order, before the run.
    fn connect(&mut self, ctx: &ConnectContext<'_>) -> Result<(), ComponentError>;

    /// Release resources. Called once after the loops stop, even after failures.
    fn disconnect(&mut self) -> Result<(), ComponentError> {
        Ok(())
    }

    /// A handle that unblocks this component's step from another thread.
    fn abort_handle(&self) -> Option<AbortHandle> {
        None
    }
}

/// Produces timestamped sample blocks into its buffer.
pub trait Provider: Connectable {
    /// Format of every block, known at the latest after `connect`.
    fn format(&self) -> Option<SampleFormat>;

    fn produce(&mut self, tick: &TickContext) -> Result<SampleBlock, ComponentError>;
}

/// Reads sample windows and events at its own rate, optionally emitting events.
pub trait Consumer: Connectable {
    /// Receive one event from a channel this consumer listens to.
    fn listen(&mut self, _event: &Event) -> Result<(), ComponentError> {
        Ok(())
    }

    /// Process one window per bound input.
    fn consume(
        &mut self,
        windows: &[SampleWindow],
        tick: &TickContext,
    ) -> Result<Option<Event>, ComponentError>;
}
