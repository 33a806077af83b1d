//! The pipeline controller.
//!
//! A [`Pipeline`] owns every registered provider and consumer. `start()`
//! connects them in registration order, creates one [`SampleBuffer`] per
//! provider and runs each component on its own thread against the shared
//! tick grid. `stop()` interrupts and joins the loops and disconnects
//! everything. Failures never cross components: a failing component is
//! marked failed, recorded and left behind while the rest keep running.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::buffer::{ReadCursor, SampleBuffer};
use crate::component::{AbortHandle, ConnectContext, Consumer, PipelineContext, Provider};
use crate::config::{ConsumerConfig, PipelineConfig, ProviderConfig};
use crate::error::{BufferError, ComponentError, EventError, PipelineError, Result};
use crate::event::{EventChannel, ListenerId};
use crate::sample::{SampleFormat, SampleWindow};
use crate::schedule::{TickClock, TickContext, TickStats};

/// Identifies a provider and its buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(usize);

/// Identifies a registered consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(usize);

/// Identifies an event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(usize);

macro_rules! index_accessor {
    ($($id:ident),*) => {
        $(impl $id {
            pub fn index(&self) -> usize {
                self.0
            }
        })*
    };
}

index_accessor!(StreamId, ConsumerId, ChannelId);

/// Lifecycle of a pipeline. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl PipelineState {
    fn next(self) -> Option<PipelineState> {
        match self {
            PipelineState::Created => Some(PipelineState::Starting),
            PipelineState::Starting => Some(PipelineState::Running),
            PipelineState::Running => Some(PipelineState::Stopping),
            PipelineState::Stopping => Some(PipelineState::Stopped),
            PipelineState::Stopped => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Provider,
    Consumer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    /// Registered, not running yet.
    Registered,
    Running,
    Failed,
    /// The component reported end of stream.
    Finished,
    Stopped,
}

/// Where in a component's life a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Setup,
    Runtime,
    Teardown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Setup => "setup",
            Phase::Runtime => "runtime",
            Phase::Teardown => "teardown",
        })
    }
}

/// A failure recorded by the controller.
#[derive(Debug, Clone)]
pub struct ComponentFailure {
    pub component: String,
    pub phase: Phase,
    pub error: ComponentError,
}

/// Current status of one component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentStatus {
    pub name: String,
    pub kind: ComponentKind,
    pub state: ComponentState,
}

/// Outcome of [`Pipeline::start`].
#[derive(Debug, Clone, Default)]
pub struct StartReport {
    /// Components that reached the running state.
    pub running: Vec<String>,
    /// Components excluded during setup.
    pub failures: Vec<ComponentFailure>,
}

impl StartReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Timing summary of one component loop.
#[derive(Debug, Clone)]
pub struct LoopSummary {
    pub component: String,
    pub state: ComponentState,
    pub stats: TickStats,
    pub loss: SampleLoss,
}

/// Input samples a consumer loop skipped because its provider overwrote them
/// before they were read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleLoss {
    pub overruns: u64,
    pub samples: u64,
}

impl SampleLoss {
    fn record(&mut self, lost: u64) {
        self.overruns += 1;
        self.samples += lost;
    }
}

/// Outcome of [`Pipeline::stop`].
#[derive(Debug, Clone, Default)]
pub struct StopReport {
    pub loops: Vec<LoopSummary>,
    /// Every failure recorded over the pipeline's life.
    pub failures: Vec<ComponentFailure>,
}

struct Status {
    name: String,
    kind: ComponentKind,
    state: Mutex<ComponentState>,
    failures: Arc<Mutex<Vec<ComponentFailure>>>,
}

impl Status {
    fn get(&self) -> ComponentState {
        *self.state.lock()
    }

    fn set(&self, state: ComponentState) {
        *self.state.lock() = state;
    }

    fn fail(&self, phase: Phase, error: ComponentError) {
        self.set(ComponentState::Failed);
        self.record(phase, error);
    }

    fn record(&self, phase: Phase, error: ComponentError) {
        tracing::error!(component = %self.name, %phase, error = %error, "component failed");
        self.failures.lock().push(ComponentFailure {
            component: self.name.clone(),
            phase,
            error,
        });
    }

    /// Classify the error that ended a loop. Once a stop is underway every
    /// error, end of stream included, leaves the component to be marked stopped.
    fn end(&self, error: ComponentError, context: &PipelineContext) {
        match error {
            _ if context.is_stopping() => {
                tracing::debug!(component = %self.name, error = %error, "loop interrupted by stop");
            }
            ComponentError::EndOfStream => {
                tracing::info!(component = %self.name, "component finished");
                self.set(ComponentState::Finished);
            }
            error => self.fail(Phase::Runtime, error),
        }
    }
}

struct LoopExit<C> {
    component: C,
    stats: TickStats,
    loss: SampleLoss,
}

struct ProviderSlot {
    status: Arc<Status>,
    config: ProviderConfig,
    component: Option<Box<dyn Provider>>,
    buffer: Option<Arc<SampleBuffer>>,
    abort: Option<AbortHandle>,
    thread: Option<JoinHandle<LoopExit<Box<dyn Provider>>>>,
}

struct ConsumerSlot {
    status: Arc<Status>,
    config: ConsumerConfig,
    component: Option<Box<dyn Consumer>>,
    inputs: Vec<StreamId>,
    /// Frame and delta in samples, per input, computed at connect.
    windows: Vec<(usize, usize)>,
    listens: Vec<(ChannelId, ListenerId)>,
    output: Option<ChannelId>,
    abort: Option<AbortHandle>,
    thread: Option<JoinHandle<LoopExit<Box<dyn Consumer>>>>,
}

#[derive(Debug, Clone, Copy)]
enum Registered {
    Provider(usize),
    Consumer(usize),
}

/// A set of providers, consumers and event channels run as one unit.
pub struct Pipeline {
    config: PipelineConfig,
    context: Arc<PipelineContext>,
    state: PipelineState,
    providers: Vec<ProviderSlot>,
    consumers: Vec<ConsumerSlot>,
    channels: Vec<Arc<EventChannel>>,
    order: Vec<Registered>,
    failures: Arc<Mutex<Vec<ComponentFailure>>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("state", &self.state)
            .field("providers", &self.providers.len())
            .field("consumers", &self.consumers.len())
            .field("channels", &self.channels.len())
            .finish()
    }
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            context: Arc::new(PipelineContext::new()),
            state: PipelineState::Created,
            providers: Vec::new(),
            consumers: Vec::new(),
            channels: Vec::new(),
            order: Vec::new(),
            failures: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.context
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn status(&self, name: &str, kind: ComponentKind) -> Arc<Status> {
        Arc::new(Status {
            name: name.to_string(),
            kind,
            state: Mutex::new(ComponentState::Registered),
            failures: Arc::clone(&self.failures),
        })
    }

    fn ensure_registering(&self) -> Result<()> {
        if self.state != PipelineState::Created {
            return Err(PipelineError::RegistrationClosed(self.state));
        }
        Ok(())
    }

    /// Register a provider. Its buffer is created when the pipeline starts.
    pub fn add_provider(
        &mut self,
        provider: Box<dyn Provider>,
        config: ProviderConfig,
    ) -> Result<StreamId> {
        self.ensure_registering()?;
        config.validate()?;
        let status = self.status(provider.name(), ComponentKind::Provider);
        let id = self.providers.len();
        self.providers.push(ProviderSlot {
            status,
            config,
            component: Some(provider),
            buffer: None,
            abort: None,
            thread: None,
        });
        self.order.push(Registered::Provider(id));
        Ok(StreamId(id))
    }

    /// Register a consumer reading one window per input on every tick.
    pub fn add_consumer(
        &mut self,
        consumer: Box<dyn Consumer>,
        inputs: &[StreamId],
        config: ConsumerConfig,
    ) -> Result<ConsumerId> {
        self.ensure_registering()?;
        config.validate()?;
        if let Some(bad) = inputs.iter().find(|id| id.0 >= self.providers.len()) {
            return Err(PipelineError::UnknownStream(bad.0));
        }
        let status = self.status(consumer.name(), ComponentKind::Consumer);
        let id = self.consumers.len();
        self.consumers.push(ConsumerSlot {
            status,
            config,
            component: Some(consumer),
            inputs: inputs.to_vec(),
            windows: Vec::new(),
            listens: Vec::new(),
            output: None,
            abort: None,
            thread: None,
        });
        self.order.push(Registered::Consumer(id));
        Ok(ConsumerId(id))
    }

    /// Create the event channel fed by the events `producer` returns.
    pub fn register_event_channel(&mut self, producer: ConsumerId) -> Result<ChannelId> {
        self.ensure_registering()?;
        let capacity = self.config.event_history;
        let slot = self
            .consumers
            .get_mut(producer.0)
            .ok_or(PipelineError::UnknownConsumer(producer.0))?;
        if slot.output.is_some() {
            return Err(PipelineError::DuplicateChannel(slot.status.name.clone()));
        }
        let id = ChannelId(self.channels.len());
        self.channels
            .push(Arc::new(EventChannel::new(slot.status.name.clone(), capacity)));
        slot.output = Some(id);
        Ok(id)
    }

    /// Deliver every event of `channel` to `consumer`.
    pub fn listen(&mut self, consumer: ConsumerId, channel: ChannelId) -> Result<()> {
        self.ensure_registering()?;
        let events = self
            .channels
            .get(channel.0)
            .ok_or(PipelineError::UnknownChannel(channel.0))?;
        let slot = self
            .consumers
            .get_mut(consumer.0)
            .ok_or(PipelineError::UnknownConsumer(consumer.0))?;
        let listener = events.attach()?;
        slot.listens.push((channel, listener));
        Ok(())
    }

    /// The buffer of a provider, once the pipeline has started.
    pub fn buffer(&self, stream: StreamId) -> Option<Arc<SampleBuffer>> {
        self.providers.get(stream.0)?.buffer.clone()
    }

    pub fn channel(&self, channel: ChannelId) -> Option<Arc<EventChannel>> {
        self.channels.get(channel.0).cloned()
    }

    /// Every failure recorded so far.
    pub fn failures(&self) -> Vec<ComponentFailure> {
        self.failures.lock().clone()
    }

    /// Status of every component in registration order.
    pub fn statuses(&self) -> Vec<ComponentStatus> {
        self.order
            .iter()
            .map(|entry| {
                let status = match *entry {
                    Registered::Provider(i) => &self.providers[i].status,
                    Registered::Consumer(i) => &self.consumers[i].status,
                };
                ComponentStatus {
                    name: status.name.clone(),
                    kind: status.kind,
                    state: status.get(),
                }
            })
            .collect()
    }

    /// Number of components whose loop is still running.
    pub fn active(&self) -> usize {
        self.statuses()
            .iter()
            .filter(|s| s.state == ComponentState::Running)
            .count()
    }

    fn transition(&mut self, to: PipelineState) -> Result<()> {
        if self.state.next() != Some(to) {
            return Err(PipelineError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        tracing::debug!(from = ?self.state, to = ?to, "pipeline transition");
        self.state = to;
        Ok(())
    }

    /// Connect every component, then run each one that connected on its own thread.
    ///
    /// Setup failures exclude only the failing component (and consumers of
    /// its stream); they are returned in the report, not as an error.
    pub fn start(&mut self) -> Result<StartReport> {
        self.transition(PipelineState::Starting)?;
        tracing::info!(
            providers = self.providers.len(),
            consumers = self.consumers.len(),
            channels = self.channels.len(),
            "starting pipeline"
        );

        for i in 0..self.order.len() {
            match self.order[i] {
                Registered::Provider(p) => self.connect_provider(p),
                Registered::Consumer(c) => self.connect_consumer(c),
            }
        }
        for channel in &self.channels {
            channel.seal();
        }

        let t0 = self.context.mark_started(Instant::now());
        for i in 0..self.order.len() {
            match self.order[i] {
                Registered::Provider(p) => self.spawn_provider(p, t0),
                Registered::Consumer(c) => self.spawn_consumer(c, t0),
            }
        }
        self.transition(PipelineState::Running)?;

        let report = StartReport {
            running: self
                .statuses()
                .into_iter()
                .filter(|s| s.state == ComponentState::Running)
                .map(|s| s.name)
                .collect(),
            failures: self.failures(),
        };
        tracing::info!(
            running = report.running.len(),
            failed = report.failures.len(),
            "pipeline running"
        );
        Ok(report)
    }

    fn connect_provider(&mut self, index: usize) {
        let context = &self.context;
        let buffer_seconds = self.config.buffer_seconds;
        let slot = &mut self.providers[index];
        let Some(component) = slot.component.as_mut() else {
            return;
        };

        let ctx = ConnectContext {
            pipeline: context,
            inputs: &[],
        };
        if let Err(err) = component.connect(&ctx) {
            slot.status.fail(Phase::Setup, err);
            return;
        }

        let Some(format) = component.format() else {
            slot.status.fail(
                Phase::Setup,
                ComponentError::Setup("sample format unknown after connect".to_string()),
            );
            return;
        };
        if let Err(err) = format.validate() {
            slot.status.fail(Phase::Setup, err.into());
            return;
        }
        match SampleBuffer::with_duration(format, buffer_seconds) {
            Ok(buffer) => {
                tracing::debug!(
                    component = %slot.status.name,
                    sample_rate = format.sample_rate,
                    dim = format.dim,
                    capacity = buffer.capacity(),
                    "provider connected"
                );
                slot.buffer = Some(Arc::new(buffer));
            }
            Err(err) => {
                slot.status.fail(Phase::Setup, err.into());
                return;
            }
        }
        slot.abort = component.abort_handle();
    }

    fn connect_consumer(&mut self, index: usize) {
        let context = &self.context;
        let providers = &self.providers;
        let slot = &mut self.consumers[index];
        if slot.component.is_none() {
            return;
        }

        let mut formats: Vec<SampleFormat> = Vec::with_capacity(slot.inputs.len());
        let mut windows = Vec::with_capacity(slot.inputs.len());
        for input in &slot.inputs {
            let upstream = &providers[input.0];
            let Some(buffer) = upstream.buffer.as_ref() else {
                slot.status.fail(
                    Phase::Setup,
                    ComponentError::Setup(format!("input unavailable: {}", upstream.status.name)),
                );
                return;
            };
            let format = *buffer.format();
            let frame = format.samples_for(slot.config.frame_seconds).max(1);
            let delta = format.samples_for(slot.config.delta_seconds);
            if frame + delta > buffer.capacity() {
                slot.status.fail(
                    Phase::Setup,
                    ComponentError::Setup(format!(
                        "window of {} samples exceeds the {} sample buffer of {}",
                        frame + delta,
                        buffer.capacity(),
                        upstream.status.name
                    )),
                );
                return;
            }
            formats.push(format);
            windows.push((frame, delta));
        }

        let ctx = ConnectContext {
            pipeline: context,
            inputs: &formats,
        };
        let Some(component) = slot.component.as_mut() else {
            return;
        };
        if let Err(err) = component.connect(&ctx) {
            slot.status.fail(Phase::Setup, err);
            return;
        }
        tracing::debug!(component = %slot.status.name, inputs = formats.len(), "consumer connected");
        slot.windows = windows;
        slot.abort = component.abort_handle();
    }

    fn spawn_provider(&mut self, index: usize, t0: Instant) {
        let context = Arc::clone(&self.context);
        let slot = &mut self.providers[index];
        if slot.status.get() != ComponentState::Registered {
            return;
        }
        let Some(buffer) = slot.buffer.clone() else {
            return;
        };
        let Some(component) = slot.component.take() else {
            return;
        };

        let status = Arc::clone(&slot.status);
        let period = slot.config.period();
        status.set(ComponentState::Running);
        let spawned = thread::Builder::new()
            .name(format!("sigweave-{}", status.name))
            .spawn(move || run_provider(component, buffer, status, context, t0, period));
        match spawned {
            Ok(handle) => slot.thread = Some(handle),
            Err(err) => slot.status.fail(Phase::Setup, err.into()),
        }
    }

    fn spawn_consumer(&mut self, index: usize, t0: Instant) {
        let context = Arc::clone(&self.context);
        let providers = &self.providers;
        let channels = &self.channels;
        let slot = &mut self.consumers[index];
        if slot.status.get() != ComponentState::Registered {
            return;
        }

        let mut inputs = Vec::with_capacity(slot.inputs.len());
        for (stream, &(frame, delta)) in slot.inputs.iter().zip(&slot.windows) {
            let Some(buffer) = providers[stream.0].buffer.clone() else {
                return;
            };
            inputs.push(Input {
                cursor: buffer.cursor(),
                buffer,
                frame,
                delta,
            });
        }
        let wiring = Wiring {
            inputs,
            listens: slot
                .listens
                .iter()
                .map(|(channel, listener)| (Arc::clone(&channels[channel.0]), *listener))
                .collect(),
            output: slot.output.map(|id| Arc::clone(&channels[id.0])),
            loss: SampleLoss::default(),
        };
        let Some(component) = slot.component.take() else {
            return;
        };

        let status = Arc::clone(&slot.status);
        let period = slot.config.period();
        status.set(ComponentState::Running);
        let spawned = thread::Builder::new()
            .name(format!("sigweave-{}", status.name))
            .spawn(move || run_consumer(component, wiring, status, context, t0, period));
        match spawned {
            Ok(handle) => slot.thread = Some(handle),
            Err(err) => slot.status.fail(Phase::Setup, err.into()),
        }
    }

    /// Stop every loop, then disconnect every component.
    pub fn stop(&mut self) -> Result<StopReport> {
        self.transition(PipelineState::Stopping)?;
        tracing::info!("stopping pipeline");

        self.context.request_stop();
        for slot in &self.providers {
            if let Some(buffer) = &slot.buffer {
                buffer.close();
            }
        }
        for channel in &self.channels {
            channel.close();
        }
        let aborts = self
            .providers
            .iter()
            .map(|s| &s.abort)
            .chain(self.consumers.iter().map(|s| &s.abort));
        for abort in aborts.flatten() {
            abort.abort();
        }

        let mut loops = Vec::new();
        for slot in &mut self.providers {
            if let Some(handle) = slot.thread.take() {
                if let Some(exit) = join_loop(handle, &slot.status, &mut loops) {
                    slot.component = Some(exit);
                }
            }
        }
        for slot in &mut self.consumers {
            if let Some(handle) = slot.thread.take() {
                if let Some(exit) = join_loop(handle, &slot.status, &mut loops) {
                    slot.component = Some(exit);
                }
            }
        }

        for i in 0..self.order.len() {
            let (status, result) = match self.order[i] {
                Registered::Provider(p) => {
                    let slot = &mut self.providers[p];
                    (&slot.status, slot.component.as_mut().map(|p| p.disconnect()))
                }
                Registered::Consumer(c) => {
                    let slot = &mut self.consumers[c];
                    (&slot.status, slot.component.as_mut().map(|c| c.disconnect()))
                }
            };
            if let Some(Err(err)) = result {
                status.record(Phase::Teardown, err);
            }
        }

        self.transition(PipelineState::Stopped)?;
        let report = StopReport {
            loops,
            failures: self.failures(),
        };
        tracing::info!(failures = report.failures.len(), "pipeline stopped");
        Ok(report)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.state == PipelineState::Running {
            if let Err(err) = self.stop() {
                tracing::warn!(error = %err, "failed to stop pipeline on drop");
            }
        }
    }
}

fn join_loop<C>(
    handle: JoinHandle<LoopExit<C>>,
    status: &Status,
    loops: &mut Vec<LoopSummary>,
) -> Option<C> {
    match handle.join() {
        Ok(exit) => {
            if status.get() == ComponentState::Running {
                status.set(ComponentState::Stopped);
            }
            loops.push(LoopSummary {
                component: status.name.clone(),
                state: status.get(),
                stats: exit.stats,
                loss: exit.loss,
            });
            Some(exit.component)
        }
        Err(_) => {
            status.fail(
                Phase::Runtime,
                ComponentError::Runtime("component loop panicked".to_string()),
            );
            None
        }
    }
}

fn log_loop_exit(status: &Status, stats: &TickStats) {
    tracing::info!(
        component = %status.name,
        ticks = stats.ticks,
        late_ticks = stats.late_ticks,
        max_lateness_us = stats.max_lateness.as_micros() as u64,
        "component loop exited"
    );
}

fn run_provider(
    mut component: Box<dyn Provider>,
    buffer: Arc<SampleBuffer>,
    status: Arc<Status>,
    context: Arc<PipelineContext>,
    t0: Instant,
    period: Duration,
) -> LoopExit<Box<dyn Provider>> {
    let mut clock = TickClock::new(t0, period);
    while let Some(tick) = clock.wait_next(context.stop_flag()) {
        let step = component
            .produce(&tick)
            .and_then(|block| buffer.write(&block).map_err(ComponentError::from));
        if let Err(err) = step {
            status.end(err, &context);
            break;
        }
    }
    let stats = clock.stats();
    log_loop_exit(&status, &stats);
    LoopExit {
        component,
        stats,
        loss: SampleLoss::default(),
    }
}

struct Input {
    buffer: Arc<SampleBuffer>,
    cursor: ReadCursor,
    frame: usize,
    delta: usize,
}

struct Wiring {
    inputs: Vec<Input>,
    listens: Vec<(Arc<EventChannel>, ListenerId)>,
    output: Option<Arc<EventChannel>>,
    loss: SampleLoss,
}

impl Wiring {
    /// Read one window per input. Cursors only move when every read succeeds,
    /// except that an overrun always resynchronizes its own cursor.
    fn read_inputs(&mut self, wait: Duration) -> std::result::Result<Option<Vec<SampleWindow>>, ComponentError> {
        let mut windows = Vec::with_capacity(self.inputs.len());
        let mut cursors = Vec::with_capacity(self.inputs.len());
        for input in &mut self.inputs {
            let mut cursor = input.cursor;
            match input
                .buffer
                .read_window(&mut cursor, input.frame, input.delta, wait)
            {
                Ok(window) => {
                    windows.push(window);
                    cursors.push(cursor);
                }
                Err(BufferError::NotReady) => return Ok(None),
                Err(BufferError::Overrun { lost }) => {
                    self.loss.record(lost);
                    input.cursor = cursor;
                    return Ok(None);
                }
                Err(err) => return Err(err.into()),
            }
        }
        for (input, cursor) in self.inputs.iter_mut().zip(cursors) {
            input.cursor = cursor;
        }
        Ok(Some(windows))
    }
}

fn consumer_step(
    component: &mut dyn Consumer,
    wiring: &mut Wiring,
    tick: &TickContext,
    consumes: bool,
) -> std::result::Result<(), ComponentError> {
    for (channel, listener) in &wiring.listens {
        while let Some(delivery) = channel.poll(*listener, Duration::ZERO)? {
            component.listen(&delivery.event)?;
        }
    }
    if !consumes {
        return Ok(());
    }

    let windows = if wiring.inputs.is_empty() {
        Vec::new()
    } else {
        match wiring.read_inputs(tick.period)? {
            Some(windows) => windows,
            None => return Ok(()),
        }
    };

    let Some(event) = component.consume(&windows, tick)? else {
        return Ok(());
    };
    match &wiring.output {
        Some(channel) => match channel.push(event) {
            Ok(()) => Ok(()),
            Err(EventError::OutOfOrder { last, got }) => {
                tracing::warn!(
                    channel = channel.name(),
                    last,
                    got,
                    "dropping out-of-order event"
                );
                Ok(())
            }
            Err(err) => Err(err.into()),
        },
        None => {
            tracing::trace!(sender = %event.sender, "event dropped, no channel registered");
            Ok(())
        }
    }
}

fn run_consumer(
    mut component: Box<dyn Consumer>,
    mut wiring: Wiring,
    status: Arc<Status>,
    context: Arc<PipelineContext>,
    t0: Instant,
    period: Duration,
) -> LoopExit<Box<dyn Consumer>> {
    // Pure listeners are driven by their channels; everything else consumes each tick.
    let consumes = !wiring.inputs.is_empty() || wiring.listens.is_empty();
    let mut clock = TickClock::new(t0, period);
    while let Some(tick) = clock.wait_next(context.stop_flag()) {
        if let Err(err) = consumer_step(component.as_mut(), &mut wiring, &tick, consumes) {
            status.end(err, &context);
            break;
        }
    }
    let stats = clock.stats();
    log_loop_exit(&status, &stats);
    if wiring.loss.overruns > 0 {
        tracing::warn!(
            component = %status.name,
            overruns = wiring.loss.overruns,
            samples_lost = wiring.loss.samples,
            "consumer lost input samples"
        );
    }
    LoopExit {
        component,
        stats,
        loss: wiring.loss,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    use super::*;
    use crate::event::{Event, EventPayload};
    use crate::sample::{SampleBlock, SampleType};

    #[derive(Default)]
    struct Tally {
        connects: AtomicUsize,
        disconnects: AtomicUsize,
        produced: AtomicUsize,
        windows: AtomicUsize,
        events: AtomicUsize,
    }

    impl Tally {
        fn get(counter: &AtomicUsize) -> usize {
            counter.load(Ordering::SeqCst)
        }
    }

    fn format() -> SampleFormat {
        SampleFormat::of(100.0, 1, SampleType::Float).unwrap()
    }

    struct TestProvider {
        name: String,
        tally: Arc<Tally>,
        fail_connect: bool,
        fail_at: Option<u64>,
        end_at: Option<u64>,
    }

    impl TestProvider {
        fn new(name: &str, tally: &Arc<Tally>) -> Self {
            Self {
                name: name.to_string(),
                tally: Arc::clone(tally),
                fail_connect: false,
                fail_at: None,
                end_at: None,
            }
        }
    }

    impl crate::component::Connectable for TestProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn connect(&mut self, _ctx: &ConnectContext<'_>) -> std::result::Result<(), ComponentError> {
            self.tally.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect {
                return Err(ComponentError::Setup("sensor missing".to_string()));
            }
            Ok(())
        }

        fn disconnect(&mut self) -> std::result::Result<(), ComponentError> {
            self.tally.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Provider for TestProvider {
        fn format(&self) -> Option<SampleFormat> {
            Some(format())
        }

        fn produce(&mut self, tick: &TickContext) -> std::result::Result<SampleBlock, ComponentError> {
            if self.fail_at == Some(tick.index) {
                return Err(ComponentError::Runtime("sensor unplugged".to_string()));
            }
            if self.end_at == Some(tick.index) {
                return Err(ComponentError::EndOfStream);
            }
            self.tally.produced.fetch_add(1, Ordering::SeqCst);
            let v = tick.index as f64;
            Ok(SampleBlock::from_values(format(), tick.time_us, &[v, v])?)
        }
    }

    struct TestConsumer {
        name: String,
        tally: Arc<Tally>,
        emit: bool,
        stall: Duration,
    }

    impl TestConsumer {
        fn new(name: &str, tally: &Arc<Tally>) -> Self {
            Self {
                name: name.to_string(),
                tally: Arc::clone(tally),
                emit: false,
                stall: Duration::ZERO,
            }
        }
    }

    impl crate::component::Connectable for TestConsumer {
        fn name(&self) -> &str {
            &self.name
        }

        fn connect(&mut self, _ctx: &ConnectContext<'_>) -> std::result::Result<(), ComponentError> {
            self.tally.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn disconnect(&mut self) -> std::result::Result<(), ComponentError> {
            self.tally.disconnects.fetch_add(1, Ordering::SeqCst);
            Err(ComponentError::Runtime("flush failed".to_string()))
        }
    }

    impl Consumer for TestConsumer {
        fn listen(&mut self, _event: &Event) -> std::result::Result<(), ComponentError> {
            self.tally.events.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn consume(
            &mut self,
            windows: &[SampleWindow],
            tick: &TickContext,
        ) -> std::result::Result<Option<Event>, ComponentError> {
            self.tally.windows.fetch_add(windows.len(), Ordering::SeqCst);
            thread::sleep(self.stall);
            if !self.emit {
                return Ok(None);
            }
            let means = windows[0].mean()?;
            Ok(Some(Event::new(
                &self.name,
                tick.time_us,
                0,
                EventPayload::Floats(means.into_iter().map(|m| m as f32).collect()),
            )))
        }
    }

    fn fast_provider() -> ProviderConfig {
        ProviderConfig {
            period_seconds: 0.02,
        }
    }

    fn fast_consumer() -> ConsumerConfig {
        ConsumerConfig {
            frame_seconds: 0.02,
            delta_seconds: 0.0,
        }
    }

    fn wait_until(mut check: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !check() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn lifecycle_transitions_are_enforced() {
        let mut pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        assert!(matches!(
            pipeline.stop(),
            Err(PipelineError::InvalidTransition {
                from: PipelineState::Created,
                to: PipelineState::Stopping
            })
        ));

        pipeline.start().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Running);
        assert!(matches!(
            pipeline.start(),
            Err(PipelineError::InvalidTransition { .. })
        ));

        let tally = Arc::new(Tally::default());
        assert!(matches!(
            pipeline.add_provider(Box::new(TestProvider::new("late", &tally)), fast_provider()),
            Err(PipelineError::RegistrationClosed(PipelineState::Running))
        ));

        pipeline.stop().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert!(pipeline.stop().is_err());
    }

    #[test]
    fn registration_validates_ids_and_config() {
        let mut pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        let tally = Arc::new(Tally::default());
        assert!(matches!(
            pipeline.add_consumer(
                Box::new(TestConsumer::new("c", &tally)),
                &[StreamId(3)],
                fast_consumer()
            ),
            Err(PipelineError::UnknownStream(3))
        ));
        assert!(matches!(
            pipeline.add_provider(
                Box::new(TestProvider::new("p", &tally)),
                ProviderConfig { period_seconds: 0.0 }
            ),
            Err(PipelineError::Config(_))
        ));
        assert!(matches!(
            pipeline.add_provider(
                Box::new(TestProvider::new("p", &tally)),
                ProviderConfig {
                    period_seconds: 1e30
                }
            ),
            Err(PipelineError::Config(_))
        ));
        assert!(matches!(
            pipeline.add_consumer(
                Box::new(TestConsumer::new("c", &tally)),
                &[],
                ConsumerConfig {
                    frame_seconds: 1e30,
                    delta_seconds: 0.0,
                }
            ),
            Err(PipelineError::Config(_))
        ));
        assert!(matches!(
            pipeline.register_event_channel(ConsumerId(0)),
            Err(PipelineError::UnknownConsumer(0))
        ));

        let c = pipeline
            .add_consumer(Box::new(TestConsumer::new("c", &tally)), &[], fast_consumer())
            .unwrap();
        pipeline.register_event_channel(c).unwrap();
        assert!(matches!(
            pipeline.register_event_channel(c),
            Err(PipelineError::DuplicateChannel(_))
        ));
        assert!(Pipeline::new(PipelineConfig {
            buffer_seconds: -1.0,
            ..PipelineConfig::default()
        })
        .is_err());
    }

    #[test]
    fn setup_failure_is_isolated() {
        let tally = Arc::new(Tally::default());
        let mut pipeline = Pipeline::new(PipelineConfig::default()).unwrap();

        let mut broken = TestProvider::new("broken", &tally);
        broken.fail_connect = true;
        let bad = pipeline.add_provider(Box::new(broken), fast_provider()).unwrap();
        let good = pipeline
            .add_provider(Box::new(TestProvider::new("good", &tally)), fast_provider())
            .unwrap();
        let healthy = Arc::new(Tally::default());
        pipeline
            .add_consumer(Box::new(TestConsumer::new("orphan", &tally)), &[bad], fast_consumer())
            .unwrap();
        pipeline
            .add_consumer(Box::new(TestConsumer::new("reader", &healthy)), &[good], fast_consumer())
            .unwrap();

        let report = pipeline.start().unwrap();
        assert_eq!(report.running, vec!["good".to_string(), "reader".to_string()]);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].component, "broken");
        assert_eq!(report.failures[0].phase, Phase::Setup);
        assert_eq!(report.failures[1].component, "orphan");
        assert!(report.failures[1]
            .error
            .to_string()
            .contains("input unavailable: broken"));
        assert!(pipeline.buffer(bad).is_none());

        wait_until(|| Tally::get(&healthy.windows) >= 3);
        assert!(Tally::get(&healthy.windows) >= 3);

        let stop = pipeline.stop().unwrap();
        assert_eq!(stop.loops.len(), 2);
        // orphan never connected; broken, good and both consumers' disconnect all ran
        assert_eq!(Tally::get(&tally.connects), 2);
        assert_eq!(Tally::get(&tally.disconnects), 3);
        assert_eq!(Tally::get(&healthy.disconnects), 1);
        assert!(stop
            .failures
            .iter()
            .any(|f| f.phase == Phase::Teardown && f.component == "reader"));
    }

    #[test]
    fn runtime_failure_stops_only_that_component() {
        let tally = Arc::new(Tally::default());
        let mut pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        let mut flaky = TestProvider::new("flaky", &tally);
        flaky.fail_at = Some(2);
        pipeline.add_provider(Box::new(flaky), fast_provider()).unwrap();
        let steady_tally = Arc::new(Tally::default());
        pipeline
            .add_provider(Box::new(TestProvider::new("steady", &steady_tally)), fast_provider())
            .unwrap();

        pipeline.start().unwrap();
        wait_until(|| Tally::get(&steady_tally.produced) >= 6);

        let statuses = pipeline.statuses();
        assert_eq!(statuses[0].state, ComponentState::Failed);
        assert_eq!(statuses[1].state, ComponentState::Running);
        assert_eq!(Tally::get(&tally.produced), 2);
        let failures = pipeline.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].phase, Phase::Runtime);
        pipeline.stop().unwrap();
    }

    #[test]
    fn end_of_stream_finishes_without_failure() {
        let tally = Arc::new(Tally::default());
        let mut pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        let mut short = TestProvider::new("short", &tally);
        short.end_at = Some(1);
        pipeline.add_provider(Box::new(short), fast_provider()).unwrap();
        pipeline.start().unwrap();

        wait_until(|| pipeline.active() == 0);
        assert_eq!(pipeline.statuses()[0].state, ComponentState::Finished);
        let report = pipeline.stop().unwrap();
        assert!(report.failures.is_empty());
        assert_eq!(report.loops[0].state, ComponentState::Finished);
    }

    #[test]
    fn slow_consumer_reports_lost_samples() {
        let tally = Arc::new(Tally::default());
        let mut pipeline = Pipeline::new(PipelineConfig {
            buffer_seconds: 0.1,
            ..PipelineConfig::default()
        })
        .unwrap();
        let stream = pipeline
            .add_provider(Box::new(TestProvider::new("p", &tally)), fast_provider())
            .unwrap();
        let mut slow = TestConsumer::new("slow", &tally);
        slow.stall = Duration::from_millis(150);
        pipeline
            .add_consumer(Box::new(slow), &[stream], fast_consumer())
            .unwrap();
        let keeping_up = Arc::new(Tally::default());
        pipeline
            .add_consumer(
                Box::new(TestConsumer::new("quick", &keeping_up)),
                &[stream],
                fast_consumer(),
            )
            .unwrap();

        pipeline.start().unwrap();
        thread::sleep(Duration::from_millis(700));
        let report = pipeline.stop().unwrap();

        let slow = report.loops.iter().find(|l| l.component == "slow").unwrap();
        assert!(slow.loss.overruns >= 1);
        assert!(slow.loss.samples >= slow.loss.overruns);
        let provider = report.loops.iter().find(|l| l.component == "p").unwrap();
        assert_eq!(provider.loss, SampleLoss::default());
    }

    #[test]
    fn events_flow_from_producer_to_listener() {
        let tally = Arc::new(Tally::default());
        let mut pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        let stream = pipeline
            .add_provider(Box::new(TestProvider::new("p", &tally)), fast_provider())
            .unwrap();
        let mut emitter = TestConsumer::new("mean", &tally);
        emitter.emit = true;
        let producer = pipeline
            .add_consumer(Box::new(emitter), &[stream], fast_consumer())
            .unwrap();
        let channel = pipeline.register_event_channel(producer).unwrap();

        let listener_tally = Arc::new(Tally::default());
        let listener = pipeline
            .add_consumer(
                Box::new(TestConsumer::new("logger", &listener_tally)),
                &[],
                fast_consumer(),
            )
            .unwrap();
        pipeline.listen(listener, channel).unwrap();

        pipeline.start().unwrap();
        assert!(pipeline.channel(channel).unwrap().attach().is_err());
        wait_until(|| Tally::get(&listener_tally.events) >= 3);
        pipeline.stop().unwrap();

        assert!(Tally::get(&listener_tally.events) >= 3);
        // a pure listener is never asked to consume
        assert_eq!(Tally::get(&listener_tally.windows), 0);
    }

    struct BlockingProvider {
        wake: mpsc::Sender<()>,
        wait: mpsc::Receiver<()>,
        /// Report end of stream instead of a transport error once woken.
        ends: bool,
    }

    impl BlockingProvider {
        fn new(ends: bool) -> Self {
            let (wake, wait) = mpsc::channel();
            Self { wake, wait, ends }
        }
    }

    impl crate::component::Connectable for BlockingProvider {
        fn name(&self) -> &str {
            "blocking"
        }

        fn connect(&mut self, _ctx: &ConnectContext<'_>) -> std::result::Result<(), ComponentError> {
            Ok(())
        }

        fn abort_handle(&self) -> Option<AbortHandle> {
            let wake = self.wake.clone();
            Some(AbortHandle::new(move || {
                let _ = wake.send(());
            }))
        }
    }

    impl Provider for BlockingProvider {
        fn format(&self) -> Option<SampleFormat> {
            Some(format())
        }

        fn produce(&mut self, _tick: &TickContext) -> std::result::Result<SampleBlock, ComponentError> {
            let _ = self.wait.recv();
            if self.ends {
                return Err(ComponentError::EndOfStream);
            }
            Err(ComponentError::Transport(Arc::new(std::io::Error::from(
                std::io::ErrorKind::ConnectionAborted,
            ))))
        }
    }

    #[test]
    fn stop_fires_abort_handles_and_drop_stops() {
        let tally = Arc::new(Tally::default());
        {
            let mut pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
            pipeline
                .add_provider(Box::new(BlockingProvider::new(false)), fast_provider())
                .unwrap();
            pipeline
                .add_provider(Box::new(TestProvider::new("p", &tally)), fast_provider())
                .unwrap();
            pipeline.start().unwrap();
            thread::sleep(Duration::from_millis(50));
        }
        assert_eq!(Tally::get(&tally.disconnects), 1);
    }

    #[test]
    fn blocked_component_interrupted_by_stop_is_not_a_failure() {
        let mut pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        pipeline
            .add_provider(Box::new(BlockingProvider::new(false)), fast_provider())
            .unwrap();
        pipeline.start().unwrap();
        thread::sleep(Duration::from_millis(30));
        let report = pipeline.stop().unwrap();
        assert!(report.failures.is_empty());
        assert_eq!(report.loops[0].state, ComponentState::Stopped);
    }

    #[test]
    fn end_of_stream_caused_by_stop_counts_as_stopped() {
        let mut pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        pipeline
            .add_provider(Box::new(BlockingProvider::new(true)), fast_provider())
            .unwrap();
        pipeline.start().unwrap();
        thread::sleep(Duration::from_millis(30));
        let report = pipeline.stop().unwrap();
        assert!(report.failures.is_empty());
        assert_eq!(report.loops[0].state, ComponentState::Stopped);
        assert_eq!(pipeline.statuses()[0].state, ComponentState::Stopped);
    }

    #[test]
    fn oversized_window_fails_setup() {
        let tally = Arc::new(Tally::default());
        let mut pipeline = Pipeline::new(PipelineConfig {
            buffer_seconds: 0.1,
            ..PipelineConfig::default()
        })
        .unwrap();
        let stream = pipeline
            .add_provider(Box::new(TestProvider::new("p", &tally)), fast_provider())
            .unwrap();
        pipeline
            .add_consumer(
                Box::new(TestConsumer::new("wide", &tally)),
                &[stream],
                ConsumerConfig {
                    frame_seconds: 1.0,
                    delta_seconds: 0.0,
                },
            )
            .unwrap();
        let report = pipeline.start().unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].component, "wide");
        pipeline.stop().unwrap();
    }
}
