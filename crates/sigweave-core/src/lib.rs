//! Rate-decoupled buffering and scheduling engine for sigweave pipelines.
//!
//! Providers write timestamped [`SampleBlock`]s into a per-provider
//! [`SampleBuffer`]; consumers read fixed windows from those buffers on their
//! own cadence and may emit [`Event`]s into an [`EventChannel`]. The
//! [`Pipeline`] controller connects, schedules, isolates and stops them.

pub mod buffer;
pub mod component;
pub mod config;
pub mod error;
pub mod event;
pub mod pipeline;
pub mod sample;
pub mod schedule;

pub use buffer::{ReadCursor, SampleBuffer};
pub use component::{
    AbortHandle, Connectable, ConnectContext, Consumer, PipelineContext, Provider,
};
pub use config::{ConsumerConfig, PipelineConfig, ProviderConfig};
pub use error::{
    BufferError, ComponentError, ConfigError, EventError, PipelineError, Result, SampleError,
};
pub use event::{Delivery, Event, EventChannel, EventPayload, ListenerId};
pub use pipeline::{
    ChannelId, ComponentFailure, ComponentKind, ComponentState, ComponentStatus, ConsumerId,
    LoopSummary, Phase, Pipeline, PipelineState, SampleLoss, StartReport, StopReport, StreamId,
};
pub use sample::{swap_element_order, SampleBlock, SampleFormat, SampleType, SampleWindow};
pub use schedule::{TickClock, TickContext, TickStats};
