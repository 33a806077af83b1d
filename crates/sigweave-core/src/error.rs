use std::sync::Arc;

use crate::pipeline::PipelineState;

/// Errors raised when describing or packing sample data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SampleError {
    /// The sample format violates one of its invariants.
    #[error("invalid sample format: {0}")]
    InvalidFormat(String),

    /// The payload does not hold `count` whole samples.
    #[error("payload is {actual} bytes, expected {expected}")]
    PayloadMismatch { expected: usize, actual: usize },

    /// The element type cannot be converted to or from numbers.
    #[error("sample type {0} has no numeric representation")]
    NotNumeric(&'static str),
}

/// Outcomes of a buffer read or write other than success.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    /// The requested window has not been written yet.
    #[error("samples not ready")]
    NotReady,

    /// Unread samples were overwritten; the cursor now sits at the write position.
    #[error("reader overrun, {lost} samples lost")]
    Overrun { lost: u64 },

    /// The buffer was closed.
    #[error("buffer closed")]
    Closed,

    /// A block's format differs from the buffer's.
    #[error("block format does not match buffer format")]
    FormatMismatch,

    /// The request can never be satisfied by this buffer.
    #[error("invalid buffer request: {0}")]
    InvalidRequest(String),
}

/// Errors raised by an event channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    /// The event's timestamp precedes the last pushed event.
    #[error("event at {got}us precedes last event at {last}us")]
    OutOfOrder { last: i64, got: i64 },

    /// Listeners can no longer attach.
    #[error("event channel is sealed")]
    Sealed,

    /// The channel was closed.
    #[error("event channel closed")]
    Closed,

    /// The listener id was not issued by this channel.
    #[error("unknown listener {0}")]
    UnknownListener(usize),
}

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Errors a pipeline component reports from `connect`, its step or `disconnect`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ComponentError {
    /// The component could not be set up and is excluded from the run.
    #[error("setup failed: {0}")]
    Setup(String),

    /// A step failed; the component's loop stops.
    #[error("runtime failure: {0}")]
    Runtime(String),

    /// The peer violated the wire protocol or the handshake was refused.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(Arc<std::io::Error>),

    /// The component has no more data; its loop ends without failing.
    #[error("end of stream")]
    EndOfStream,

    #[error(transparent)]
    Sample(#[from] SampleError),

    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error(transparent)]
    Event(#[from] EventError),
}

impl From<std::io::Error> for ComponentError {
    fn from(err: std::io::Error) -> Self {
        ComponentError::Transport(Arc::new(err))
    }
}

/// Errors returned by the pipeline controller itself.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The requested lifecycle transition is not allowed from the current state.
    #[error("invalid pipeline transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: PipelineState,
        to: PipelineState,
    },

    /// Components and channels can only be registered before start.
    #[error("pipeline is {0:?}; registration is closed")]
    RegistrationClosed(PipelineState),

    /// The stream id was not issued by this pipeline.
    #[error("unknown stream {0}")]
    UnknownStream(usize),

    /// The consumer id was not issued by this pipeline.
    #[error("unknown consumer {0}")]
    UnknownConsumer(usize),

    /// The channel id was not issued by this pipeline.
    #[error("unknown event channel {0}")]
    UnknownChannel(usize),

    /// The consumer already produces an event channel.
    #[error("consumer {0} already has an event channel")]
    DuplicateChannel(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Event(#[from] EventError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
