use sigweave_core::ComponentError;
use sigweave_frame::{Family, FrameError};
use sigweave_transport::TransportError;

/// Errors that can occur on a link.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The peer announced a different topic.
    #[error("topic mismatch: local '{local}', peer '{remote}'")]
    TopicMismatch { local: String, remote: String },

    /// The peer wants to carry a different frame family.
    #[error("frame family mismatch: local {local:?}, peer {remote:?}")]
    FamilyMismatch { local: Family, remote: Family },

    /// A header or payload cannot be mapped onto pipeline types.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The link configuration is unusable.
    #[error("invalid link configuration: {0}")]
    InvalidConfig(String),

    /// The connection was already closed locally.
    #[error("connection is closed")]
    Closed,
}

impl LinkError {
    /// Whether the peer violated the protocol or refused the handshake.
    pub fn is_protocol(&self) -> bool {
        match self {
            LinkError::Frame(err) => err.is_protocol(),
            LinkError::TopicMismatch { .. }
            | LinkError::FamilyMismatch { .. }
            | LinkError::InvalidPayload(_) => true,
            _ => false,
        }
    }
}

impl From<LinkError> for ComponentError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::Frame(FrameError::ConnectionClosed) => ComponentError::EndOfStream,
            LinkError::Frame(FrameError::Io(io)) => io.into(),
            LinkError::Transport(TransportError::Io(io) | TransportError::Accept(io)) => io.into(),
            err if err.is_protocol() => ComponentError::Protocol(err.to_string()),
            LinkError::Transport(err) => {
                std::io::Error::other(err.to_string()).into()
            }
            LinkError::InvalidConfig(msg) => ComponentError::Setup(msg),
            other => ComponentError::Runtime(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
