use crate::codec::FrameKind;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The envelope or hello contains an invalid magic number.
    #[error("invalid frame magic")]
    InvalidMagic,

    /// The peer speaks a protocol version this build does not.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// The envelope carries a kind byte that is not defined.
    #[error("unknown frame kind {0:#04x}")]
    UnknownKind(u8),

    /// A valid frame arrived where a different kind was required.
    #[error("unexpected {got:?} frame (expected {expected:?})")]
    UnexpectedKind { expected: FrameKind, got: FrameKind },

    /// Lengths declared inside a frame disagree with the bytes present.
    #[error("frame length mismatch (declared {declared} bytes, found {actual})")]
    LengthMismatch { declared: usize, actual: usize },

    /// The frame exceeds the configured maximum size.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A field holds a value outside its domain.
    #[error("invalid field: {0}")]
    InvalidField(String),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the connection between frames.
    #[error("connection closed")]
    ConnectionClosed,

    /// The peer closed the connection in the middle of a frame.
    #[error("connection closed inside a frame ({buffered} bytes buffered)")]
    Truncated { buffered: usize },
}

impl FrameError {
    /// Whether this error is a violation of the wire protocol, as opposed to
    /// a transport failure or an orderly close.
    pub fn is_protocol(&self) -> bool {
        !matches!(self, FrameError::Io(_) | FrameError::ConnectionClosed)
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
