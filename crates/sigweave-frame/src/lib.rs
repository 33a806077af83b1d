//! Wire codec for sigweave links.
//!
//! A link starts with a fixed-format [`Hello`] from each side that names the
//! topic, the frame family and the byte order the sender uses for every
//! multi-byte field that follows. After the hello, each frame travels in an
//! envelope:
//! - a 2-byte magic number ("SG") for stream synchronization
//! - a 1-byte frame kind
//! - a 4-byte body length in the sender's byte order
//!
//! Bodies are decoded strictly: a body whose inner lengths disagree with the
//! envelope is rejected, never resynchronized.

pub mod codec;
pub mod error;
pub mod hello;
pub mod order;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, DataFrame, EventFrame, EventHeader, Frame, FrameConfig, FrameKind,
    StreamHeader, DEFAULT_MAX_FRAME, HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use hello::{Family, Hello, PROTOCOL_VERSION};
pub use order::ByteOrder;
pub use reader::FrameReader;
pub use writer::FrameWriter;
