//! Rate-decoupled sensor pipelines.
//!
//! sigweave connects providers that produce timestamped sample blocks at a
//! fixed rate with consumers that read fixed windows of those samples on
//! their own cadence and may emit events. Streams and event channels can be
//! mirrored between pipelines over point-to-point links and recorded to or
//! replayed from files.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP and Unix domain socket endpoints
//! - [`frame`]: Wire codec for stream and event links
//! - [`engine`]: Sample buffers, event channels, scheduling and the pipeline controller
//! - [`link`]: Link components (behind `link` feature)
//! - [`replay`]: Recorded stream files (behind `replay` feature)
//! - [`demo`]: Synthetic components for trying pipelines out
//! - [`assembly`]: Pipelines described in JSON

pub mod assembly;
pub mod demo;

/// Re-export transport types.
pub mod transport {
    pub use sigweave_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use sigweave_frame::*;
}

/// Re-export pipeline engine types.
pub mod engine {
    pub use sigweave_core::*;
}

/// Re-export link types (requires `link` feature).
#[cfg(feature = "link")]
pub mod link {
    pub use sigweave_link::*;
}

/// Re-export replay types (requires `replay` feature).
#[cfg(feature = "replay")]
pub mod replay {
    pub use sigweave_replay::*;
}
