//! Recorded sample streams.
//!
//! A recording is a pair of files: an XML [`ReplayHeader`] describing the
//! sample format and recorded chunks, and a raw data file (the header path
//! plus `~`) holding the samples back to back. Element bytes are stored
//! little-endian.

pub mod error;
pub mod header;
pub mod provider;
pub mod recorder;

use bytes::Bytes;

pub use error::{ReplayError, Result};
pub use header::{resolve_paths, Chunk, ReplayHeader, DATA_FILE_SUFFIX};
pub use provider::{FileReplayProvider, ReplayConfig};
pub use recorder::{FileRecorder, RecorderConfig};

/// Convert element bytes between native order and file order.
pub(crate) fn swap_file_order(data: Bytes, width: u32) -> Bytes {
    if cfg!(target_endian = "little") {
        data
    } else {
        sigweave_core::swap_element_order(&data, width as usize)
    }
}
