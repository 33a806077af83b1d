use std::path::PathBuf;

use sigweave_core::{ComponentError, SampleError};

/// Errors reading or writing recorded stream files.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// A header or data file could not be accessed.
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The header is not well-formed XML.
    #[error("malformed header: {0}")]
    Xml(String),

    /// A required element is absent from the header.
    #[error("header has no <{0}> element")]
    MissingElement(&'static str),

    /// A required attribute is absent.
    #[error("<{element}> has no '{attribute}' attribute")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },

    /// An attribute value cannot be parsed.
    #[error("invalid {attribute}=\"{value}\"")]
    InvalidAttribute {
        attribute: &'static str,
        value: String,
    },

    /// Only binary data files are supported.
    #[error("unsupported file type '{0}'")]
    UnsupportedFileType(String),

    /// The data file holds fewer bytes than the header announces.
    #[error("data file holds {actual} bytes, header announces {expected}")]
    Truncated { expected: u64, actual: u64 },

    #[error(transparent)]
    Format(#[from] SampleError),
}

impl ReplayError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| ReplayError::Io { path, source }
    }
}

impl From<ReplayError> for ComponentError {
    fn from(err: ReplayError) -> Self {
        match err {
            ReplayError::Io { source, .. } => source.into(),
            ReplayError::Format(err) => err.into(),
            other => ComponentError::Setup(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReplayError>;
