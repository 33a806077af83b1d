use std::fmt;
use std::io;

use sigweave::assembly::AssemblyError;
use sigweave::engine::PipelineError;
use sigweave::replay::ReplayError;

pub const SUCCESS: i32 = 0;
/// The pipeline ran but at least one component failed.
pub const FAILURE: i32 = 1;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const NOT_FOUND: i32 = 66;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: &io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::NotFound => NOT_FOUND,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn assembly_error(context: &str, err: AssemblyError) -> CliError {
    match &err {
        AssemblyError::Io { source, .. } => {
            let mut out = io_error(context, source);
            out.message = format!("{context}: {err}");
            out
        }
        AssemblyError::Pipeline(inner) if !matches!(inner, PipelineError::Config(_)) => {
            pipeline_error(context, err.to_string())
        }
        _ => CliError::new(DATA_INVALID, format!("{context}: {err}")),
    }
}

pub fn replay_error(context: &str, err: ReplayError) -> CliError {
    match &err {
        ReplayError::Io { source, .. } => {
            let mut out = io_error(context, source);
            out.message = format!("{context}: {err}");
            out
        }
        _ => CliError::new(DATA_INVALID, format!("{context}: {err}")),
    }
}

pub fn pipeline_error(context: &str, err: impl fmt::Display) -> CliError {
    CliError::new(INTERNAL, format!("{context}: {err}"))
}
