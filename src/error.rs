use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("corrupt state: {0}")]
    CorruptState(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("lock on {address} held by {owner}")]
    LockHeld { address: String, owner: String },
    #[error("http error: {0}")]
    Http(String),
    #[error("image error: {0}")]
    Image(String),
    #[error("phase blocked: {0}")]
    Blocked(String),
    #[error("no sources available")]
    NoSources,
    #[error("collaborator not configured: {0}")]
    NotConfigured(&'static str),
}

impl PipelineError {
    /// Process exit code for the CLI. Corrupt state and missing sources get
    /// dedicated codes so batch schedulers can tell them apart from ordinary
    /// per-property failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::CorruptState(_) => 2,
            PipelineError::NoSources => 3,
            _ => 1,
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

impl From<csv::Error> for PipelineError {
    fn from(err: csv::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::Http(err.to_string())
    }
}

impl From<image::ImageError> for PipelineError {
    fn from(err: image::ImageError) -> Self {
        PipelineError::Image(err.to_string())
    }
}
