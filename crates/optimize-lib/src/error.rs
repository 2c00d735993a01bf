//! Error kinds shared by every stage of the pipeline

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Credentials are missing or were rejected by the backend
    #[error("credentials rejected: {0}")]
    Credential(String),

    /// No analysis, parameter or record matches the lookup key
    #[error("not found: {0}")]
    NotFound(String),

    /// A record matched but its values are missing, non-positive or non-integer
    #[error("invalid resource spec: {0}")]
    InvalidSpec(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// An external program exited with a non-zero status
    #[error("{program} exited with status {status:?}: {stderr}")]
    Exec {
        program: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("context error: {0}")]
    Context(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("prompt failed: {0}")]
    Prompt(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Errors the rewrite engine traps to fall back to the live cluster spec
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::InvalidSpec(_)
                | Error::Transport(_)
                | Error::Exec { .. }
                | Error::Http(_)
        )
    }

    pub fn is_credential(&self) -> bool {
        matches!(self, Error::Credential(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Parse(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Parse(err.to_string())
    }
}

impl From<inquire::InquireError> for Error {
    fn from(err: inquire::InquireError) -> Self {
        match err {
            inquire::InquireError::OperationCanceled
            | inquire::InquireError::OperationInterrupted => Error::Cancelled,
            other => Error::Prompt(other.to_string()),
        }
    }
}
