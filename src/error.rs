use std::time::Duration;
use thiserror::Error;

/// Errors returned by the transport, workflow, client and runner layers.
#[derive(Error, Debug)]
pub enum ComfyError {
    /// The TCP connection to ComfyUI could not be opened.
    #[error("Could not connect to {addr}: {source}")]
    Connection {
        addr: String,
        source: std::io::Error,
    },

    /// Malformed HTTP response or a JSON body missing an expected field.
    #[error("{0}")]
    Protocol(String),

    /// ComfyUI returned a non-success HTTP status where one was not allowed.
    #[error("HTTP {status} for {path}: {body}")]
    Http {
        status: u16,
        path: String,
        body: String,
    },

    /// The queued workflow was rejected with node-level errors.
    #[error("Workflow node errors: {0}")]
    NodeErrors(String),

    /// Missing workflow node, empty prompt, bad host/port and similar setup problems.
    #[error("{0}")]
    Config(String),

    /// Gave up waiting for a result.
    #[error("Timed out after {0:?} waiting for result")]
    Timeout(Duration),

    /// Cancellation was requested while waiting.
    #[error("Cancelled by user")]
    Cancelled,

    /// File read/write failure with context.
    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ComfyError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ComfyError::Io {
            context: context.into(),
            source,
        }
    }

    /// True when this error is the result of a user cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ComfyError::Cancelled)
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ComfyError>;
