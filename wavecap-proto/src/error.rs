use thiserror::Error;

use crate::wire::FrameError;

/// Errors surfaced by the protocol layer and the control loop.
#[derive(Error, Debug)]
pub enum ProtoError {
    #[error("I/O error on control channel during {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed frame: {0}")]
    Frame(#[from] FrameError),

    #[error("Failed to encode message: {0}")]
    Encode(String),

    #[error("Failed to decode message: {0}")]
    Decode(String),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Failed to start capture thread: {0}")]
    CaptureThread(std::io::Error),

    #[error("Invalid source definition: {0}")]
    Definition(String),
}

pub type Result<T> = std::result::Result<T, ProtoError>;

impl ProtoError {
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }
}
