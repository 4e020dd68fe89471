//! Error types for the central system core

use thiserror::Error;

use crate::types::FailureReason;

/// Failure of a persistence collaborator
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Caller-contract violations on command submission
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("command needs at least one target station")]
    EmptyTargets,

    #[error("station {0} listed more than once")]
    DuplicateTarget(String),

    #[error("malformed command: {0}")]
    MalformedCommand(String),
}

/// Per-target delivery failure reported by the transport
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("station not connected")]
    NotConnected,

    #[error("timeout waiting for reply")]
    Timeout,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("station replied with {code}: {description}")]
    Remote { code: String, description: String },

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<DeliveryError> for FailureReason {
    fn from(err: DeliveryError) -> Self {
        match err {
            DeliveryError::NotConnected => FailureReason::NotConnected,
            DeliveryError::Timeout => FailureReason::Timeout,
            DeliveryError::ConnectionClosed => FailureReason::ConnectionClosed,
            DeliveryError::Remote { code, description } => {
                FailureReason::Remote { code, description }
            }
            DeliveryError::Transport(message) => FailureReason::Transport { message },
        }
    }
}

/// Top-level error for core operations
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

pub type CoreResult<T> = Result<T, CoreError>;
