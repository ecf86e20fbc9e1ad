//! Error types for the transfer scheduler.
//!
//! Transport failures never show up here: they are delivered to the caller
//! through [`Outcome::Failure`](crate::transfer::Outcome). These types cover
//! bad caller input and broken internal bookkeeping.

use thiserror::Error;

use crate::transfer::{TransferId, TransferState};

/// A multiplexer call returned a fatal status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("multiplexer {op} failed: {message}")]
pub struct MultiplexerError {
    pub op: &'static str,
    pub message: String,
}

impl MultiplexerError {
    pub fn new(op: &'static str, message: impl Into<String>) -> Self {
        Self {
            op,
            message: message.into(),
        }
    }
}

/// Bookkeeping diverged from the multiplexer. The registry refuses to run on
/// after one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InternalError {
    #[error(transparent)]
    Multiplexer(#[from] MultiplexerError),

    #[error("completion message for unknown transfer {0}")]
    UnknownTransfer(TransferId),

    #[error("unexpected multiplexer message for token {0}")]
    UnexpectedMessage(usize),

    #[error("transfer {id} triggered in state {state:?}")]
    AlreadyTerminal { id: TransferId, state: TransferState },

    #[error("transfer {0} has no native handle")]
    MissingHandle(TransferId),
}

/// Errors returned by registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpError {
    /// The request could not be turned into a native handle. The registry is unaffected.
    #[error("invalid request for {url}: {message}")]
    InvalidRequest { url: String, message: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unrecoverable; the registry is poisoned and every later call fails the same way.
    #[error("internal error: {0}")]
    Internal(#[from] InternalError),
}

impl HttpError {
    pub fn invalid(url: &str, message: impl Into<String>) -> Self {
        HttpError::InvalidRequest {
            url: url.to_string(),
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, HttpError::Internal(_))
    }
}

impl From<MultiplexerError> for HttpError {
    fn from(e: MultiplexerError) -> Self {
        HttpError::Internal(InternalError::Multiplexer(e))
    }
}

pub type Result<T, E = HttpError> = std::result::Result<T, E>;
