//! What to do with a finished attempt.
//!
//! The only automatic retry is one address-family fallback after a
//! name-resolution failure. Everything else goes straight to the caller.

use crate::multiplexer::TransferStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionAction {
    /// Re-attach with the alternate address family; no callback.
    RetryAlternateFamily,
    Succeed,
    Fail(String),
}

/// `already_retried` is true once the transfer has used its fallback.
pub fn decide(status: TransferStatus, already_retried: bool) -> CompletionAction {
    match status {
        TransferStatus::Ok => CompletionAction::Succeed,
        TransferStatus::ResolveFailed(_) if !already_retried => {
            CompletionAction::RetryAlternateFamily
        }
        TransferStatus::ResolveFailed(message) | TransferStatus::Failed(message) => {
            CompletionAction::Fail(message)
        }
    }
}
