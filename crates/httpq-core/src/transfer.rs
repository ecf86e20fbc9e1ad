//! One HTTP GET and its completion contract.
//!
//! A [`Transfer`] lives in the registry's collection from registration until
//! it reaches a terminal state. The caller keeps only its [`TransferId`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::InternalError;
use crate::multiplexer::{Multiplexer, NativeHandle};

/// Stable key for a registered transfer; doubles as the multiplexer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(u64);

impl TransferId {
    pub(crate) fn new(raw: u64) -> Self {
        TransferId(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub(crate) fn token(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn from_token(token: usize) -> Self {
        TransferId(token as u64)
    }
}

impl From<u64> for TransferId {
    fn from(raw: u64) -> Self {
        TransferId(raw)
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    Created,
    /// Registered, waiting for a free slot.
    Queued,
    /// Attached to the multiplexer.
    Active,
    /// Between a name-resolution failure and the re-attach.
    Retrying,
    Succeeded,
    Failed,
    Cancelled,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferState::Succeeded | TransferState::Failed | TransferState::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    V4,
    V6,
}

/// What the completion sink receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(Vec<u8>),
    /// Transport diagnostic (DNS, connect, TLS, HTTP status).
    Failure(String),
}

/// Called exactly once when a transfer completes. Never called for a
/// transfer that is closed or torn down.
pub type CompletionSink = Box<dyn FnOnce(TransferId, Outcome) + Send>;

/// Per-request options. Everything else comes from [`HttpConfig`](crate::config::HttpConfig).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    pub timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub follow_redirects: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(120)),
            connect_timeout: Some(Duration::from_secs(30)),
            follow_redirects: true,
        }
    }
}

/// Byte counters shared with the native handle's write path.
#[derive(Debug, Default)]
pub struct TransferProgress {
    done: AtomicU64,
    total: AtomicU64,
}

impl TransferProgress {
    pub fn record(&self, done: u64, total: u64) {
        self.done.store(done, Ordering::Relaxed);
        self.total.store(total, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.record(0, 0);
    }

    pub fn snapshot(&self) -> Progress {
        Progress {
            done: self.done.load(Ordering::Relaxed),
            total: self.total.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub done: u64,
    /// Zero until the server announced a length.
    pub total: u64,
}

impl Progress {
    pub fn percent(&self) -> Option<u8> {
        if self.total == 0 {
            return None;
        }
        Some((self.done.min(self.total) * 100 / self.total) as u8)
    }
}

enum Native<H, A> {
    Detached(H),
    Attached(A),
    /// Lost to a failed multiplexer call.
    Gone,
}

pub struct Transfer<M: Multiplexer> {
    id: TransferId,
    url: String,
    state: TransferState,
    family: AddressFamily,
    native: Native<M::Handle, M::Attached>,
    progress: Arc<TransferProgress>,
    sink: Option<CompletionSink>,
}

impl<M: Multiplexer> Transfer<M> {
    pub(crate) fn new(
        id: TransferId,
        url: String,
        handle: M::Handle,
        progress: Arc<TransferProgress>,
        sink: CompletionSink,
    ) -> Self {
        Self {
            id,
            url,
            state: TransferState::Created,
            family: AddressFamily::V4,
            native: Native::Detached(handle),
            progress,
            sink: Some(sink),
        }
    }

    pub fn id(&self) -> TransferId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn progress(&self) -> Progress {
        self.progress.snapshot()
    }

    /// Holds an attached native handle.
    pub fn is_active(&self) -> bool {
        matches!(self.native, Native::Attached(_))
    }

    pub fn is_using_ipv6(&self) -> bool {
        self.family == AddressFamily::V6
    }

    pub(crate) fn mark_queued(&mut self) {
        self.state = TransferState::Queued;
    }

    pub(crate) fn attach(&mut self, multi: &mut M) -> Result<(), InternalError> {
        let handle = match mem::replace(&mut self.native, Native::Gone) {
            Native::Detached(h) => h,
            other => {
                self.native = other;
                return Err(InternalError::MissingHandle(self.id));
            }
        };
        self.native = Native::Attached(multi.add(handle, self.id.token())?);
        self.state = TransferState::Active;
        Ok(())
    }

    pub(crate) fn detach(&mut self, multi: &mut M) -> Result<(), InternalError> {
        let attached = match mem::replace(&mut self.native, Native::Gone) {
            Native::Attached(a) => a,
            other => {
                self.native = other;
                return Err(InternalError::MissingHandle(self.id));
            }
        };
        self.native = Native::Detached(multi.remove(attached)?);
        Ok(())
    }

    /// Switch to the alternate address family and clear the failed attempt.
    /// The handle must be detached; the registry re-attaches it.
    pub(crate) fn retry_ipv6(&mut self) -> Result<(), InternalError> {
        let Native::Detached(handle) = &mut self.native else {
            return Err(InternalError::MissingHandle(self.id));
        };
        handle.reset_attempt();
        handle.set_address_family(AddressFamily::V6)?;
        self.progress.reset();
        self.family = AddressFamily::V6;
        self.state = TransferState::Retrying;
        Ok(())
    }

    pub(crate) fn take_body(&mut self) -> Vec<u8> {
        match &mut self.native {
            Native::Detached(h) => h.take_body(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn trigger_done(&mut self, body: Vec<u8>) -> Result<(), InternalError> {
        self.finish(TransferState::Succeeded, Outcome::Success(body))
    }

    pub(crate) fn trigger_failed(&mut self, message: String) -> Result<(), InternalError> {
        self.finish(TransferState::Failed, Outcome::Failure(message))
    }

    fn finish(&mut self, state: TransferState, outcome: Outcome) -> Result<(), InternalError> {
        let sink = match self.sink.take() {
            Some(sink) if !self.state.is_terminal() => sink,
            _ => {
                return Err(InternalError::AlreadyTerminal {
                    id: self.id,
                    state: self.state,
                })
            }
        };
        self.state = state;
        sink(self.id, outcome);
        Ok(())
    }

    /// Cancellation path: no callback. Does nothing once terminal.
    pub(crate) fn cancel(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.sink = None;
        self.state = TransferState::Cancelled;
    }
}

impl<M: Multiplexer> fmt::Debug for Transfer<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transfer")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("state", &self.state)
            .field("family", &self.family)
            .field("active", &self.is_active())
            .finish()
    }
}
