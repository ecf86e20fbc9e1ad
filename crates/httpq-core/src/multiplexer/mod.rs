//! Seam between the registry and the socket-multiplexing HTTP engine.
//!
//! The production engine is libcurl's multi socket-action interface
//! ([`CurlMultiplexer`]). The registry only sees the operations below, which
//! keeps admission control and the retry policy testable without a network.

mod curl_multi;
#[cfg(test)]
pub(crate) mod scripted;

pub use curl_multi::{Collector, CurlHandle, CurlMultiplexer};

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use crate::config::HttpConfig;
use crate::error::MultiplexerError;
use crate::transfer::{AddressFamily, TransferOptions, TransferProgress};

/// OS descriptor handed out by the engine.
pub type Socket = curl::multi::Socket;

/// Readiness reported by the host reactor for one descriptor.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

impl Readiness {
    pub const NONE: Readiness = Readiness {
        readable: false,
        writable: false,
        error: false,
    };

    pub fn is_empty(&self) -> bool {
        !(self.readable || self.writable || self.error)
    }
}

/// What the engine wants to hear about a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    pub const READ: Interest = Interest {
        read: true,
        write: false,
    };
    pub const WRITE: Interest = Interest {
        read: false,
        write: true,
    };
    pub const BOTH: Interest = Interest {
        read: true,
        write: true,
    };
}

/// Requests the engine makes through the hooks installed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    /// Start (or change) watching a descriptor.
    Watch { socket: Socket, interest: Interest },
    /// Stop watching a descriptor.
    Unwatch(Socket),
    /// Re-arm the wakeup `Some(after)` from now, or cancel it with `None`.
    Timeout(Option<Duration>),
}

/// Sending half of the hook channel. Cloned into the engine's callbacks; the
/// registry drains the receiving half after every engine call.
#[derive(Debug, Clone)]
pub struct HookSender(mpsc::Sender<HookEvent>);

impl HookSender {
    pub fn channel() -> (HookSender, mpsc::Receiver<HookEvent>) {
        let (tx, rx) = mpsc::channel();
        (HookSender(tx), rx)
    }

    pub fn watch(&self, socket: Socket, interest: Interest) {
        self.send(HookEvent::Watch { socket, interest });
    }

    pub fn unwatch(&self, socket: Socket) {
        self.send(HookEvent::Unwatch(socket));
    }

    pub fn timeout(&self, after: Option<Duration>) {
        self.send(HookEvent::Timeout(after));
    }

    fn send(&self, event: HookEvent) {
        // The receiver only goes away with the registry, after the engine.
        if self.0.send(event).is_err() {
            tracing::debug!(?event, "hook event dropped: registry gone");
        }
    }
}

/// Result of one perform-work call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerformStatus {
    /// Handles the engine still considers running, when it reported a count.
    pub running: Option<usize>,
    /// The engine asked to be called again right away.
    pub call_again: bool,
}

/// Terminal status of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    Ok,
    /// Host name could not be resolved.
    ResolveFailed(String),
    /// Any other transport or HTTP failure, with the engine's diagnostic.
    Failed(String),
}

/// One entry from the engine's completion queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Done { token: usize, status: TransferStatus },
    /// Anything that is not a "transfer done" message.
    Other { token: Option<usize> },
}

/// A per-request handle while detached from the engine.
pub trait NativeHandle: Send {
    /// Apply registry-wide settings before the first attach.
    fn apply_config(&mut self, config: &HttpConfig) -> Result<(), MultiplexerError>;

    fn set_address_family(&mut self, family: AddressFamily) -> Result<(), MultiplexerError>;

    /// Drop whatever the previous attempt received.
    fn reset_attempt(&mut self);

    fn take_body(&mut self) -> Vec<u8>;
}

pub trait Multiplexer {
    type Handle: NativeHandle;
    /// Handle while owned by the engine; turned back into `Handle` by `remove`.
    type Attached;

    /// Install the socket-watch and timeout hooks. Called once by the registry.
    fn install_hooks(&mut self, hooks: HookSender) -> Result<(), MultiplexerError>;

    fn create_handle(
        &self,
        url: &str,
        options: &TransferOptions,
        progress: Arc<TransferProgress>,
    ) -> Result<Self::Handle, MultiplexerError>;

    /// Attach a handle; `token` comes back in its completion message.
    fn add(&mut self, handle: Self::Handle, token: usize)
        -> Result<Self::Attached, MultiplexerError>;

    fn remove(&mut self, attached: Self::Attached) -> Result<Self::Handle, MultiplexerError>;

    /// Do pending work for `socket`, or for expired timers when `None`.
    fn perform(
        &mut self,
        socket: Option<Socket>,
        readiness: Readiness,
    ) -> Result<PerformStatus, MultiplexerError>;

    fn next_message(&mut self) -> Option<Message>;

    /// Global minimum next-wakeup hint; `None` when the engine has no deadline.
    fn recommended_timeout(&mut self) -> Result<Option<Duration>, MultiplexerError>;
}
