//! Non-blocking HTTP GETs for a BitTorrent client: tracker announces and
//! remote metadata, multiplexed over one socket-event reactor.

pub mod checksum;
pub mod config;
pub mod error;
#[cfg(unix)]
pub mod event_loop;
pub mod logging;
pub mod multiplexer;
pub mod registry;
pub mod retry;
pub mod snapshot;
pub mod timer;
pub mod transfer;
pub mod watcher;

pub use config::HttpConfig;
pub use error::{HttpError, InternalError, MultiplexerError};
#[cfg(unix)]
pub use event_loop::EventLoop;
pub use multiplexer::{CurlMultiplexer, Readiness};
pub use registry::TransferRegistry;
pub use transfer::{Outcome, Progress, TransferId, TransferOptions, TransferState};
