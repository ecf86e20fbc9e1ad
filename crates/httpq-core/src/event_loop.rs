//! Host reactor: a `mio` poller that feeds descriptor readiness and timer
//! expiry into the registry's driver step.

use anyhow::{bail, Result};
use mio::unix::SourceFd;
use mio::{event::Event, Events, Interest as MioInterest, Poll, Token};
use std::io;
use std::time::{Duration, Instant};

use crate::config::HttpConfig;
use crate::multiplexer::{CurlMultiplexer, Interest, Multiplexer, Readiness, Socket};
use crate::registry::TransferRegistry;
use crate::transfer::{Outcome, TransferId, TransferOptions};
use crate::watcher::{SocketWatcher, WatchChange};

/// Longest single poll, so `run_until_idle` notices its own deadline.
const MAX_POLL_WAIT: Duration = Duration::from_millis(500);

fn token(socket: Socket) -> Token {
    Token(socket as usize)
}

fn mio_interest(interest: Interest) -> Option<MioInterest> {
    match (interest.read, interest.write) {
        (true, true) => Some(MioInterest::READABLE | MioInterest::WRITABLE),
        (true, false) => Some(MioInterest::READABLE),
        (false, true) => Some(MioInterest::WRITABLE),
        (false, false) => None,
    }
}

fn readiness(event: &Event) -> Readiness {
    Readiness {
        readable: event.is_readable() || event.is_read_closed(),
        writable: event.is_writable() || event.is_write_closed(),
        error: event.is_error(),
    }
}

pub struct EventLoop<M: Multiplexer = CurlMultiplexer> {
    poll: Poll,
    events: Events,
    registry: TransferRegistry<M>,
}

impl EventLoop<CurlMultiplexer> {
    /// Registry over libcurl with `config`.
    pub fn with_curl(config: HttpConfig) -> Result<Self> {
        Self::new(TransferRegistry::new(config, CurlMultiplexer::new())?)
    }
}

impl<M: Multiplexer> EventLoop<M> {
    pub fn new(registry: TransferRegistry<M>) -> Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(256),
            registry,
        })
    }

    pub fn registry(&self) -> &TransferRegistry<M> {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut TransferRegistry<M> {
        &mut self.registry
    }

    pub fn register<F>(&mut self, url: &str, options: TransferOptions, sink: F) -> Result<TransferId>
    where
        F: FnOnce(TransferId, Outcome) + Send + 'static,
    {
        let id = self.registry.register(url, options, sink)?;
        self.sync_watchers()?;
        Ok(id)
    }

    pub fn close(&mut self, id: TransferId) -> Result<bool> {
        let closed = self.registry.close(id)?;
        self.sync_watchers()?;
        Ok(closed)
    }

    /// Wait up to `max_wait` (less if the registry's timer is due sooner) and
    /// dispatch whatever became ready. Returns the number of readiness events.
    pub fn turn(&mut self, max_wait: Duration) -> Result<usize> {
        self.sync_watchers()?;
        self.registry.update_clock();
        let wait = match self.registry.time_until_wakeup() {
            Some(left) => left.min(max_wait),
            None => max_wait,
        };
        if let Err(e) = self.poll.poll(&mut self.events, Some(wait)) {
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(e.into());
        }
        self.registry.update_clock();

        let ready: Vec<(Socket, Readiness)> = self
            .events
            .iter()
            .map(|e| (e.token().0 as Socket, readiness(e)))
            .collect();
        for &(socket, r) in &ready {
            // An earlier step in this batch may have dropped the descriptor.
            if r.is_empty() || self.registry.watcher(socket).is_none() {
                continue;
            }
            self.registry.drive(Some(socket), r)?;
            self.sync_watchers()?;
            self.rearm(socket);
        }
        if self.registry.fire_timer_if_due()? {
            self.sync_watchers()?;
        }
        Ok(ready.len())
    }

    /// Turn until every transfer has finished, or fail after `limit`.
    pub fn run_until_idle(&mut self, limit: Duration) -> Result<()> {
        let deadline = Instant::now() + limit;
        while !self.registry.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                bail!(
                    "{} transfer(s) still outstanding after {:?}",
                    self.registry.len(),
                    limit
                );
            }
            self.turn((deadline - now).min(MAX_POLL_WAIT))?;
        }
        Ok(())
    }

    /// Tear the registry down and drop every descriptor from the poller.
    pub fn shutdown(mut self) -> Vec<TransferId> {
        let cancelled = self.registry.teardown();
        if let Err(e) = self.sync_watchers() {
            tracing::debug!("poller cleanup after shutdown: {}", e);
        }
        cancelled
    }

    fn sync_watchers(&mut self) -> io::Result<()> {
        for change in self.registry.take_watch_changes() {
            match change {
                WatchChange::Added(w) => self.add_source(w)?,
                WatchChange::Modified(w) => match mio_interest(w.interest) {
                    Some(interest) => self.poll.registry().reregister(
                        &mut SourceFd(&w.socket),
                        token(w.socket),
                        interest,
                    )?,
                    None => self.remove_source(w.socket),
                },
                WatchChange::Removed(socket) => self.remove_source(socket),
            }
        }
        Ok(())
    }

    fn add_source(&mut self, w: SocketWatcher) -> io::Result<()> {
        let Some(interest) = mio_interest(w.interest) else {
            return Ok(());
        };
        let registry = self.poll.registry();
        match registry.register(&mut SourceFd(&w.socket), token(w.socket), interest) {
            // Descriptor number reused before the old one was deregistered.
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                registry.reregister(&mut SourceFd(&w.socket), token(w.socket), interest)
            }
            other => other,
        }
    }

    fn remove_source(&mut self, socket: Socket) {
        // The engine may already have closed it.
        if let Err(e) = self.poll.registry().deregister(&mut SourceFd(&socket)) {
            tracing::debug!(socket, "deregister: {}", e);
        }
    }

    /// Re-arm a still-watched descriptor. The poller is edge-triggered; a
    /// modify re-reports readiness the engine did not consume.
    fn rearm(&mut self, socket: Socket) {
        let Some(w) = self.registry.watcher(socket).copied() else {
            return;
        };
        let Some(interest) = mio_interest(w.interest) else {
            return;
        };
        if let Err(e) =
            self.poll
                .registry()
                .reregister(&mut SourceFd(&socket), token(socket), interest)
        {
            tracing::debug!(socket, "rearm: {}", e);
        }
    }
}
