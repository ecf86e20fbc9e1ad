//! Transfer registry: admission control over one multiplexer.
//!
//! At most `max_active` transfers hold an attached native handle; the rest
//! wait in arrival order and are promoted one at a time as slots free up.
//! All operations take `&mut self`, so entry is serialized by construction.

mod drive;

use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use url::Url;

use crate::config::HttpConfig;
use crate::error::{HttpError, InternalError, Result};
use crate::multiplexer::{HookEvent, HookSender, Multiplexer, NativeHandle, Socket};
use crate::snapshot::TransferSnapshot;
use crate::timer::{CachedClock, TimerTask, FALLBACK_TIMEOUT};
use crate::transfer::{
    CompletionSink, Outcome, Progress, Transfer, TransferId, TransferOptions, TransferProgress,
    TransferState,
};
use crate::watcher::{SocketWatcher, WatchChange, WatcherTable};

pub struct TransferRegistry<M: Multiplexer> {
    config: HttpConfig,
    multi: M,
    /// Arrival order.
    transfers: Vec<Transfer<M>>,
    next_id: u64,
    active: usize,
    timer: TimerTask,
    clock: CachedClock,
    watchers: WatcherTable,
    hooks: mpsc::Receiver<HookEvent>,
    poisoned: Option<InternalError>,
    torn_down: bool,
}

impl<M: Multiplexer> TransferRegistry<M> {
    /// Validate `config` and install the watch/timeout hooks on `multi`.
    pub fn new(config: HttpConfig, mut multi: M) -> Result<Self> {
        config
            .validate()
            .map_err(|e| HttpError::InvalidConfig(e.to_string()))?;
        let (sender, hooks) = HookSender::channel();
        multi.install_hooks(sender)?;
        tracing::debug!(max_active = config.max_active, "transfer registry created");
        Ok(Self {
            config,
            multi,
            transfers: Vec::new(),
            next_id: 1,
            active: 0,
            timer: TimerTask::new(),
            clock: CachedClock::new(),
            watchers: WatcherTable::new(),
            hooks,
            poisoned: None,
            torn_down: false,
        })
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.active
    }

    pub fn max_active(&self) -> usize {
        self.config.max_active
    }

    pub fn contains(&self, id: TransferId) -> bool {
        self.position(id).is_some()
    }

    pub fn state(&self, id: TransferId) -> Option<TransferState> {
        self.get(id).map(Transfer::state)
    }

    pub fn progress(&self, id: TransferId) -> Option<Progress> {
        self.get(id).map(Transfer::progress)
    }

    pub fn url(&self, id: TransferId) -> Option<&str> {
        self.get(id).map(Transfer::url)
    }

    pub fn is_using_ipv6(&self, id: TransferId) -> Option<bool> {
        self.get(id).map(Transfer::is_using_ipv6)
    }

    /// Ids in arrival order.
    pub fn ids(&self) -> Vec<TransferId> {
        self.transfers.iter().map(Transfer::id).collect()
    }

    pub fn snapshot(&self) -> Vec<TransferSnapshot> {
        self.transfers
            .iter()
            .map(|t| TransferSnapshot::new(t.id(), t.url(), t.state(), t.progress()))
            .collect()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    /// Refresh the cached time used for deadlines. Call once per host loop tick.
    pub fn update_clock(&mut self) -> Instant {
        self.clock.tick()
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// When the host loop must wake the registry, if ever.
    pub fn next_wakeup(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    /// How long the host loop may sleep before the timer is due, measured
    /// from the cached time. `None` while disarmed.
    pub fn time_until_wakeup(&self) -> Option<Duration> {
        self.timer.remaining(self.clock.now())
    }

    pub fn timer_due(&self) -> bool {
        self.timer.is_due(self.clock.now())
    }

    pub fn watcher(&self, socket: Socket) -> Option<&SocketWatcher> {
        self.watchers.get(socket)
    }

    pub fn watched_sockets(&self) -> Vec<Socket> {
        self.watchers.sockets()
    }

    pub fn watched_count(&self) -> usize {
        self.watchers.len()
    }

    /// Watch changes since the last call, for the host reactor to mirror.
    pub fn take_watch_changes(&mut self) -> Vec<WatchChange> {
        self.watchers.take_changes()
    }

    /// Create a transfer for `url` and attach it if a slot is free.
    ///
    /// `sink` fires exactly once when the transfer completes, and never if
    /// it is closed first.
    pub fn register<F>(&mut self, url: &str, options: TransferOptions, sink: F) -> Result<TransferId>
    where
        F: FnOnce(TransferId, Outcome) + Send + 'static,
    {
        self.check_poisoned()?;
        let parsed = Url::parse(url).map_err(|e| HttpError::invalid(url, e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(HttpError::invalid(
                url,
                format!("unsupported scheme {}", parsed.scheme()),
            ));
        }

        let progress = Arc::new(TransferProgress::default());
        let mut handle = self
            .multi
            .create_handle(url, &options, Arc::clone(&progress))
            .map_err(|e| HttpError::invalid(url, e.to_string()))?;
        handle
            .apply_config(&self.config)
            .map_err(|e| HttpError::invalid(url, e.to_string()))?;

        let id = TransferId::new(self.next_id);
        self.next_id += 1;
        let sink: CompletionSink = Box::new(sink);
        let mut transfer = Transfer::new(id, url.to_string(), handle, progress, sink);
        transfer.mark_queued();
        self.transfers.push(transfer);

        if self.active < self.config.max_active {
            let idx = self.transfers.len() - 1;
            self.activate(idx).map_err(|e| self.poison(e))?;
            tracing::info!(%id, url, active = self.active, "transfer started");
        } else {
            tracing::info!(%id, url, queued = self.transfers.len() - self.active, "transfer queued");
        }
        self.after_call().map_err(|e| self.poison(e))?;
        Ok(id)
    }

    /// Cancel a transfer without firing its sink. Returns `false` if `id` is
    /// unknown or already finished.
    pub fn close(&mut self, id: TransferId) -> Result<bool> {
        self.check_poisoned()?;
        let Some(idx) = self.position(id) else {
            return Ok(false);
        };
        let mut transfer = self.deregister(idx).map_err(|e| self.poison(e))?;
        transfer.cancel();
        tracing::info!(%id, "transfer closed");
        self.after_call().map_err(|e| self.poison(e))?;
        Ok(true)
    }

    /// Cancel everything and release the watchers and timer. No sink fires.
    /// Returns the cancelled ids in arrival order.
    pub fn shutdown(mut self) -> Vec<TransferId> {
        self.teardown()
    }

    fn get(&self, id: TransferId) -> Option<&Transfer<M>> {
        self.transfers.iter().find(|t| t.id() == id)
    }

    fn position(&self, id: TransferId) -> Option<usize> {
        self.transfers.iter().position(|t| t.id() == id)
    }

    fn check_poisoned(&self) -> Result<()> {
        match &self.poisoned {
            Some(e) => Err(HttpError::Internal(e.clone())),
            None => Ok(()),
        }
    }

    fn poison(&mut self, e: InternalError) -> HttpError {
        tracing::error!("transfer registry poisoned: {}", e);
        self.poisoned = Some(e.clone());
        HttpError::Internal(e)
    }

    fn activate(&mut self, idx: usize) -> std::result::Result<(), InternalError> {
        self.transfers[idx].attach(&mut self.multi)?;
        self.active += 1;
        Ok(())
    }

    /// Remove the transfer at `idx` from the collection, detaching it and
    /// promoting the earliest queued transfer if it held a slot.
    fn deregister(&mut self, idx: usize) -> std::result::Result<Transfer<M>, InternalError> {
        let mut transfer = self.transfers.remove(idx);
        if transfer.is_active() {
            transfer.detach(&mut self.multi)?;
            self.active -= 1;
            self.promote()?;
        }
        Ok(transfer)
    }

    fn promote(&mut self) -> std::result::Result<(), InternalError> {
        if self.active >= self.config.max_active {
            return Ok(());
        }
        let next = self
            .transfers
            .iter()
            .position(|t| t.state() == TransferState::Queued);
        if let Some(idx) = next {
            self.activate(idx)?;
            tracing::debug!(id = %self.transfers[idx].id(), "queued transfer promoted");
        }
        Ok(())
    }

    /// Apply hook events and keep the timer in step with the collection.
    fn after_call(&mut self) -> std::result::Result<(), InternalError> {
        self.apply_hook_events();
        if self.transfers.is_empty() {
            self.timer.cancel();
        } else if !self.timer.is_queued() {
            self.arm_from_hint()?;
        }
        Ok(())
    }

    fn apply_hook_events(&mut self) {
        while let Ok(event) = self.hooks.try_recv() {
            match event {
                HookEvent::Watch { socket, interest } => self.watchers.watch(socket, interest),
                HookEvent::Unwatch(socket) => self.watchers.unwatch(socket),
                HookEvent::Timeout(Some(after)) => self.timer.arm(self.clock.now() + after),
                HookEvent::Timeout(None) => self.timer.cancel(),
            }
        }
    }

    /// Arm from the engine's own hint, or the fallback when it has none.
    fn arm_from_hint(&mut self) -> std::result::Result<(), InternalError> {
        let after = self.multi.recommended_timeout()?.unwrap_or(FALLBACK_TIMEOUT);
        self.timer.arm(self.clock.now() + after);
        Ok(())
    }

    pub(crate) fn teardown(&mut self) -> Vec<TransferId> {
        if self.torn_down {
            return Vec::new();
        }
        self.torn_down = true;
        let mut cancelled = Vec::with_capacity(self.transfers.len());
        for mut transfer in self.transfers.drain(..) {
            if transfer.is_active() {
                if let Err(e) = transfer.detach(&mut self.multi) {
                    tracing::error!(id = %transfer.id(), "detach during teardown: {}", e);
                }
            }
            transfer.cancel();
            cancelled.push(transfer.id());
        }
        self.active = 0;
        // Anything the engine reported while detaching is moot now.
        while self.hooks.try_recv().is_ok() {}
        self.watchers.clear();
        self.timer.cancel();
        if !cancelled.is_empty() {
            tracing::info!(count = cancelled.len(), "transfer registry torn down");
        }
        cancelled
    }
}

impl<M: Multiplexer> Drop for TransferRegistry<M> {
    fn drop(&mut self) {
        self.teardown();
    }
}
