//! Socket watchers: which descriptors the engine wants readiness for.
//!
//! The registry records every change; the host reactor drains them with
//! [`WatcherTable::take_changes`] and mirrors them in its poller.

use std::collections::HashMap;

use crate::multiplexer::{Interest, Socket};

/// Binds one descriptor's readiness to the registry's drive step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketWatcher {
    pub socket: Socket,
    pub interest: Interest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchChange {
    Added(SocketWatcher),
    Modified(SocketWatcher),
    Removed(Socket),
}

#[derive(Debug, Default)]
pub struct WatcherTable {
    watchers: HashMap<Socket, SocketWatcher>,
    changes: Vec<WatchChange>,
}

impl WatcherTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watch(&mut self, socket: Socket, interest: Interest) {
        match self.watchers.get_mut(&socket) {
            Some(w) if w.interest == interest => {}
            Some(w) => {
                w.interest = interest;
                self.changes.push(WatchChange::Modified(*w));
            }
            None => {
                let w = SocketWatcher { socket, interest };
                self.watchers.insert(socket, w);
                self.changes.push(WatchChange::Added(w));
            }
        }
    }

    /// Stop watching `socket`. Pending changes for it are dropped, and an add
    /// the reactor has not drained yet leaves no trace.
    pub fn unwatch(&mut self, socket: Socket) {
        if self.watchers.remove(&socket).is_none() {
            tracing::debug!(socket, "unwatch for unknown descriptor");
            return;
        }
        let mut unseen = false;
        self.changes.retain(|change| match change {
            WatchChange::Added(w) if w.socket == socket => {
                unseen = true;
                false
            }
            WatchChange::Modified(w) => w.socket != socket,
            _ => true,
        });
        if !unseen {
            self.changes.push(WatchChange::Removed(socket));
        }
    }

    /// Drop every watcher (teardown).
    pub fn clear(&mut self) {
        for socket in self.sockets() {
            self.unwatch(socket);
        }
    }

    pub fn get(&self, socket: Socket) -> Option<&SocketWatcher> {
        self.watchers.get(&socket)
    }

    /// Watched descriptors in ascending order.
    pub fn sockets(&self) -> Vec<Socket> {
        let mut sockets: Vec<Socket> = self.watchers.keys().copied().collect();
        sockets.sort_unstable();
        sockets
    }

    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    pub fn take_changes(&mut self) -> Vec<WatchChange> {
        std::mem::take(&mut self.changes)
    }
}
