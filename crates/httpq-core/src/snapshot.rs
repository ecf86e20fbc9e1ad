//! Point-in-time view of the queue for status displays.

use serde::Serialize;

use crate::transfer::{Progress, TransferId, TransferState};

const MAX_NAME_LEN: usize = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferSnapshot {
    pub id: TransferId,
    pub name: String,
    pub url: String,
    pub state: TransferState,
    pub done: u64,
    pub total: u64,
    pub percent: Option<u8>,
}

impl TransferSnapshot {
    pub fn new(id: TransferId, url: &str, state: TransferState, progress: Progress) -> Self {
        Self {
            id,
            name: display_name(url),
            url: url.to_string(),
            state,
            done: progress.done,
            total: progress.total,
            percent: progress.percent(),
        }
    }

    /// One status cell, e.g. `announce.php  42%` or `meta ---%`.
    pub fn status_cell(&self) -> String {
        match self.percent {
            Some(p) => format!("{} {:>3}%", self.name, p),
            None => format!("{} ---%", self.name),
        }
    }
}

/// Short label for a URL: the tail from the last `/` that is not within the
/// final 10 bytes, without a leading `/` or a `.torrent` suffix, at most 30 chars.
pub fn display_name(url: &str) -> String {
    if url.is_empty() {
        return "-".to_string();
    }
    let bytes = url.as_bytes();
    let limit = bytes.len() - bytes.len().min(10);
    let mut name = match bytes[..=limit].iter().rposition(|&b| b == b'/') {
        Some(p) => &url[p..],
        None => url,
    };
    if name.len() > 2 {
        name = name.strip_prefix('/').unwrap_or(name);
    }
    if name.len() > 9 {
        name = name
            .strip_suffix(".torrent")
            .or_else(|| name.strip_suffix(".TORRENT"))
            .unwrap_or(name);
    }
    name.chars().take(MAX_NAME_LEN).collect()
}
