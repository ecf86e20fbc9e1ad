//! `httpq fetch` – run URLs through the transfer registry and report each result.

use anyhow::{bail, Context, Result};
use httpq_core::checksum::sha256_hex;
use httpq_core::config::HttpConfig;
use httpq_core::snapshot::display_name;
use httpq_core::{EventLoop, Outcome, TransferId, TransferOptions};
use serde_json::json;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchArgs {
    pub urls: Vec<String>,
    pub max_active: Option<usize>,
    pub output_dir: Option<PathBuf>,
    pub json: bool,
    pub timeout: u64,
}

pub fn run_fetch(cfg: &HttpConfig, args: FetchArgs) -> Result<()> {
    let mut cfg = cfg.clone();
    if let Some(n) = args.max_active {
        cfg.max_active = n;
    }
    if let Some(dir) = &args.output_dir {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }

    let mut el = EventLoop::with_curl(cfg)?;
    let (tx, rx) = mpsc::channel::<(TransferId, Outcome)>();
    let mut order = Vec::with_capacity(args.urls.len());
    for url in &args.urls {
        let tx = tx.clone();
        let id = el
            .register(url, TransferOptions::default(), move |id, outcome| {
                let _ = tx.send((id, outcome));
            })
            .with_context(|| format!("cannot fetch {url}"))?;
        order.push((id, url.as_str()));
    }
    drop(tx);
    let snapshot = el.registry().snapshot();

    let limit = Duration::from_secs(args.timeout);
    el.run_until_idle(limit)?;
    let mut outcomes: HashMap<TransferId, Outcome> = rx.try_iter().collect();

    let mut failed = 0usize;
    let mut reports = Vec::with_capacity(order.len());
    if !args.json {
        println!("{:<6} {:<8} {:<10} {:<64} {}", "ID", "RESULT", "BYTES", "SHA256", "NAME");
    }
    for (id, url) in order {
        let Some(outcome) = outcomes.remove(&id) else {
            bail!("transfer {id} for {url} finished without a result");
        };
        match outcome {
            Outcome::Success(body) => {
                let digest = sha256_hex(&body);
                if let Some(dir) = &args.output_dir {
                    save_body(dir, id, url, &body)?;
                }
                if args.json {
                    reports.push(json!({
                        "id": id,
                        "url": url,
                        "ok": true,
                        "bytes": body.len(),
                        "sha256": digest,
                    }));
                } else {
                    println!(
                        "{:<6} {:<8} {:<10} {:<64} {}",
                        id.get(),
                        "ok",
                        body.len(),
                        digest,
                        display_name(url)
                    );
                }
            }
            Outcome::Failure(message) => {
                failed += 1;
                if args.json {
                    reports.push(json!({
                        "id": id,
                        "url": url,
                        "ok": false,
                        "error": message,
                    }));
                } else {
                    println!(
                        "{:<6} {:<8} {:<10} {:<64} {}: {}",
                        id.get(),
                        "failed",
                        "-",
                        "-",
                        display_name(url),
                        message
                    );
                }
            }
        }
    }

    if args.json {
        let doc = json!({ "queued": snapshot, "results": reports });
        println!("{}", serde_json::to_string_pretty(&doc)?);
    }
    if failed > 0 {
        bail!("{} of {} transfer(s) failed", failed, args.urls.len());
    }
    Ok(())
}

/// Write `body` into `dir` under [`output_file_name`]. Returns the path written.
fn save_body(dir: &Path, id: TransferId, url: &str, body: &[u8]) -> Result<PathBuf> {
    let path = dir.join(output_file_name(id, url));
    fs::write(&path, body).with_context(|| format!("write {}", path.display()))?;
    tracing::info!(%id, path = %path.display(), "body saved");
    Ok(path)
}

/// File name for a saved body: the URL's display name with path separators
/// flattened, or `transfer-<id>` when nothing usable is left.
fn output_file_name(id: TransferId, url: &str) -> PathBuf {
    let name: String = display_name(url)
        .chars()
        .map(|c| if c == '/' || c == '\\' || c == '?' { '_' } else { c })
        .collect();
    if name.is_empty() || name == "-" || name.starts_with('.') {
        return PathBuf::from(format!("transfer-{}", id.get()));
    }
    PathBuf::from(name)
}
