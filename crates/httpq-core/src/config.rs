use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Registry-wide HTTP settings loaded from `~/.config/httpq/config.toml`.
///
/// Everything except `max_active` is applied to each transfer's native handle
/// when it is registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    /// `User-Agent` header sent with every request (empty = transport default).
    #[serde(default)]
    pub user_agent: String,
    /// Proxy URL (empty = no proxy).
    #[serde(default)]
    pub proxy: String,
    /// Outgoing interface name or address (empty = any).
    #[serde(default)]
    pub bind_address: String,
    /// Directory of CA certificates (empty = transport default).
    #[serde(default)]
    pub ca_path: String,
    /// CA bundle file (empty = transport default).
    #[serde(default)]
    pub ca_file: String,
    /// Verify that the certificate matches the host name.
    pub verify_host: bool,
    /// Verify the peer's certificate chain.
    pub verify_peer: bool,
    /// How long resolved names stay in the DNS cache, in seconds.
    pub dns_cache_ttl_secs: u64,
    /// Maximum number of transfers attached to the multiplexer at once.
    pub max_active: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("httpq/", env!("CARGO_PKG_VERSION")).to_string(),
            proxy: String::new(),
            bind_address: String::new(),
            ca_path: String::new(),
            ca_file: String::new(),
            verify_host: true,
            verify_peer: true,
            dns_cache_ttl_secs: 60,
            max_active: 32,
        }
    }
}

impl HttpConfig {
    /// Reject values the registry cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_active == 0 {
            bail!("max_active must be at least 1");
        }
        Ok(())
    }

    pub fn dns_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.dns_cache_ttl_secs)
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("httpq")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<HttpConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = HttpConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }
    load_from(&path)
}

/// Load and validate configuration from an explicit path.
pub fn load_from(path: &Path) -> Result<HttpConfig> {
    let data =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: HttpConfig =
        toml::from_str(&data).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}
