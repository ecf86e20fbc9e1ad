//! `httpq config` – print the effective configuration.

use anyhow::Result;
use httpq_core::config::{self, HttpConfig};

pub fn run_config(cfg: &HttpConfig) -> Result<()> {
    println!("# {}", config::config_path()?.display());
    print!("{}", toml::to_string_pretty(cfg)?);
    Ok(())
}
