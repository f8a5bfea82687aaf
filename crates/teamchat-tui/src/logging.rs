//! File logging. The terminal belongs to the UI, so log records go to
//! `<cache dir>/teamchat/teamchat.log`. Level comes from `RUST_LOG` (default `info`).

use std::fs::{self, OpenOptions};
use std::path::PathBuf;

use anyhow::{anyhow, Result};

pub fn log_path() -> Result<PathBuf> {
    let cache_dir = dirs::cache_dir()
        .ok_or_else(|| anyhow!("Could not determine cache directory"))?;
    Ok(cache_dir.join("teamchat").join("teamchat.log"))
}

pub fn init() -> Result<PathBuf> {
    let path = log_path()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .format_timestamp_millis()
        .try_init()?;

    Ok(path)
}
