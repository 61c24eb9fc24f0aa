//! Tracing setup.
//!
//! The chat UI owns the terminal, so logs are written to a file instead of
//! stderr. `RUST_LOG` can still raise or lower the defaults.

use anyhow::{anyhow, Context, Result};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Default filter used when `RUST_LOG` does not override it.
fn default_filter() -> Result<EnvFilter> {
    Ok(EnvFilter::from_default_env()
        .add_directive("chatterm=info".parse()?)
        .add_directive("reqwest=warn".parse()?))
}

/// Install the global subscriber, appending to `path`. Returns the path used.
pub fn init(path: Option<PathBuf>) -> Result<PathBuf> {
    let path = path.unwrap_or_else(crate::config::Config::log_path);
    let file = open_log_file(&path)?;

    tracing_subscriber::fmt()
        .with_env_filter(default_filter()?)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    Ok(path)
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_log_file_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("chatterm.log");
        open_log_file(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_default_filter_parses() {
        assert!(default_filter().is_ok());
    }
}
