//! Tracing subscriber setup shared by the binaries.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Where log output goes.
#[derive(Debug, Clone)]
pub enum LogTarget {
    /// Standard error.
    Stderr,
    /// A fresh timestamped file inside the given directory.
    Directory(PathBuf),
}

/// Name of the log file created for a run started now.
pub fn log_file_name(prefix: &str) -> String {
    format!("{}_{}.log", prefix, chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f"))
}

fn filter(level: Level) -> EnvFilter {
    EnvFilter::from_default_env().add_directive(level.into())
}

/// Install the global subscriber. Returns the log file path when logging to a directory.
pub fn init(target: &LogTarget, level: Level) -> Result<Option<PathBuf>> {
    match target {
        LogTarget::Stderr => {
            tracing_subscriber::fmt()
                .with_env_filter(filter(level))
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
        LogTarget::Directory(dir) => {
            let path = open_log_path(dir, "svclink")?;
            let file = File::create(&path)
                .with_context(|| format!("Failed to create log file: {:?}", path))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter(level))
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
            Ok(Some(path))
        }
    }
}

fn open_log_path(dir: &Path, prefix: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create log directory: {:?}", dir))?;
    Ok(dir.join(log_file_name(prefix)))
}
