//! Adapter configuration and its on-disk form.
//!
//! Configuration is a single JSON document. Every field has a default, so a
//! partial file (or none at all) is valid.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::script::ScriptCommands;

/// Configuration for an [`Adapter`](crate::runtime::Adapter)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Directory under which scoped script work areas are created (default: .svclink/)
    pub env_root: PathBuf,

    /// External commands used by script services
    pub scripts: ScriptCommands,

    /// Python module whose `main` operation answers internal events
    pub internal_script: Option<PathBuf>,

    /// Enable debug tracing
    pub debug: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            env_root: PathBuf::from(".svclink"),
            scripts: ScriptCommands::default(),
            internal_script: None,
            debug: false,
        }
    }
}

/// Write data atomically: temp file, sync, rename.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path)
        .with_context(|| format!("Failed to create temp file: {:?}", temp_path))?;
    file.write_all(data).context("Failed to write data")?;
    file.sync_all().context("Failed to sync file")?;
    drop(file);

    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;
    Ok(())
}

/// Persist a configuration as pretty JSON.
pub fn write_config(path: &Path, config: &AdapterConfig) -> Result<()> {
    let json = serde_json::to_vec_pretty(config).context("Failed to serialize config")?;
    write_atomic(path, &json)
}

/// Load a configuration file.
pub fn load_config(path: &Path) -> Result<AdapterConfig> {
    let data = fs::read(path).with_context(|| format!("Failed to read file: {:?}", path))?;
    let config = serde_json::from_slice(&data).context("Failed to deserialize config")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_read_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("conf").join("svclink.json");

        let mut config = AdapterConfig::default();
        config.env_root = temp.path().join("envs");
        config.internal_script = Some(PathBuf::from("/opt/internal.py"));
        config.debug = true;

        write_config(&path, &config).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn partial_config_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("svclink.json");
        fs::write(&path, r#"{"debug": true}"#).unwrap();

        let config = load_config(&path).unwrap();
        assert!(config.debug);
        assert_eq!(config.env_root, PathBuf::from(".svclink"));
        assert_eq!(config.scripts, ScriptCommands::default());
    }

    #[test]
    fn missing_config_reports_path() {
        let temp = TempDir::new().unwrap();
        let err = load_config(&temp.path().join("absent.json")).unwrap_err();
        assert!(format!("{err:#}").contains("absent.json"));
    }
}
