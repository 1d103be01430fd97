//! Application path management.
//!
//! - **Working-directory mode**: if `config.yaml` exists in the current
//!   directory, config and logs live next to it.
//! - **User mode** (default): config in `<config_dir>/ketron-deck/` and
//!   logs in `<data_local_dir>/ketron-deck/logs`.

use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory name used under the platform config/data directories
const APP_NAME: &str = "ketron-deck";

/// Application paths for config and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    /// Path to the configuration file
    pub config: PathBuf,
    /// Path to the logs directory
    pub logs_dir: PathBuf,
}

impl AppPaths {
    /// Detect paths from the environment.
    ///
    /// Called before logging is initialized.
    pub fn detect() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::detect_from(&cwd, dirs::config_dir(), dirs::data_local_dir())
    }

    fn detect_from(
        cwd: &Path,
        config_dir: Option<PathBuf>,
        data_dir: Option<PathBuf>,
    ) -> Self {
        let cwd_config = cwd.join("config.yaml");
        if cwd_config.exists() {
            return Self {
                config: cwd_config,
                logs_dir: cwd.join("logs"),
            };
        }

        let config_base = config_dir.unwrap_or_else(|| cwd.to_path_buf()).join(APP_NAME);
        let data_base = data_dir
            .map(|d| d.join(APP_NAME))
            .unwrap_or_else(|| config_base.clone());

        Self {
            config: config_base.join("config.yaml"),
            logs_dir: data_base.join("logs"),
        }
    }

    /// Use an explicit config file; logs go next to it
    pub fn with_config(config: impl Into<PathBuf>) -> Self {
        let config = config.into();
        let logs_dir = config
            .parent()
            .map(|p| p.join("logs"))
            .unwrap_or_else(|| PathBuf::from("logs"));
        Self { config, logs_dir }
    }

    /// Create the logs directory if needed
    pub fn ensure_logs_dir(&self) -> anyhow::Result<()> {
        if !self.logs_dir.exists() {
            debug!("Creating logs directory: {}", self.logs_dir.display());
            std::fs::create_dir_all(&self.logs_dir).with_context(|| {
                format!("Failed to create logs directory {}", self.logs_dir.display())
            })?;
        }
        Ok(())
    }
}
