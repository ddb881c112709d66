//! Application settings loaded from `settings.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::app::aws_config::watcher::MIN_DEBOUNCE;
use crate::app::aws_config::default_config_dir;
use crate::app::error::{ConsoleError, Result};

pub const SETTINGS_FILE: &str = "settings.toml";

/// User-tunable knobs. Every field has a default so a partial file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Directory holding `config` and `credentials`; `~/.aws` when unset.
    pub aws_config_dir: Option<PathBuf>,
    /// Client name sent with OIDC RegisterClient.
    pub oidc_client_name: String,
    pub watch_debounce_ms: u64,
    pub sso_page_size: i32,
    pub sso_max_attempts: u32,
    /// Region for STS and the console when a profile does not set one.
    pub default_region: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            aws_config_dir: None,
            oidc_client_name: "awsconsole".to_string(),
            watch_debounce_ms: 10,
            sso_page_size: 100,
            sso_max_attempts: 10,
            default_region: "us-east-1".to_string(),
        }
    }
}

impl AppSettings {
    /// `<config dir>/settings.toml` for this application.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "", "awsconsole")
            .map(|dirs| dirs.config_dir().join(SETTINGS_FILE))
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConsoleError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|e| ConsoleError::ConfigSyntax {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Load `path`, falling back to defaults when the file does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let settings = Self::load_from_file(path)?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content =
            toml::to_string_pretty(self).map_err(|e| ConsoleError::Settings(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConsoleError::Settings(format!("{}: {}", parent.display(), e)))?;
        }
        std::fs::write(path, content)
            .map_err(|e| ConsoleError::Settings(format!("{}: {}", path.display(), e)))
    }

    pub fn config_dir(&self) -> Option<PathBuf> {
        self.aws_config_dir.clone().or_else(default_config_dir)
    }

    /// Debounce delay, never below the watcher's minimum.
    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms).max(MIN_DEBOUNCE)
    }

    pub fn sso_page_size(&self) -> i32 {
        self.sso_page_size.max(1)
    }
}
