//! Durable key-value store for OIDC client registrations and SSO tokens.
//!
//! The SSO engine never talks to the filesystem directly: it is handed an
//! `Arc<dyn SettingsStore>` and reads/writes JSON values under a namespace and
//! key. Production code uses [`JsonFileSettingsStore`]; tests use
//! [`MemorySettingsStore`].

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::app::error::{ConsoleError, Result};

/// Namespace for cached [`crate::app::sso::OidcClient`] registrations.
pub const OIDC_CLIENTS: &str = "oidcClients";
/// Namespace for cached [`crate::app::sso::SsoToken`]s.
pub const SSO_TOKENS: &str = "ssoTokens";

/// Namespaced JSON key-value storage.
pub trait SettingsStore: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>>;
    fn set(&self, namespace: &str, key: &str, value: Value) -> Result<()>;
}

/// Read a typed value. Entries that no longer deserialize are treated as absent.
pub fn get_typed<T: DeserializeOwned>(
    store: &dyn SettingsStore,
    namespace: &str,
    key: &str,
) -> Result<Option<T>> {
    let Some(value) = store.get(namespace, key)? else {
        return Ok(None);
    };
    match serde_json::from_value(value) {
        Ok(typed) => Ok(Some(typed)),
        Err(e) => {
            warn!("Discarding unreadable {}/{} entry: {}", namespace, key, e);
            Ok(None)
        }
    }
}

pub fn set_typed<T: Serialize>(
    store: &dyn SettingsStore,
    namespace: &str,
    key: &str,
    value: &T,
) -> Result<()> {
    let value = serde_json::to_value(value).map_err(|e| ConsoleError::Settings(e.to_string()))?;
    store.set(namespace, key, value)
}

/// Process-local store, used in tests and when persistence is unavailable.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    entries: RwLock<HashMap<(String, String), Value>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| ConsoleError::Settings(format!("lock poisoned: {}", e)))?;
        Ok(entries
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    fn set(&self, namespace: &str, key: &str, value: Value) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| ConsoleError::Settings(format!("lock poisoned: {}", e)))?;
        entries.insert((namespace.to_string(), key.to_string()), value);
        Ok(())
    }
}

/// A single JSON document on disk: `{ namespace: { key: value } }`.
///
/// Every write re-reads the document under an exclusive file lock so that two
/// processes launching consoles at the same time do not drop each other's
/// entries. Reads hold a shared lock.
///
/// All methods block on file I/O and locks; async callers go through
/// `spawn_blocking`.
#[derive(Debug, Clone)]
pub struct JsonFileSettingsStore {
    path: PathBuf,
}

impl JsonFileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data dir>/settings.json` for this application.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "", "awsconsole")
            .map(|dirs| dirs.data_dir().join("settings.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn settings_error(&self, action: &str, e: impl std::fmt::Display) -> ConsoleError {
        ConsoleError::Settings(format!("failed to {} {}: {}", action, self.path.display(), e))
    }

    fn parse_document(&self, content: &str) -> Map<String, Value> {
        if content.trim().is_empty() {
            return Map::new();
        }
        match serde_json::from_str::<Value>(content) {
            Ok(Value::Object(document)) => document,
            Ok(_) | Err(_) => {
                warn!(
                    "Settings file {} is not a JSON object, starting fresh",
                    self.path.display()
                );
                Map::new()
            }
        }
    }

    fn open(&self) -> Result<fs::File> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.settings_error("create directory for", e))?;
        }

        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| self.settings_error("open", e))?;

        // Tokens and client secrets live here.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600)) {
                warn!("Failed to restrict permissions on {}: {}", self.path.display(), e);
            }
        }

        Ok(file)
    }
}

impl SettingsStore for JsonFileSettingsStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>> {
        let mut file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.settings_error("open", e)),
        };

        // Writers truncate before rewriting, so reads must wait for them.
        FileExt::lock_shared(&file).map_err(|e| self.settings_error("lock", e))?;
        let mut content = String::new();
        let read = file.read_to_string(&mut content);
        if let Err(e) = FileExt::unlock(&file) {
            warn!("Failed to unlock {}: {}", self.path.display(), e);
        }
        read.map_err(|e| self.settings_error("read", e))?;

        let document = self.parse_document(&content);
        Ok(document
            .get(namespace)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    fn set(&self, namespace: &str, key: &str, value: Value) -> Result<()> {
        let mut file = self.open()?;
        FileExt::lock_exclusive(&file).map_err(|e| self.settings_error("lock", e))?;

        let result = (|| -> Result<()> {
            let mut content = String::new();
            file.read_to_string(&mut content)
                .map_err(|e| self.settings_error("read", e))?;

            let mut document = self.parse_document(&content);
            let entries = document
                .entry(namespace.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entries.is_object() {
                *entries = Value::Object(Map::new());
            }
            if let Value::Object(entries) = entries {
                entries.insert(key.to_string(), value);
            }

            let serialized = serde_json::to_string_pretty(&Value::Object(document))
                .map_err(|e| self.settings_error("serialize", e))?;
            file.set_len(0).map_err(|e| self.settings_error("truncate", e))?;
            file.seek(SeekFrom::Start(0))
                .map_err(|e| self.settings_error("seek", e))?;
            file.write_all(serialized.as_bytes())
                .map_err(|e| self.settings_error("write", e))?;
            file.flush().map_err(|e| self.settings_error("flush", e))
        })();

        if let Err(e) = FileExt::unlock(&file) {
            warn!("Failed to unlock {}: {}", self.path.display(), e);
        }
        if result.is_ok() {
            debug!("Stored {}/{} in {}", namespace, key, self.path.display());
        }
        result
    }
}
