//! # AWS Configuration Store
//!
//! Typed view of the standard AWS CLI configuration directory (`~/.aws`).
//!
//! The `config` file holds `[profile NAME]` and `[sso-session NAME]` sections,
//! the `credentials` file holds `[NAME]` sections of raw access keys. Both are
//! parsed by [`parser`], classified by [`resolver`], and combined into a
//! [`Config`] aggregate that is rebuilt wholesale on every read. The
//! [`watcher`] re-reads the directory whenever `config` changes on disk.
//!
//! ## Derived classifications
//!
//! - **credential profiles**: every section name in `credentials`
//! - **long-term credential profiles**: credentials whose access key starts with `AKIA`
//! - **usable profiles**: profiles a console can be launched for
//! - **cachable profiles**: MFA-protected credential roots whose session could be cached
//! - **standard profiles**: usable profiles that do not go through SSO
//!
//! All derived lists are ordered by declaration order so callers can display
//! them without re-sorting.

pub mod parser;
pub mod resolver;
pub mod watcher;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::app::error::{ConsoleError, Result};

pub use resolver::{classify, is_multi_stage_role_assuming_profile, resolve_chain, Classification};
pub use watcher::{watch_config, ConfigWatcher};

/// Prefix marking an access key as long-term IAM user credentials.
pub const LONG_TERM_KEY_PREFIX: &str = "AKIA";

/// Section kinds allowed in the `config` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryType {
    Profile,
    SsoSession,
}

impl FromStr for EntryType {
    type Err = ConsoleError;

    fn from_str(token: &str) -> Result<Self> {
        match token {
            "profile" => Ok(EntryType::Profile),
            "sso-session" => Ok(EntryType::SsoSession),
            other => Err(ConsoleError::InvalidEntryType(other.to_string())),
        }
    }
}

/// A raw section from the `config` file, before it is typed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    /// Section name with the `profile `/`sso-session ` prefix removed.
    pub name: String,
    pub entry_type: EntryType,
    /// Index of the section in the file.
    pub order: usize,
    pub properties: BTreeMap<String, String>,
}

/// A named set of credential-resolution instructions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub order: usize,
    pub source_profile: Option<String>,
    pub role_arn: Option<String>,
    pub mfa_serial: Option<String>,
    pub region: Option<String>,
    pub sso_session: Option<String>,
    pub sso_account_id: Option<String>,
    pub sso_role_name: Option<String>,
    pub duration_seconds: Option<i32>,
    /// Keys this crate does not interpret, kept so nothing from the file is lost.
    pub additional_properties: BTreeMap<String, String>,
}

/// An IAM Identity Center start URL / region pair that profiles can reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsoSession {
    pub order: usize,
    pub sso_start_url: Option<String>,
    pub sso_region: Option<String>,
    pub sso_registration_scopes: Vec<String>,
    pub additional_properties: BTreeMap<String, String>,
}

impl SsoSession {
    pub fn start_url(&self, name: &str) -> Result<&str> {
        self.sso_start_url.as_deref().ok_or_else(|| ConsoleError::MissingKey {
            entry: name.to_string(),
            key: "sso_start_url",
        })
    }

    pub fn region(&self, name: &str) -> Result<&str> {
        self.sso_region.as_deref().ok_or_else(|| ConsoleError::MissingKey {
            entry: name.to_string(),
            key: "sso_region",
        })
    }
}

/// A section of the `credentials` file.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialsEntry {
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub aws_session_token: Option<String>,
}

impl CredentialsEntry {
    /// IAM user keys, as opposed to temporary session credentials.
    pub fn is_long_term(&self) -> bool {
        self.aws_access_key_id.starts_with(LONG_TERM_KEY_PREFIX)
    }
}

// Secrets must never end up in logs.
impl fmt::Debug for CredentialsEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsEntry")
            .field("aws_access_key_id", &self.aws_access_key_id)
            .field("aws_secret_access_key", &"** redacted **")
            .field(
                "aws_session_token",
                &self.aws_session_token.as_ref().map(|_| "** redacted **"),
            )
            .finish()
    }
}

/// Everything known about the configuration directory at one point in time.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub profiles: BTreeMap<String, Profile>,
    pub sso_sessions: BTreeMap<String, SsoSession>,
    pub credentials: BTreeMap<String, CredentialsEntry>,
    pub credential_profiles: Vec<String>,
    pub long_term_credential_profiles: Vec<String>,
    pub usable_profiles: Vec<String>,
    pub cachable_profiles: Vec<String>,
    pub standard_profiles: Vec<String>,
}

impl Config {
    /// Build the aggregate and its derived classifications from parsed files.
    ///
    /// `credentials` must be in file order; the credential profile lists keep it.
    pub fn from_parts(
        profiles: BTreeMap<String, Profile>,
        sso_sessions: BTreeMap<String, SsoSession>,
        credentials: Vec<(String, CredentialsEntry)>,
    ) -> Self {
        let credential_profiles: Vec<String> =
            credentials.iter().map(|(name, _)| name.clone()).collect();
        let long_term_credential_profiles: Vec<String> = credentials
            .iter()
            .filter(|(_, entry)| entry.is_long_term())
            .map(|(name, _)| name.clone())
            .collect();

        let Classification {
            usable,
            cachable,
            standard,
        } = classify(
            &profiles,
            &credential_profiles,
            &long_term_credential_profiles,
        );

        Self {
            profiles,
            sso_sessions,
            credentials: credentials.into_iter().collect(),
            credential_profiles,
            long_term_credential_profiles,
            usable_profiles: usable,
            cachable_profiles: cachable,
            standard_profiles: standard,
        }
    }

    pub fn profile(&self, name: &str) -> Result<&Profile> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConsoleError::UnknownProfile(name.to_string()))
    }

    pub fn sso_session(&self, name: &str) -> Result<&SsoSession> {
        self.sso_sessions
            .get(name)
            .ok_or_else(|| ConsoleError::UnknownSsoSession(name.to_string()))
    }

    /// Usable profiles that authenticate through an sso-session.
    pub fn sso_profiles(&self) -> Vec<&str> {
        self.usable_profiles
            .iter()
            .filter(|name| {
                self.profiles
                    .get(name.as_str())
                    .is_some_and(|p| p.sso_session.is_some())
            })
            .map(String::as_str)
            .collect()
    }
}

/// `~/.aws`, when a home directory can be determined.
pub fn default_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(".aws"))
}

/// Read and classify both files in `config_dir`.
pub async fn get_config(config_dir: &Path) -> Result<Config> {
    let entries = parser::read_config_entries(config_dir).await?;
    let (profiles, sso_sessions) =
        parser::split_entries(entries, &config_dir.join(parser::CONFIG_FILE))?;
    let credentials = parser::read_credentials(config_dir).await?;

    let config = Config::from_parts(profiles, sso_sessions, credentials);
    debug!(
        "Loaded AWS config from {}: {} profiles ({} usable, {} cachable), {} sso-sessions",
        config_dir.display(),
        config.profiles.len(),
        config.usable_profiles.len(),
        config.cachable_profiles.len(),
        config.sso_sessions.len()
    );
    Ok(config)
}
