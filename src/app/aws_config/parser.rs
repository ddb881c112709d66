//! Parsing of the `config` and `credentials` INI files.
//!
//! Quote and escape processing are disabled so that values reach the resolver
//! exactly as written, matching how the AWS CLI reads the same files.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::path::Path;

use ini::{Ini, ParseOption};
use tracing::{debug, warn};

use super::{ConfigEntry, CredentialsEntry, EntryType, Profile, SsoSession};
use crate::app::error::{ConsoleError, Result};

pub const CONFIG_FILE: &str = "config";
pub const CREDENTIALS_FILE: &str = "credentials";

fn parse_options() -> ParseOption {
    ParseOption {
        enabled_quote: false,
        enabled_escape: false,
        ..ParseOption::default()
    }
}

fn load_ini(content: &str, path: &Path) -> Result<Ini> {
    Ini::load_from_str_opt(content, parse_options()).map_err(|e| ConsoleError::ConfigSyntax {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

async fn read_file(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConsoleError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })
}

/// Split a section header into its entry type and cleaned name.
///
/// `default` and `profile default` are both the profile `default`;
/// `sso-session corp` is the session `corp`.
pub fn split_section_name(section: &str) -> Result<(EntryType, String)> {
    let section = section.trim();
    match section.split_once(char::is_whitespace) {
        None => Ok((EntryType::Profile, section.to_string())),
        Some((token, rest)) => Ok((token.parse()?, rest.trim().to_string())),
    }
}

/// Parse the text of a `config` file into raw entries in file order.
pub fn parse_config_entries(content: &str, path: &Path) -> Result<Vec<ConfigEntry>> {
    let ini = load_ini(content, path)?;

    ini.iter()
        .filter_map(|(section, properties)| section.map(|name| (name, properties)))
        .enumerate()
        .map(|(order, (section, properties))| {
            let (entry_type, name) = split_section_name(section)?;
            Ok(ConfigEntry {
                name,
                entry_type,
                order,
                properties: properties
                    .iter()
                    .map(|(key, value)| (key.to_string(), value.to_string()))
                    .collect(),
            })
        })
        .collect()
}

pub async fn read_config_entries(config_dir: &Path) -> Result<Vec<ConfigEntry>> {
    let path = config_dir.join(CONFIG_FILE);
    let content = read_file(&path).await?;
    let entries = parse_config_entries(&content, &path)?;
    debug!("Parsed {} sections from {}", entries.len(), path.display());
    Ok(entries)
}

fn into_profile(entry: ConfigEntry, path: &Path) -> Result<Profile> {
    let mut profile = Profile {
        order: entry.order,
        ..Profile::default()
    };

    for (key, value) in entry.properties {
        match key.as_str() {
            "source_profile" => profile.source_profile = Some(value),
            "role_arn" => profile.role_arn = Some(value),
            "mfa_serial" => profile.mfa_serial = Some(value),
            "region" => profile.region = Some(value),
            "sso_session" => profile.sso_session = Some(value),
            "sso_account_id" => profile.sso_account_id = Some(value),
            "sso_role_name" => profile.sso_role_name = Some(value),
            "duration_seconds" => {
                let seconds = value.trim().parse::<i32>().map_err(|e| {
                    ConsoleError::ConfigSyntax {
                        path: path.to_path_buf(),
                        message: format!(
                            "profile '{}': invalid duration_seconds '{}': {}",
                            entry.name, value, e
                        ),
                    }
                })?;
                profile.duration_seconds = Some(seconds);
            }
            _ => {
                profile.additional_properties.insert(key, value);
            }
        }
    }

    Ok(profile)
}

fn into_sso_session(entry: ConfigEntry) -> SsoSession {
    let mut session = SsoSession {
        order: entry.order,
        ..SsoSession::default()
    };

    for (key, value) in entry.properties {
        match key.as_str() {
            "sso_start_url" => session.sso_start_url = Some(value),
            "sso_region" => session.sso_region = Some(value),
            "sso_registration_scopes" => {
                session.sso_registration_scopes = value
                    .split(',')
                    .map(str::trim)
                    .filter(|scope| !scope.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            _ => {
                session.additional_properties.insert(key, value);
            }
        }
    }

    session
}

/// Type raw entries into profiles and sso-sessions. The first section with a
/// given name wins.
pub fn split_entries(
    entries: Vec<ConfigEntry>,
    path: &Path,
) -> Result<(BTreeMap<String, Profile>, BTreeMap<String, SsoSession>)> {
    let mut profiles = BTreeMap::new();
    let mut sso_sessions = BTreeMap::new();

    for entry in entries {
        match entry.entry_type {
            EntryType::Profile => match profiles.entry(entry.name.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(into_profile(entry, path)?);
                }
                Entry::Occupied(_) => {
                    warn!("Ignoring duplicate profile '{}' in {}", entry.name, path.display());
                }
            },
            EntryType::SsoSession => match sso_sessions.entry(entry.name.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(into_sso_session(entry));
                }
                Entry::Occupied(_) => {
                    warn!(
                        "Ignoring duplicate sso-session '{}' in {}",
                        entry.name,
                        path.display()
                    );
                }
            },
        }
    }

    Ok((profiles, sso_sessions))
}

/// Parse the text of a `credentials` file, keeping file order.
pub fn parse_credentials(content: &str, path: &Path) -> Result<Vec<(String, CredentialsEntry)>> {
    let ini = load_ini(content, path)?;
    let mut credentials: Vec<(String, CredentialsEntry)> = Vec::new();

    for (section, properties) in ini.iter() {
        let Some(name) = section else {
            continue;
        };
        let name = name.trim().to_string();
        if credentials.iter().any(|(existing, _)| *existing == name) {
            warn!("Ignoring duplicate credentials '{}' in {}", name, path.display());
            continue;
        }

        let required = |key: &str| {
            properties
                .get(key)
                .map(str::to_string)
                .ok_or_else(|| ConsoleError::ConfigSyntax {
                    path: path.to_path_buf(),
                    message: format!("credentials '{}' has no {}", name, key),
                })
        };

        let entry = CredentialsEntry {
            aws_access_key_id: required("aws_access_key_id")?,
            aws_secret_access_key: required("aws_secret_access_key")?,
            aws_session_token: properties.get("aws_session_token").map(str::to_string),
        };
        credentials.push((name, entry));
    }

    Ok(credentials)
}

pub async fn read_credentials(config_dir: &Path) -> Result<Vec<(String, CredentialsEntry)>> {
    let path = config_dir.join(CREDENTIALS_FILE);
    let content = read_file(&path).await?;
    let credentials = parse_credentials(&content, &path)?;
    debug!("Parsed {} credentials from {}", credentials.len(), path.display());
    Ok(credentials)
}
