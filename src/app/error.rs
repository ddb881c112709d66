//! Error taxonomy shared by the configuration, credential and SSO engines.
//!
//! Every fallible operation in the library returns [`Result`]. Errors are
//! propagated to the caller unchanged; the only condition that is retried
//! internally is the device flow's `authorization_pending` response, which is
//! never surfaced as an error at all.

use std::path::PathBuf;

use thiserror::Error;

/// Failures raised while resolving profiles and producing console URLs.
#[derive(Debug, Error)]
pub enum ConsoleError {
    /// The `config` or `credentials` file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file was readable but its contents could not be interpreted.
    #[error("failed to parse {}: {message}", path.display())]
    ConfigSyntax { path: PathBuf, message: String },

    /// A section header started with something other than `profile` or `sso-session`.
    #[error("invalid entry type '{0}' (expected 'profile' or 'sso-session')")]
    InvalidEntryType(String),

    /// Following `source_profile` revisited a profile.
    #[error("loop in profiles: {} + {next}", chain.join(", "))]
    ProfileCycle { chain: Vec<String>, next: String },

    #[error("profile '{0}' not found")]
    UnknownProfile(String),

    #[error("sso-session '{0}' not found")]
    UnknownSsoSession(String),

    /// A profile or sso-session lacks a key the requested operation needs.
    #[error("'{entry}' is missing required key '{key}'")]
    MissingKey { entry: String, key: &'static str },

    /// The chain root has no entry in the credentials file.
    #[error("no credentials found for profile '{0}'")]
    MissingCredentials(String),

    /// STS rejected a hop (bad MFA code, expired session, permission denied).
    #[error("failed to assume role for profile '{profile}': {message}")]
    AssumeRole { profile: String, message: String },

    /// The user did not complete browser verification before `expiresIn` elapsed.
    #[error("device authorization expired before it was approved")]
    DeviceAuthorizationExpired,

    /// The request was cancelled by the caller; not a user-facing failure.
    #[error("device authorization cancelled")]
    DeviceAuthorizationCancelled,

    /// Cache-only token lookup found nothing usable.
    #[error("no valid SSO token cached for '{0}'")]
    TokenNotCached(String),

    #[error("SSO OIDC request failed: {0}")]
    SsoOidc(String),

    #[error("SSO request failed: {0}")]
    Sso(String),

    /// The federation endpoint returned an error status or an unparseable body.
    #[error("failed to get signin token: {0}")]
    SigninToken(String),

    #[error("settings store error: {0}")]
    Settings(String),

    #[error("failed to watch config directory: {0}")]
    Watch(#[from] notify::Error),
}

impl ConsoleError {
    /// Cancellation is a silent abort rather than a failure to report.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ConsoleError::DeviceAuthorizationCancelled)
    }
}

pub type Result<T> = std::result::Result<T, ConsoleError>;
