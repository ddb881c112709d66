//! awsconsole - open AWS consoles for named profiles
//!
//! Reads the standard AWS CLI configuration directory, works out how each
//! profile gets its credentials, and produces a signed federation URL that opens
//! the AWS console as that profile.
//!
//! # Credential paths
//!
//! - **Role chains**: `source_profile` links are followed back to a profile in the
//!   `credentials` file, then each `role_arn` along the way is assumed in turn,
//!   with at most one MFA code per chain ([`app::credential_chain`]).
//! - **IAM Identity Center**: profiles referencing an `sso-session` log in through
//!   the OIDC device flow and fetch role credentials from the SSO portal
//!   ([`app::sso`]).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use awsconsole::app::aws_config::get_config;
//! use awsconsole::app::settings::AppSettings;
//! use awsconsole::app::settings_store::MemorySettingsStore;
//! use awsconsole::ConsoleLauncher;
//!
//! # async fn run() -> awsconsole::Result<()> {
//! let settings = AppSettings::default();
//! let config = get_config(std::path::Path::new("/home/me/.aws")).await?;
//! let launcher = ConsoleLauncher::from_settings(&settings, Arc::new(MemorySettingsStore::new()));
//! let url = launcher.console_url(&config, "prod-admin", Some("123456"), "request-1").await?;
//! println!("{}", url);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all, rust_2018_idioms)]

pub mod app;

pub use app::{ConsoleError, ConsoleLauncher, Result};

/// Short git commit the binary was built from.
pub const GIT_COMMIT: &str = env!("GIT_COMMIT");
