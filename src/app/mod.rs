//! Core modules for resolving AWS profiles into signed console URLs.
//!
//! # Module Organization
//!
//! ## Configuration
//! - [`aws_config`] - `~/.aws/config` and `credentials` parsing, profile classification,
//!   chain resolution and change watching
//! - [`settings`] - application settings from `settings.toml`
//! - [`settings_store`] - JSON key-value store for SSO client registrations and tokens
//!
//! ## Credentials
//! - [`credential_chain`] - STS AssumeRole fold over a resolved profile chain
//! - [`sso`] - IAM Identity Center device login and account/role listing
//!
//! ## Console
//! - [`console_url`] - federation sign-in token and login URL
//! - [`launcher`] - picks the credential path for a profile and signs the URL
//!
//! # Architecture
//!
//! ```text
//! aws_config ──▶ credential_chain ──┐
//!      │                            ├──▶ console_url ──▶ URL
//!      └──────▶ sso (device_auth) ──┘
//! ```
//!
//! [`launcher`] is the entry point; everything it talks to over the network sits
//! behind a trait so the flows can be tested with in-memory fakes.

pub mod aws_config;
pub mod console_url;
pub mod credential_chain;
pub mod error;
pub mod launcher;
pub mod settings;
pub mod settings_store;
pub mod sso;

pub use error::{ConsoleError, Result};
pub use launcher::ConsoleLauncher;
