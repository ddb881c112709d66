//! # IAM Identity Center (SSO)
//!
//! Device-code login against SSO OIDC and the account/role listing that an
//! access token unlocks.
//!
//! - [`device_auth`]: client registration, device authorization and token
//!   polling, with results cached in the injected
//!   [`SettingsStore`](crate::app::settings_store::SettingsStore)
//! - [`requests`]: the registry of in-flight and recently cancelled requests
//! - [`role_lister`]: paginated ListAccounts / ListAccountRoles and
//!   GetRoleCredentials for SSO profiles
//!
//! The AWS services sit behind the [`OidcApi`] and
//! [`SsoApi`](role_lister::SsoApi) traits so the flows can be driven by
//! recording fakes in tests.

pub mod device_auth;
pub mod requests;
pub mod role_lister;

use std::fmt;

use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_types::region::Region;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::app::error::Result;

pub use device_auth::{AwsOidcApi, SsoAuthenticator, TokenMode};
pub use requests::{PendingRequests, RequestGuard};
pub use role_lister::{AwsSsoApi, SsoApi, SsoRole, SsoRoleLister};

/// OAuth grant used for CreateToken polling.
pub const DEVICE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Scope requested when the sso-session does not list any.
pub const DEFAULT_SCOPE: &str = "sso:account:access";

/// A registered public OIDC client.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OidcClient {
    pub client_id: String,
    pub client_secret: String,
    /// Epoch seconds.
    pub client_secret_expires_at: i64,
}

impl OidcClient {
    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        self.client_secret_expires_at.saturating_mul(1000) > now_ms
    }
}

impl fmt::Debug for OidcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OidcClient")
            .field("client_id", &self.client_id)
            .field("client_secret", &"** redacted **")
            .field("client_secret_expires_at", &self.client_secret_expires_at)
            .finish()
    }
}

/// An SSO access token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SsoToken {
    pub access_token: String,
    /// Epoch milliseconds.
    pub expires_at: i64,
}

impl SsoToken {
    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        self.expires_at > now_ms
    }
}

impl fmt::Debug for SsoToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SsoToken")
            .field("access_token", &"** redacted **")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Response of StartDeviceAuthorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: Option<String>,
    pub verification_uri: Option<String>,
    pub verification_uri_complete: Option<String>,
    /// Seconds until the device code expires.
    pub expires_in: i32,
    /// Seconds to wait between CreateToken attempts.
    pub interval: i32,
}

impl DeviceAuthorization {
    /// The page the user should visit, preferring the one with the code filled in.
    pub fn browser_urls(&self) -> impl Iterator<Item = &str> {
        self.verification_uri_complete
            .as_deref()
            .into_iter()
            .chain(self.verification_uri.as_deref())
    }
}

/// Outcome of one CreateToken attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenPoll {
    Issued { access_token: String, expires_in: i32 },
    /// The user has not approved the request yet.
    Pending,
    /// The device code is past its lifetime; a new authorization is needed.
    Expired,
}

/// SSO OIDC operations used by the device flow.
#[async_trait]
pub trait OidcApi: Send + Sync {
    async fn register_client(
        &self,
        region: &str,
        client_name: &str,
        start_url: &str,
        scopes: &[String],
    ) -> Result<OidcClient>;

    async fn start_device_authorization(
        &self,
        region: &str,
        client: &OidcClient,
        start_url: &str,
    ) -> Result<DeviceAuthorization>;

    async fn create_token(
        &self,
        region: &str,
        client: &OidcClient,
        device_code: &str,
    ) -> Result<TokenPoll>;
}

/// Opens verification pages for the user.
pub trait UrlOpener: Send + Sync {
    fn open(&self, url: &str) -> std::io::Result<()>;
}

/// The OS default browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl UrlOpener for SystemBrowser {
    fn open(&self, url: &str) -> std::io::Result<()> {
        open::that(url)
    }
}

/// Open the first verification URL that the opener accepts.
pub(crate) fn open_verification_page(opener: &dyn UrlOpener, auth: &DeviceAuthorization) {
    for url in auth.browser_urls() {
        match opener.open(url) {
            Ok(()) => return,
            Err(e) => warn!("Failed to open browser with {}: {}", url, e),
        }
    }
    warn!("Could not open a browser for device authorization; visit the verification page manually");
}

/// Unsigned SDK configuration for the SSO endpoints of `region`.
pub(crate) async fn sdk_config(region: &str, max_attempts: u32) -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .retry_config(RetryConfig::standard().with_max_attempts(max_attempts.max(1)))
        .no_credentials()
        .load()
        .await
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FlakyOpener {
        opened: Mutex<Vec<String>>,
        fail_first: bool,
    }

    impl UrlOpener for FlakyOpener {
        fn open(&self, url: &str) -> std::io::Result<()> {
            let mut opened = self.opened.lock().unwrap();
            opened.push(url.to_string());
            if self.fail_first && opened.len() == 1 {
                return Err(std::io::Error::other("no browser"));
            }
            Ok(())
        }
    }

    fn authorization() -> DeviceAuthorization {
        DeviceAuthorization {
            device_code: "device".to_string(),
            user_code: Some("ABCD-EFGH".to_string()),
            verification_uri: Some("https://device.sso.aws/".to_string()),
            verification_uri_complete: Some("https://device.sso.aws/?user_code=ABCD-EFGH".to_string()),
            expires_in: 600,
            interval: 1,
        }
    }

    #[test]
    fn test_client_expiry_is_in_seconds() {
        let client = OidcClient {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            client_secret_expires_at: 1_000,
        };
        assert!(client.is_valid_at(999_999));
        assert!(!client.is_valid_at(1_000_000));
    }

    #[test]
    fn test_token_expiry_is_in_millis() {
        let token = SsoToken {
            access_token: "t".to_string(),
            expires_at: 5_000,
        };
        assert!(token.is_valid_at(4_999));
        assert!(!token.is_valid_at(5_000));
    }

    #[test]
    fn test_cached_shapes_use_camel_case() {
        let token = SsoToken {
            access_token: "t".to_string(),
            expires_at: 42,
        };
        assert_eq!(
            serde_json::to_value(&token).unwrap(),
            serde_json::json!({"accessToken": "t", "expiresAt": 42})
        );
    }

    #[test]
    fn test_prefers_complete_verification_uri() {
        let opener = FlakyOpener {
            opened: Mutex::new(Vec::new()),
            fail_first: false,
        };
        open_verification_page(&opener, &authorization());
        assert_eq!(
            *opener.opened.lock().unwrap(),
            vec!["https://device.sso.aws/?user_code=ABCD-EFGH"]
        );
    }

    #[test]
    fn test_falls_back_to_plain_verification_uri() {
        let opener = FlakyOpener {
            opened: Mutex::new(Vec::new()),
            fail_first: true,
        };
        open_verification_page(&opener, &authorization());
        assert_eq!(opener.opened.lock().unwrap().len(), 2);
        assert_eq!(opener.opened.lock().unwrap()[1], "https://device.sso.aws/");
    }
}
