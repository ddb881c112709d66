//! SSO OIDC device authorization flow.
//!
//! ```text
//! Unregistered ──RegisterClient──▶ ClientRegistered ──StartDeviceAuthorization──▶
//!     AuthorizationStarted ──(browser opened)──▶ Polling ──CreateToken──▶
//!         Succeeded | Expired | Cancelled | Failed
//! ```
//!
//! Client registrations and access tokens are cached in the settings store
//! under the caller's cache key (a profile or sso-session name), so a second
//! launch within the token lifetime never touches the network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_ssooidc::error::DisplayErrorContext;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::requests::{PendingRequests, RequestGuard};
use super::{
    now_millis, open_verification_page, sdk_config, DeviceAuthorization, OidcApi, OidcClient,
    SsoToken, TokenPoll, UrlOpener, DEFAULT_SCOPE, DEVICE_GRANT,
};
use crate::app::aws_config::SsoSession;
use crate::app::error::{ConsoleError, Result};
use crate::app::settings_store::{get_typed, SettingsStore, OIDC_CLIENTS, SSO_TOKENS};

/// Whether a missing token may start an interactive browser login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenMode {
    #[default]
    Interactive,
    /// Only return a cached token; fail with `TokenNotCached` otherwise.
    CacheOnly,
}

/// Drives the device flow and owns its caches.
pub struct SsoAuthenticator {
    store: Arc<dyn SettingsStore>,
    api: Arc<dyn OidcApi>,
    opener: Arc<dyn UrlOpener>,
    requests: PendingRequests,
    client_name: String,
}

impl SsoAuthenticator {
    pub fn new(
        store: Arc<dyn SettingsStore>,
        api: Arc<dyn OidcApi>,
        opener: Arc<dyn UrlOpener>,
        requests: PendingRequests,
        client_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            api,
            opener,
            requests,
            client_name: client_name.into(),
        }
    }

    pub fn requests(&self) -> &PendingRequests {
        &self.requests
    }

    /// Stop the flow for `request_id`. Returns whether it was pending.
    pub fn cancel(&self, request_id: &str) -> bool {
        self.requests.cancel(request_id)
    }

    /// The cached token for `cache_key`, if it has not expired.
    pub async fn cached_token(&self, cache_key: &str) -> Result<Option<SsoToken>> {
        let token: Option<SsoToken> = self.load(SSO_TOKENS, cache_key).await?;
        Ok(token.filter(|token| token.is_valid_at(now_millis())))
    }

    async fn load<T>(&self, namespace: &'static str, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let key = key.to_string();
        tokio::task::spawn_blocking(move || get_typed(store.as_ref(), namespace, &key))
            .await
            .map_err(|e| ConsoleError::Settings(format!("settings read task failed: {}", e)))?
    }

    async fn save<T>(&self, namespace: &'static str, key: &str, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        let value =
            serde_json::to_value(value).map_err(|e| ConsoleError::Settings(e.to_string()))?;
        let store = Arc::clone(&self.store);
        let key = key.to_string();
        tokio::task::spawn_blocking(move || store.set(namespace, &key, value))
            .await
            .map_err(|e| ConsoleError::Settings(format!("settings write task failed: {}", e)))?
    }

    /// Return an access token for `session`, running the device flow when no
    /// valid token is cached under `cache_key`.
    pub async fn get_access_token(
        &self,
        cache_key: &str,
        session_name: &str,
        session: &SsoSession,
        request_id: &str,
        mode: TokenMode,
    ) -> Result<String> {
        if let Some(token) = self.cached_token(cache_key).await? {
            debug!("Using cached SSO token for {}", cache_key);
            return Ok(token.access_token);
        }
        if mode == TokenMode::CacheOnly {
            return Err(ConsoleError::TokenNotCached(cache_key.to_string()));
        }

        let start_url = session.start_url(session_name)?;
        let region = session.region(session_name)?;
        let guard = self.requests.register(request_id)?;

        let client = self
            .oidc_client(cache_key, region, start_url, &session.sso_registration_scopes)
            .await?;
        guard.ensure_live()?;

        let authorization = self
            .api
            .start_device_authorization(region, &client, start_url)
            .await?;
        info!(
            "Waiting for SSO approval of {} (code {})",
            cache_key,
            authorization.user_code.as_deref().unwrap_or("-")
        );
        open_verification_page(self.opener.as_ref(), &authorization);

        let token = self
            .poll_for_token(&guard, region, &client, &authorization)
            .await?;
        self.save(SSO_TOKENS, cache_key, &token).await?;
        info!("SSO login for {} succeeded", cache_key);
        Ok(token.access_token)
    }

    async fn oidc_client(
        &self,
        cache_key: &str,
        region: &str,
        start_url: &str,
        scopes: &[String],
    ) -> Result<OidcClient> {
        let cached: Option<OidcClient> = self.load(OIDC_CLIENTS, cache_key).await?;
        if let Some(client) = cached.filter(|client| client.is_valid_at(now_millis())) {
            debug!("Reusing OIDC client registration for {}", cache_key);
            return Ok(client);
        }

        let scopes = if scopes.is_empty() {
            vec![DEFAULT_SCOPE.to_string()]
        } else {
            scopes.to_vec()
        };
        let client = self
            .api
            .register_client(region, &self.client_name, start_url, &scopes)
            .await?;
        self.save(OIDC_CLIENTS, cache_key, &client).await?;
        debug!("Registered OIDC client for {}", cache_key);
        Ok(client)
    }

    async fn poll_for_token(
        &self,
        guard: &RequestGuard,
        region: &str,
        client: &OidcClient,
        authorization: &DeviceAuthorization,
    ) -> Result<SsoToken> {
        let deadline = Instant::now() + seconds(authorization.expires_in);
        let interval = seconds(authorization.interval);

        loop {
            guard.ensure_live()?;
            if Instant::now() >= deadline {
                warn!("Device authorization for {} expired", guard.request_id());
                return Err(ConsoleError::DeviceAuthorizationExpired);
            }

            match self
                .api
                .create_token(region, client, &authorization.device_code)
                .await?
            {
                TokenPoll::Issued {
                    access_token,
                    expires_in,
                } => {
                    return Ok(SsoToken {
                        access_token,
                        expires_at: now_millis() + i64::from(expires_in) * 1000,
                    });
                }
                TokenPoll::Expired => {
                    warn!("Device code for {} expired", guard.request_id());
                    return Err(ConsoleError::DeviceAuthorizationExpired);
                }
                TokenPoll::Pending => {
                    tokio::select! {
                        _ = guard.token().cancelled() => {
                            return Err(ConsoleError::DeviceAuthorizationCancelled);
                        }
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
            }
        }
    }
}

fn seconds(value: i32) -> Duration {
    Duration::from_secs(u64::try_from(value).unwrap_or(0))
}

/// [`OidcApi`] backed by `aws-sdk-ssooidc`.
#[derive(Debug, Clone)]
pub struct AwsOidcApi {
    max_attempts: u32,
}

impl AwsOidcApi {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    async fn client(&self, region: &str) -> aws_sdk_ssooidc::Client {
        aws_sdk_ssooidc::Client::new(&sdk_config(region, self.max_attempts).await)
    }
}

#[async_trait]
impl OidcApi for AwsOidcApi {
    async fn register_client(
        &self,
        region: &str,
        client_name: &str,
        start_url: &str,
        scopes: &[String],
    ) -> Result<OidcClient> {
        let resp = self
            .client(region)
            .await
            .register_client()
            .client_name(client_name)
            .client_type("public")
            .grant_types(DEVICE_GRANT)
            .issuer_url(start_url)
            .set_scopes(Some(scopes.to_vec()))
            .send()
            .await
            .map_err(|e| {
                ConsoleError::SsoOidc(format!("RegisterClient: {}", DisplayErrorContext(&e)))
            })?;

        match (resp.client_id(), resp.client_secret()) {
            (Some(client_id), Some(client_secret)) => Ok(OidcClient {
                client_id: client_id.to_string(),
                client_secret: client_secret.to_string(),
                client_secret_expires_at: resp.client_secret_expires_at(),
            }),
            _ => Err(ConsoleError::SsoOidc(
                "RegisterClient returned no client credentials".to_string(),
            )),
        }
    }

    async fn start_device_authorization(
        &self,
        region: &str,
        client: &OidcClient,
        start_url: &str,
    ) -> Result<DeviceAuthorization> {
        let resp = self
            .client(region)
            .await
            .start_device_authorization()
            .client_id(&client.client_id)
            .client_secret(&client.client_secret)
            .start_url(start_url)
            .send()
            .await
            .map_err(|e| {
                ConsoleError::SsoOidc(format!(
                    "StartDeviceAuthorization: {}",
                    DisplayErrorContext(&e)
                ))
            })?;

        let device_code = resp.device_code().ok_or_else(|| {
            ConsoleError::SsoOidc("StartDeviceAuthorization returned no device code".to_string())
        })?;

        Ok(DeviceAuthorization {
            device_code: device_code.to_string(),
            user_code: resp.user_code().map(str::to_string),
            verification_uri: resp.verification_uri().map(str::to_string),
            verification_uri_complete: resp.verification_uri_complete().map(str::to_string),
            expires_in: resp.expires_in(),
            interval: resp.interval(),
        })
    }

    async fn create_token(
        &self,
        region: &str,
        client: &OidcClient,
        device_code: &str,
    ) -> Result<TokenPoll> {
        let result = self
            .client(region)
            .await
            .create_token()
            .client_id(&client.client_id)
            .client_secret(&client.client_secret)
            .grant_type(DEVICE_GRANT)
            .device_code(device_code)
            .send()
            .await;

        match result {
            Ok(resp) => {
                let access_token = resp.access_token().ok_or_else(|| {
                    ConsoleError::SsoOidc("CreateToken returned no access token".to_string())
                })?;
                Ok(TokenPoll::Issued {
                    access_token: access_token.to_string(),
                    expires_in: resp.expires_in(),
                })
            }
            Err(e)
                if e.as_service_error()
                    .is_some_and(|err| err.is_authorization_pending_exception()) =>
            {
                Ok(TokenPoll::Pending)
            }
            Err(e) if e.as_service_error().is_some_and(|err| err.is_expired_token_exception()) => {
                Ok(TokenPoll::Expired)
            }
            Err(e) => Err(ConsoleError::SsoOidc(format!(
                "CreateToken: {}",
                DisplayErrorContext(&e)
            ))),
        }
    }
}
