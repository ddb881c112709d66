//! Accounts and roles reachable through an sso-session.

use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_sso::error::DisplayErrorContext;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::device_auth::{SsoAuthenticator, TokenMode};
use super::sdk_config;
use crate::app::aws_config::{Config, SsoSession};
use crate::app::credential_chain::AwsCredentials;
use crate::app::error::{ConsoleError, Result};

/// One role the signed-in user may assume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsoRole {
    pub account_id: String,
    pub account_name: String,
    pub role_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsoAccount {
    pub account_id: String,
    pub account_name: String,
}

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<String>,
}

/// The SSO portal operations.
#[async_trait]
pub trait SsoApi: Send + Sync {
    async fn list_accounts(
        &self,
        region: &str,
        access_token: &str,
        page_size: i32,
        next_token: Option<String>,
    ) -> Result<Page<SsoAccount>>;

    /// Role names for `account_id`.
    async fn list_account_roles(
        &self,
        region: &str,
        access_token: &str,
        account_id: &str,
        page_size: i32,
        next_token: Option<String>,
    ) -> Result<Page<String>>;

    async fn get_role_credentials(
        &self,
        region: &str,
        access_token: &str,
        account_id: &str,
        role_name: &str,
    ) -> Result<AwsCredentials>;
}

/// [`SsoApi`] backed by `aws-sdk-sso`.
#[derive(Debug, Clone)]
pub struct AwsSsoApi {
    max_attempts: u32,
}

impl AwsSsoApi {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    async fn client(&self, region: &str) -> aws_sdk_sso::Client {
        aws_sdk_sso::Client::new(&sdk_config(region, self.max_attempts).await)
    }
}

fn sso_error<E>(operation: &str, e: E) -> ConsoleError
where
    E: std::error::Error + 'static,
{
    ConsoleError::Sso(format!("{}: {}", operation, DisplayErrorContext(e)))
}

#[async_trait]
impl SsoApi for AwsSsoApi {
    async fn list_accounts(
        &self,
        region: &str,
        access_token: &str,
        page_size: i32,
        next_token: Option<String>,
    ) -> Result<Page<SsoAccount>> {
        let resp = self
            .client(region)
            .await
            .list_accounts()
            .access_token(access_token)
            .max_results(page_size)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| sso_error("ListAccounts", e))?;

        let items = resp
            .account_list
            .unwrap_or_default()
            .into_iter()
            .filter_map(|account| {
                let account_id = account.account_id?;
                Some(SsoAccount {
                    account_name: account.account_name.unwrap_or_else(|| account_id.clone()),
                    account_id,
                })
            })
            .collect();

        Ok(Page {
            items,
            next_token: resp.next_token,
        })
    }

    async fn list_account_roles(
        &self,
        region: &str,
        access_token: &str,
        account_id: &str,
        page_size: i32,
        next_token: Option<String>,
    ) -> Result<Page<String>> {
        let resp = self
            .client(region)
            .await
            .list_account_roles()
            .access_token(access_token)
            .account_id(account_id)
            .max_results(page_size)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| sso_error("ListAccountRoles", e))?;

        let items = resp
            .role_list
            .unwrap_or_default()
            .into_iter()
            .filter_map(|role| role.role_name)
            .collect();

        Ok(Page {
            items,
            next_token: resp.next_token,
        })
    }

    async fn get_role_credentials(
        &self,
        region: &str,
        access_token: &str,
        account_id: &str,
        role_name: &str,
    ) -> Result<AwsCredentials> {
        let resp = self
            .client(region)
            .await
            .get_role_credentials()
            .access_token(access_token)
            .account_id(account_id)
            .role_name(role_name)
            .send()
            .await
            .map_err(|e| sso_error("GetRoleCredentials", e))?;

        let creds = resp
            .role_credentials
            .ok_or_else(|| ConsoleError::Sso("no credentials returned for role".to_string()))?;

        match (creds.access_key_id, creds.secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => Ok(AwsCredentials {
                access_key_id,
                secret_access_key,
                session_token: creds.session_token,
                // Milliseconds since the epoch.
                expiration: DateTime::from_timestamp_millis(creds.expiration),
            }),
            _ => Err(ConsoleError::Sso(format!(
                "incomplete credentials for {} in {}",
                role_name, account_id
            ))),
        }
    }
}

/// Lists roles for an sso-session after logging in through the device flow.
pub struct SsoRoleLister {
    authenticator: Arc<SsoAuthenticator>,
    api: Arc<dyn SsoApi>,
    page_size: i32,
}

impl SsoRoleLister {
    pub fn new(authenticator: Arc<SsoAuthenticator>, api: Arc<dyn SsoApi>, page_size: i32) -> Self {
        Self {
            authenticator,
            api,
            page_size: page_size.max(1),
        }
    }

    /// Find the sso-session for `name`, which is either an sso-session or a
    /// profile that references one.
    pub fn session_for<'a>(config: &'a Config, name: &str) -> Result<(&'a str, &'a SsoSession)> {
        if let Some((session_name, session)) = config.sso_sessions.get_key_value(name) {
            return Ok((session_name.as_str(), session));
        }

        let profile = config
            .profiles
            .get(name)
            .ok_or_else(|| ConsoleError::UnknownSsoSession(name.to_string()))?;
        let session_name = profile
            .sso_session
            .as_deref()
            .ok_or_else(|| ConsoleError::MissingKey {
                entry: name.to_string(),
                key: "sso_session",
            })?;
        let (session_name, session) = config
            .sso_sessions
            .get_key_value(session_name)
            .ok_or_else(|| ConsoleError::UnknownSsoSession(session_name.to_string()))?;
        Ok((session_name.as_str(), session))
    }

    /// Every (account, role) pair visible to the user, in listing order.
    ///
    /// Stops before the next page request once `request_id` is cancelled.
    pub async fn list_roles(
        &self,
        config: &Config,
        name: &str,
        request_id: &str,
    ) -> Result<Vec<SsoRole>> {
        let (session_name, session) = Self::session_for(config, name)?;
        let region = session.region(session_name)?;
        let access_token = self
            .authenticator
            .get_access_token(name, session_name, session, request_id, TokenMode::Interactive)
            .await?;

        let guard = self.authenticator.requests().register(request_id)?;

        let mut accounts = Vec::new();
        let mut next_token = None;
        loop {
            guard.ensure_live()?;
            let page = self
                .api
                .list_accounts(region, &access_token, self.page_size, next_token)
                .await?;
            accounts.extend(page.items);
            next_token = page.next_token.filter(|token| !token.is_empty());
            if next_token.is_none() {
                break;
            }
        }
        debug!("{} accounts visible through {}", accounts.len(), session_name);

        let mut roles = Vec::new();
        for account in &accounts {
            let mut next_token = None;
            loop {
                guard.ensure_live()?;
                let page = self
                    .api
                    .list_account_roles(
                        region,
                        &access_token,
                        &account.account_id,
                        self.page_size,
                        next_token,
                    )
                    .await?;
                roles.extend(page.items.into_iter().map(|role_name| SsoRole {
                    account_id: account.account_id.clone(),
                    account_name: account.account_name.clone(),
                    role_name,
                }));
                next_token = page.next_token.filter(|token| !token.is_empty());
                if next_token.is_none() {
                    break;
                }
            }
        }

        info!(
            "Found {} roles in {} accounts for {}",
            roles.len(),
            accounts.len(),
            name
        );
        Ok(roles)
    }

    /// Credentials for `role_name` in `account_id`.
    pub async fn role_credentials(
        &self,
        session_name: &str,
        session: &SsoSession,
        access_token: &str,
        account_id: &str,
        role_name: &str,
    ) -> Result<AwsCredentials> {
        let region = session.region(session_name)?;
        self.api
            .get_role_credentials(region, access_token, account_id, role_name)
            .await
    }
}
