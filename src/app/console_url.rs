//! # Console URL Signer
//!
//! Exchanges temporary credentials for a sign-in token at the AWS federation
//! endpoint and builds the login URL that opens the console with that session.
//!
//! 1. `GET federation?Action=getSigninToken&DurationSeconds=900&SessionType=json&Session={...}`
//! 2. `federation?Action=login&SigninToken=...&Destination=...&SessionDuration=43200`
//!
//! Query strings use `application/x-www-form-urlencoded` encoding.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::form_urlencoded;

use crate::app::credential_chain::AwsCredentials;
use crate::app::error::{ConsoleError, Result};

pub const FEDERATION_ENDPOINT: &str = "https://signin.aws.amazon.com/federation";
pub const DEFAULT_CONSOLE_URL: &str = "https://console.aws.amazon.com";
/// Region served by [`DEFAULT_CONSOLE_URL`].
pub const DEFAULT_CONSOLE_REGION: &str = "us-east-1";

/// Lifetime of the sign-in token itself.
pub const SIGNIN_TOKEN_DURATION_SECONDS: u32 = 900;
/// Lifetime of the console session opened with the token.
pub const CONSOLE_SESSION_DURATION_SECONDS: u32 = 43_200;

/// Console landing page for `region`.
pub fn console_url_for_region(region: Option<&str>) -> String {
    match region {
        Some(region) if !region.is_empty() && region != DEFAULT_CONSOLE_REGION => {
            format!("https://{}.console.aws.amazon.com", region)
        }
        _ => DEFAULT_CONSOLE_URL.to_string(),
    }
}

/// The federation endpoint with `params` as its query string.
pub fn federation_url(params: &[(&str, &str)]) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish();
    format!("{}?{}", FEDERATION_ENDPOINT, query)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FederationSession<'a> {
    session_id: &'a str,
    session_key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_token: Option<&'a str>,
}

#[derive(Deserialize)]
struct SigninResponse {
    #[serde(rename = "SigninToken")]
    signin_token: String,
}

pub fn signin_token_url(credentials: &AwsCredentials) -> Result<String> {
    let session = serde_json::to_string(&FederationSession {
        session_id: &credentials.access_key_id,
        session_key: &credentials.secret_access_key,
        session_token: credentials.session_token.as_deref(),
    })
    .map_err(|e| ConsoleError::SigninToken(e.to_string()))?;

    Ok(federation_url(&[
        ("Action", "getSigninToken"),
        (
            "DurationSeconds",
            &SIGNIN_TOKEN_DURATION_SECONDS.to_string(),
        ),
        ("SessionType", "json"),
        ("Session", &session),
    ]))
}

pub fn login_url(signin_token: &str, destination: &str) -> String {
    federation_url(&[
        ("Action", "login"),
        ("SigninToken", signin_token),
        ("Destination", destination),
        (
            "SessionDuration",
            &CONSOLE_SESSION_DURATION_SECONDS.to_string(),
        ),
    ])
}

/// HTTP access to the federation endpoint.
#[async_trait]
pub trait FederationHttp: Send + Sync {
    /// GET `url` and return the body of a successful response.
    async fn get(&self, url: &str) -> Result<String>;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestFederationHttp {
    client: reqwest::Client,
}

impl ReqwestFederationHttp {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FederationHttp for ReqwestFederationHttp {
    async fn get(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ConsoleError::SigninToken(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConsoleError::SigninToken(format!(
                "federation endpoint returned {}",
                status
            )));
        }

        response
            .text()
            .await
            .map_err(|e| ConsoleError::SigninToken(e.to_string()))
    }
}

pub struct ConsoleUrlSigner {
    http: Arc<dyn FederationHttp>,
}

impl ConsoleUrlSigner {
    pub fn new(http: Arc<dyn FederationHttp>) -> Self {
        Self { http }
    }

    pub async fn signin_token(&self, credentials: &AwsCredentials) -> Result<String> {
        let body = self.http.get(&signin_token_url(credentials)?).await?;
        let response: SigninResponse = serde_json::from_str(&body)
            .map_err(|e| ConsoleError::SigninToken(format!("unexpected response: {}", e)))?;
        debug!("Received federation signin token");
        Ok(response.signin_token)
    }

    /// Signed console URL for `credentials`, landing in `region`'s console.
    pub async fn console_url(
        &self,
        credentials: &AwsCredentials,
        region: Option<&str>,
    ) -> Result<String> {
        let token = self.signin_token(credentials).await?;
        let destination = console_url_for_region(region);
        info!("Signed console URL for {}", destination);
        Ok(login_url(&token, &destination))
    }
}
