//! # Credential Chain Executor
//!
//! Turns a resolved profile chain into temporary credentials by folding from
//! the credentials root to the requested profile, one STS AssumeRole per
//! profile that carries a `role_arn`. Each hop authenticates with the
//! credentials produced by the hop before it.
//!
//! ```text
//! [credentials root] --AssumeRole(mid.role_arn)--> [mid] --AssumeRole(leaf.role_arn)--> [leaf]
//! ```
//!
//! The MFA serial and token code are sent on the first hop whose profile has
//! `mfa_serial` and never again, so a chain prompts for at most one code.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_sts::error::DisplayErrorContext;
use aws_types::region::Region;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::app::aws_config::{resolve_chain, Config, CredentialsEntry};
use crate::app::error::{ConsoleError, Result};

/// Longest RoleSessionName STS accepts.
pub const MAX_SESSION_NAME_LEN: usize = 64;

/// A set of AWS credentials, long-term or temporary.
#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub expiration: Option<DateTime<Utc>>,
}

impl AwsCredentials {
    pub fn to_sdk_credentials(&self) -> Credentials {
        Credentials::from_keys(
            &self.access_key_id,
            &self.secret_access_key,
            self.session_token.clone(),
        )
    }
}

impl From<&CredentialsEntry> for AwsCredentials {
    fn from(entry: &CredentialsEntry) -> Self {
        Self {
            access_key_id: entry.aws_access_key_id.clone(),
            secret_access_key: entry.aws_secret_access_key.clone(),
            session_token: entry.aws_session_token.clone(),
            expiration: None,
        }
    }
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** redacted **")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "** redacted **"),
            )
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Parameters of one AssumeRole hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssumeRoleRequest {
    /// Profile whose `role_arn` is being assumed, for error reporting.
    pub profile: String,
    pub role_arn: String,
    pub role_session_name: String,
    pub serial_number: Option<String>,
    pub token_code: Option<String>,
    pub duration_seconds: Option<i32>,
    pub region: String,
}

#[async_trait]
pub trait StsApi: Send + Sync {
    /// Assume `request.role_arn` using `credentials`. Failures are `AssumeRole` errors.
    async fn assume_role(
        &self,
        credentials: &AwsCredentials,
        request: &AssumeRoleRequest,
    ) -> Result<AwsCredentials>;
}

/// [`StsApi`] backed by `aws-sdk-sts`, with a fresh client per hop.
#[derive(Debug, Clone, Default)]
pub struct AwsStsApi;

#[async_trait]
impl StsApi for AwsStsApi {
    async fn assume_role(
        &self,
        credentials: &AwsCredentials,
        request: &AssumeRoleRequest,
    ) -> Result<AwsCredentials> {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(request.region.clone()))
            .credentials_provider(credentials.to_sdk_credentials())
            .load()
            .await;
        let sts = aws_sdk_sts::Client::new(&config);

        let resp = sts
            .assume_role()
            .role_arn(&request.role_arn)
            .role_session_name(&request.role_session_name)
            .set_serial_number(request.serial_number.clone())
            .set_token_code(request.token_code.clone())
            .set_duration_seconds(request.duration_seconds)
            .send()
            .await
            .map_err(|e| ConsoleError::AssumeRole {
                profile: request.profile.clone(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        let creds = resp.credentials().ok_or_else(|| ConsoleError::AssumeRole {
            profile: request.profile.clone(),
            message: "STS returned no credentials".to_string(),
        })?;

        Ok(AwsCredentials {
            access_key_id: creds.access_key_id().to_string(),
            secret_access_key: creds.secret_access_key().to_string(),
            session_token: Some(creds.session_token().to_string()),
            expiration: DateTime::from_timestamp(creds.expiration().secs(), 0),
        })
    }
}

/// Restrict `raw` to STS's `[\w+=,.@-]` alphabet and length limit.
pub fn sanitize_session_name(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || "_+=,.@-".contains(c) {
                c
            } else {
                '-'
            }
        })
        .take(MAX_SESSION_NAME_LEN)
        .collect()
}

pub struct CredentialChainExecutor {
    sts: Arc<dyn StsApi>,
    default_region: String,
}

impl CredentialChainExecutor {
    pub fn new(sts: Arc<dyn StsApi>, default_region: impl Into<String>) -> Self {
        Self {
            sts,
            default_region: default_region.into(),
        }
    }

    /// Temporary credentials for `profile_name`.
    ///
    /// `token_code` is the current MFA code, sent with the first hop whose
    /// profile has an `mfa_serial`.
    pub async fn role_credentials(
        &self,
        config: &Config,
        token_code: Option<&str>,
        profile_name: &str,
    ) -> Result<AwsCredentials> {
        let target = config.profile(profile_name)?;
        let chain = resolve_chain(&config.profiles, profile_name)?;
        let region = target
            .region
            .clone()
            .unwrap_or_else(|| self.default_region.clone());

        let Some(root) = chain.first() else {
            return Err(ConsoleError::UnknownProfile(profile_name.to_string()));
        };
        let mut credentials: AwsCredentials = config
            .credentials
            .get(root)
            .map(AwsCredentials::from)
            .ok_or_else(|| ConsoleError::MissingCredentials(root.clone()))?;
        debug!("Credential chain for {}: {}", profile_name, chain.join(" -> "));

        let mut mfa_sent = false;
        for name in &chain {
            let Some(hop) = config.profiles.get(name) else {
                continue;
            };
            let Some(role_arn) = hop.role_arn.as_ref() else {
                continue;
            };

            let (serial_number, hop_token_code) = match hop.mfa_serial.as_ref() {
                Some(serial) if !mfa_sent => {
                    mfa_sent = true;
                    (
                        Some(serial.clone()),
                        Some(token_code.unwrap_or_default().to_string()),
                    )
                }
                _ => (None, None),
            };

            let request = AssumeRoleRequest {
                profile: name.clone(),
                role_arn: role_arn.clone(),
                role_session_name: sanitize_session_name(&format!(
                    "{}{}",
                    profile_name,
                    Utc::now().timestamp_millis()
                )),
                serial_number,
                token_code: hop_token_code,
                duration_seconds: hop.duration_seconds,
                region: region.clone(),
            };
            debug!("Assuming {} for profile {}", role_arn, name);
            credentials = self.sts.assume_role(&credentials, &request).await?;
        }

        info!("Obtained credentials for profile {}", profile_name);
        Ok(credentials)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::app::aws_config::Profile;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Issues `ASIA<n>` keys and records every request with the caller's key.
    #[derive(Default)]
    pub(crate) struct FakeSts {
        pub requests: Mutex<Vec<(String, AssumeRoleRequest)>>,
        pub reject_role: Option<String>,
    }

    #[async_trait]
    impl StsApi for FakeSts {
        async fn assume_role(
            &self,
            credentials: &AwsCredentials,
            request: &AssumeRoleRequest,
        ) -> Result<AwsCredentials> {
            if self.reject_role.as_deref() == Some(request.role_arn.as_str()) {
                return Err(ConsoleError::AssumeRole {
                    profile: request.profile.clone(),
                    message: "AccessDenied".to_string(),
                });
            }
            let mut requests = self.requests.lock().unwrap();
            requests.push((credentials.access_key_id.clone(), request.clone()));
            Ok(AwsCredentials {
                access_key_id: format!("ASIA{}", requests.len()),
                secret_access_key: "temporary".to_string(),
                session_token: Some("session".to_string()),
                expiration: None,
            })
        }
    }

    fn role(source: Option<&str>, arn: &str) -> Profile {
        Profile {
            source_profile: source.map(str::to_string),
            role_arn: Some(arn.to_string()),
            ..Profile::default()
        }
    }

    pub(crate) fn long_term(key: &str) -> CredentialsEntry {
        CredentialsEntry {
            aws_access_key_id: key.to_string(),
            aws_secret_access_key: "long-term-secret".to_string(),
            aws_session_token: None,
        }
    }

    fn config(profiles: Vec<(&str, Profile)>, credentials: Vec<(&str, CredentialsEntry)>) -> Config {
        Config::from_parts(
            profiles
                .into_iter()
                .map(|(name, profile)| (name.to_string(), profile))
                .collect::<BTreeMap<_, _>>(),
            BTreeMap::new(),
            credentials
                .into_iter()
                .map(|(name, entry)| (name.to_string(), entry))
                .collect(),
        )
    }

    fn executor(sts: Arc<FakeSts>) -> CredentialChainExecutor {
        CredentialChainExecutor::new(sts, "us-east-1")
    }

    #[test]
    fn test_session_name_is_sanitized() {
        assert_eq!(sanitize_session_name("dev admin/1"), "dev-admin-1");
        assert_eq!(sanitize_session_name("a.b@c=d,e+f_g-h"), "a.b@c=d,e+f_g-h");
        assert_eq!(sanitize_session_name(&"x".repeat(100)).len(), MAX_SESSION_NAME_LEN);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let credentials = AwsCredentials::from(&long_term("AKIAEXAMPLE"));
        let rendered = format!("{:?}", credentials);
        assert!(rendered.contains("AKIAEXAMPLE"));
        assert!(!rendered.contains("long-term-secret"));
    }

    #[tokio::test]
    async fn test_two_hop_chain_feeds_each_hop() {
        let mut mid = role(Some("base"), "arn:aws:iam::111:role/mid");
        mid.mfa_serial = Some("arn:aws:iam::000:mfa/me".to_string());
        let mut leaf = role(Some("mid"), "arn:aws:iam::222:role/leaf");
        leaf.region = Some("eu-central-1".to_string());
        leaf.duration_seconds = Some(1800);
        let config = config(
            vec![("mid", mid), ("leaf", leaf)],
            vec![("base", long_term("AKIABASE"))],
        );

        let sts = Arc::new(FakeSts::default());
        let credentials = executor(sts.clone())
            .role_credentials(&config, Some("123456"), "leaf")
            .await
            .unwrap();
        assert_eq!(credentials.access_key_id, "ASIA2");

        let requests = sts.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);

        let (caller, first) = &requests[0];
        assert_eq!(caller, "AKIABASE");
        assert_eq!(first.role_arn, "arn:aws:iam::111:role/mid");
        assert_eq!(first.serial_number.as_deref(), Some("arn:aws:iam::000:mfa/me"));
        assert_eq!(first.token_code.as_deref(), Some("123456"));
        assert_eq!(first.region, "eu-central-1");
        assert!(first.role_session_name.starts_with("leaf"));

        let (caller, second) = &requests[1];
        assert_eq!(caller, "ASIA1");
        assert_eq!(second.role_arn, "arn:aws:iam::222:role/leaf");
        assert_eq!(second.serial_number, None);
        assert_eq!(second.token_code, None);
        assert_eq!(second.duration_seconds, Some(1800));
    }

    #[tokio::test]
    async fn test_mfa_sent_only_once() {
        let mut mid = role(Some("base"), "arn:aws:iam::111:role/mid");
        mid.mfa_serial = Some("mfa-1".to_string());
        let mut leaf = role(Some("mid"), "arn:aws:iam::222:role/leaf");
        leaf.mfa_serial = Some("mfa-2".to_string());
        let config = config(
            vec![("mid", mid), ("leaf", leaf)],
            vec![("base", long_term("AKIABASE"))],
        );

        let sts = Arc::new(FakeSts::default());
        executor(sts.clone())
            .role_credentials(&config, Some("654321"), "leaf")
            .await
            .unwrap();

        let serials: Vec<Option<String>> = sts
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|(_, request)| request.serial_number.clone())
            .collect();
        assert_eq!(serials, vec![Some("mfa-1".to_string()), None]);
    }

    #[tokio::test]
    async fn test_self_sourced_role_assumes_from_own_credentials() {
        let config = config(
            vec![("ops", Profile {
                role_arn: Some("arn:aws:iam::333:role/ops".to_string()),
                ..Profile::default()
            })],
            vec![("ops", long_term("AKIAOPS"))],
        );

        let sts = Arc::new(FakeSts::default());
        executor(sts.clone())
            .role_credentials(&config, None, "ops")
            .await
            .unwrap();

        let requests = sts.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, "AKIAOPS");
        assert_eq!(requests[0].1.region, "us-east-1");
    }

    #[tokio::test]
    async fn test_plain_credentials_profile_needs_no_sts() {
        let config = config(
            vec![("plain", Profile::default())],
            vec![("plain", long_term("AKIAPLAIN"))],
        );

        let sts = Arc::new(FakeSts::default());
        let credentials = executor(sts.clone())
            .role_credentials(&config, None, "plain")
            .await
            .unwrap();

        assert_eq!(credentials.access_key_id, "AKIAPLAIN");
        assert!(sts.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_root_credentials() {
        let config = config(
            vec![("leaf", role(Some("base"), "arn:aws:iam::1:role/x"))],
            Vec::new(),
        );
        let result = executor(Arc::new(FakeSts::default()))
            .role_credentials(&config, None, "leaf")
            .await;
        assert!(matches!(result, Err(ConsoleError::MissingCredentials(name)) if name == "base"));
    }

    #[tokio::test]
    async fn test_rejection_stops_the_chain() {
        let config = config(
            vec![
                ("mid", role(Some("base"), "arn:aws:iam::111:role/mid")),
                ("leaf", role(Some("mid"), "arn:aws:iam::222:role/leaf")),
            ],
            vec![("base", long_term("AKIABASE"))],
        );
        let sts = Arc::new(FakeSts {
            reject_role: Some("arn:aws:iam::111:role/mid".to_string()),
            ..FakeSts::default()
        });

        let result = executor(sts.clone())
            .role_credentials(&config, None, "leaf")
            .await;
        assert!(matches!(result, Err(ConsoleError::AssumeRole { profile, .. }) if profile == "mid"));
        assert!(sts.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_profile() {
        let config = config(Vec::new(), Vec::new());
        let result = executor(Arc::new(FakeSts::default()))
            .role_credentials(&config, None, "ghost")
            .await;
        assert!(matches!(result, Err(ConsoleError::UnknownProfile(_))));
    }
}
