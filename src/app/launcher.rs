//! # Console Launcher
//!
//! Single entry point for "open a console for this profile". Profiles that
//! reference an sso-session go through the device flow and
//! GetRoleCredentials; every other profile goes through the credential chain.
//! Both paths end at the federation signer.

use std::sync::Arc;

use tracing::info;

use crate::app::aws_config::{Config, Profile};
use crate::app::console_url::{ConsoleUrlSigner, ReqwestFederationHttp};
use crate::app::credential_chain::{AwsCredentials, AwsStsApi, CredentialChainExecutor};
use crate::app::error::{ConsoleError, Result};
use crate::app::settings::AppSettings;
use crate::app::settings_store::SettingsStore;
use crate::app::sso::{
    AwsOidcApi, AwsSsoApi, PendingRequests, SsoAuthenticator, SsoRole, SsoRoleLister,
    SystemBrowser, TokenMode, UrlOpener,
};

pub struct ConsoleLauncher {
    chain: CredentialChainExecutor,
    authenticator: Arc<SsoAuthenticator>,
    roles: SsoRoleLister,
    signer: ConsoleUrlSigner,
}

impl ConsoleLauncher {
    pub fn new(
        chain: CredentialChainExecutor,
        authenticator: Arc<SsoAuthenticator>,
        roles: SsoRoleLister,
        signer: ConsoleUrlSigner,
    ) -> Self {
        Self {
            chain,
            authenticator,
            roles,
            signer,
        }
    }

    /// Launcher talking to AWS, opening verification pages in the default browser.
    pub fn from_settings(settings: &AppSettings, store: Arc<dyn SettingsStore>) -> Self {
        Self::with_opener(settings, store, Arc::new(SystemBrowser))
    }

    pub fn with_opener(
        settings: &AppSettings,
        store: Arc<dyn SettingsStore>,
        opener: Arc<dyn UrlOpener>,
    ) -> Self {
        let authenticator = Arc::new(SsoAuthenticator::new(
            store,
            Arc::new(AwsOidcApi::new(settings.sso_max_attempts)),
            opener,
            PendingRequests::new(),
            settings.oidc_client_name.clone(),
        ));
        let roles = SsoRoleLister::new(
            Arc::clone(&authenticator),
            Arc::new(AwsSsoApi::new(settings.sso_max_attempts)),
            settings.sso_page_size(),
        );

        Self::new(
            CredentialChainExecutor::new(Arc::new(AwsStsApi), settings.default_region.clone()),
            authenticator,
            roles,
            ConsoleUrlSigner::new(Arc::new(ReqwestFederationHttp::default())),
        )
    }

    /// Signed federation URL for `profile_name`.
    ///
    /// `token_code` is only used by chains with an `mfa_serial`; `request_id`
    /// identifies an SSO login so it can be cancelled.
    pub async fn console_url(
        &self,
        config: &Config,
        profile_name: &str,
        token_code: Option<&str>,
        request_id: &str,
    ) -> Result<String> {
        let profile = config.profile(profile_name)?;
        let credentials = match profile.sso_session.as_deref() {
            Some(session_name) => {
                self.sso_credentials(config, profile_name, profile, session_name, request_id)
                    .await?
            }
            None => {
                self.chain
                    .role_credentials(config, token_code, profile_name)
                    .await?
            }
        };

        let url = self
            .signer
            .console_url(&credentials, profile.region.as_deref())
            .await?;
        info!("Console URL ready for {}", profile_name);
        Ok(url)
    }

    async fn sso_credentials(
        &self,
        config: &Config,
        profile_name: &str,
        profile: &Profile,
        session_name: &str,
        request_id: &str,
    ) -> Result<AwsCredentials> {
        let session = config.sso_session(session_name)?;
        let account_id = profile
            .sso_account_id
            .as_deref()
            .ok_or_else(|| ConsoleError::MissingKey {
                entry: profile_name.to_string(),
                key: "sso_account_id",
            })?;
        let role_name = profile
            .sso_role_name
            .as_deref()
            .ok_or_else(|| ConsoleError::MissingKey {
                entry: profile_name.to_string(),
                key: "sso_role_name",
            })?;

        let access_token = self
            .authenticator
            .get_access_token(
                profile_name,
                session_name,
                session,
                request_id,
                TokenMode::Interactive,
            )
            .await?;
        self.roles
            .role_credentials(session_name, session, &access_token, account_id, role_name)
            .await
    }

    /// Every role reachable through the sso-session `name` (or a profile using one).
    pub async fn list_sso_roles(
        &self,
        config: &Config,
        name: &str,
        request_id: &str,
    ) -> Result<Vec<SsoRole>> {
        self.roles.list_roles(config, name, request_id).await
    }

    /// Abort the SSO login or listing running under `request_id`.
    pub fn cancel(&self, request_id: &str) -> bool {
        self.authenticator.cancel(request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::aws_config::CredentialsEntry;
    use crate::app::console_url::tests::FakeFederation;
    use crate::app::credential_chain::tests::{long_term, FakeSts};
    use crate::app::settings_store::{set_typed, MemorySettingsStore, SSO_TOKENS};
    use crate::app::sso::device_auth::tests::{FakeOidc, NoBrowser};
    use crate::app::sso::role_lister::tests::{sso_config, FakeSso};
    use crate::app::sso::{now_millis, SsoToken};
    use std::collections::BTreeMap;

    struct Harness {
        launcher: ConsoleLauncher,
        sts: Arc<FakeSts>,
        sso: Arc<FakeSso>,
        oidc: Arc<FakeOidc>,
        federation: Arc<FakeFederation>,
    }

    fn harness(store: Arc<MemorySettingsStore>) -> Harness {
        let sts = Arc::new(FakeSts::default());
        let sso = Arc::new(FakeSso::default());
        let oidc = Arc::new(FakeOidc::approving());
        let federation = Arc::new(FakeFederation::issuing("SIGNIN"));

        let authenticator = Arc::new(SsoAuthenticator::new(
            store,
            oidc.clone(),
            Arc::new(NoBrowser::default()),
            PendingRequests::new(),
            "awsconsole",
        ));
        let roles = SsoRoleLister::new(Arc::clone(&authenticator), sso.clone(), 100);
        let launcher = ConsoleLauncher::new(
            CredentialChainExecutor::new(sts.clone(), "us-east-1"),
            authenticator,
            roles,
            ConsoleUrlSigner::new(federation.clone()),
        );

        Harness {
            launcher,
            sts,
            sso,
            oidc,
            federation,
        }
    }

    fn role_config() -> Config {
        let mut profiles = BTreeMap::new();
        profiles.insert(
            "admin".to_string(),
            Profile {
                source_profile: Some("base".to_string()),
                role_arn: Some("arn:aws:iam::111:role/admin".to_string()),
                region: Some("eu-west-1".to_string()),
                ..Profile::default()
            },
        );
        let credentials: Vec<(String, CredentialsEntry)> =
            vec![("base".to_string(), long_term("AKIABASE"))];
        Config::from_parts(profiles, BTreeMap::new(), credentials)
    }

    #[tokio::test]
    async fn test_role_profile_uses_credential_chain() {
        let h = harness(Arc::new(MemorySettingsStore::new()));
        let url = h
            .launcher
            .console_url(&role_config(), "admin", None, "r1")
            .await
            .unwrap();

        assert!(url.contains("Action=login"));
        assert!(url.contains("SigninToken=SIGNIN"));
        assert!(url.contains("eu-west-1.console.aws.amazon.com"));
        assert_eq!(h.sts.requests.lock().unwrap().len(), 1);
        assert!(h.sso.calls.lock().unwrap().is_empty());
        assert_eq!(h.federation.urls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sso_profile_uses_role_credentials() {
        let store = Arc::new(MemorySettingsStore::new());
        set_typed(
            store.as_ref(),
            SSO_TOKENS,
            "dev",
            &SsoToken {
                access_token: "cached".to_string(),
                expires_at: now_millis() + 60_000,
            },
        )
        .unwrap();
        let h = harness(store);

        let url = h
            .launcher
            .console_url(&sso_config(), "dev", None, "r1")
            .await
            .unwrap();

        assert!(url.starts_with("https://signin.aws.amazon.com/federation?Action=login"));
        assert_eq!(
            *h.sso.calls.lock().unwrap(),
            vec!["GetRoleCredentials 111111111111/Admin cached"]
        );
        assert!(h.sts.requests.lock().unwrap().is_empty());
        assert!(h.oidc.calls().is_empty());
    }

    #[tokio::test]
    async fn test_sso_profile_without_role_name() {
        let mut config = sso_config();
        if let Some(profile) = config.profiles.get_mut("dev") {
            profile.sso_role_name = None;
        }
        let h = harness(Arc::new(MemorySettingsStore::new()));

        let result = h.launcher.console_url(&config, "dev", None, "r1").await;
        assert!(matches!(
            result,
            Err(ConsoleError::MissingKey { key: "sso_role_name", .. })
        ));
        assert!(h.oidc.calls().is_empty());
    }

    #[tokio::test]
    async fn test_sso_profile_with_unknown_session() {
        let mut config = sso_config();
        if let Some(profile) = config.profiles.get_mut("dev") {
            profile.sso_session = Some("missing".to_string());
        }
        let h = harness(Arc::new(MemorySettingsStore::new()));

        let result = h.launcher.console_url(&config, "dev", None, "r1").await;
        assert!(matches!(result, Err(ConsoleError::UnknownSsoSession(name)) if name == "missing"));
    }

    #[tokio::test]
    async fn test_unknown_profile() {
        let h = harness(Arc::new(MemorySettingsStore::new()));
        let result = h.launcher.console_url(&role_config(), "nobody", None, "r1").await;
        assert!(matches!(result, Err(ConsoleError::UnknownProfile(name)) if name == "nobody"));
    }

    #[tokio::test]
    async fn test_cancel_unknown_request_is_remembered() {
        let h = harness(Arc::new(MemorySettingsStore::new()));
        assert!(!h.launcher.cancel("r9"));
        let result = h.launcher.console_url(&sso_config(), "dev", None, "r9").await;
        assert!(matches!(result, Err(ConsoleError::DeviceAuthorizationCancelled)));
        assert!(h.oidc.calls().is_empty());
    }
}
