use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use awsconsole::app::aws_config::{Config, CredentialsEntry, Profile, SsoSession};
use awsconsole::app::console_url::{ConsoleUrlSigner, FederationHttp};
use awsconsole::app::credential_chain::{
    AssumeRoleRequest, AwsCredentials, CredentialChainExecutor, StsApi,
};
use awsconsole::app::settings_store::{JsonFileSettingsStore, SettingsStore};
use awsconsole::app::sso::role_lister::{Page, SsoAccount};
use awsconsole::app::sso::{
    DeviceAuthorization, OidcApi, OidcClient, PendingRequests, SsoApi, SsoAuthenticator,
    SsoRoleLister, TokenPoll, UrlOpener,
};
use awsconsole::{ConsoleError, ConsoleLauncher, Result};

#[derive(Default)]
struct RecordingSts {
    role_arns: Mutex<Vec<String>>,
}

#[async_trait]
impl StsApi for RecordingSts {
    async fn assume_role(
        &self,
        _credentials: &AwsCredentials,
        request: &AssumeRoleRequest,
    ) -> Result<AwsCredentials> {
        self.role_arns.lock().unwrap().push(request.role_arn.clone());
        Ok(AwsCredentials {
            access_key_id: "ASIAASSUMED".to_string(),
            secret_access_key: "assumed-secret".to_string(),
            session_token: Some("assumed-token".to_string()),
            expiration: None,
        })
    }
}

struct StaticFederation;

#[async_trait]
impl FederationHttp for StaticFederation {
    async fn get(&self, url: &str) -> Result<String> {
        assert!(url.contains("Action=getSigninToken"));
        Ok(r#"{"SigninToken":"TOKEN123"}"#.to_string())
    }
}

/// Approves the device code on the first poll.
#[derive(Default)]
struct ApprovingOidc {
    token_calls: Mutex<usize>,
}

#[async_trait]
impl OidcApi for ApprovingOidc {
    async fn register_client(
        &self,
        _region: &str,
        _client_name: &str,
        _start_url: &str,
        _scopes: &[String],
    ) -> Result<OidcClient> {
        Ok(OidcClient {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            client_secret_expires_at: i64::MAX / 1000,
        })
    }

    async fn start_device_authorization(
        &self,
        _region: &str,
        _client: &OidcClient,
        _start_url: &str,
    ) -> Result<DeviceAuthorization> {
        Ok(DeviceAuthorization {
            device_code: "device".to_string(),
            user_code: None,
            verification_uri: Some("https://device.sso.aws/".to_string()),
            verification_uri_complete: None,
            expires_in: 600,
            interval: 0,
        })
    }

    async fn create_token(
        &self,
        _region: &str,
        _client: &OidcClient,
        _device_code: &str,
    ) -> Result<TokenPoll> {
        *self.token_calls.lock().unwrap() += 1;
        Ok(TokenPoll::Issued {
            access_token: "sso-access".to_string(),
            expires_in: 3600,
        })
    }
}

struct StaticSso;

#[async_trait]
impl SsoApi for StaticSso {
    async fn list_accounts(
        &self,
        _region: &str,
        _access_token: &str,
        _page_size: i32,
        _next_token: Option<String>,
    ) -> Result<Page<SsoAccount>> {
        Ok(Page {
            items: vec![SsoAccount {
                account_id: "444444444444".to_string(),
                account_name: "sandbox".to_string(),
            }],
            next_token: None,
        })
    }

    async fn list_account_roles(
        &self,
        _region: &str,
        _access_token: &str,
        _account_id: &str,
        _page_size: i32,
        _next_token: Option<String>,
    ) -> Result<Page<String>> {
        Ok(Page {
            items: vec!["Developer".to_string()],
            next_token: None,
        })
    }

    async fn get_role_credentials(
        &self,
        _region: &str,
        access_token: &str,
        _account_id: &str,
        _role_name: &str,
    ) -> Result<AwsCredentials> {
        assert_eq!(access_token, "sso-access");
        Ok(AwsCredentials {
            access_key_id: "ASIASSO".to_string(),
            secret_access_key: "sso-secret".to_string(),
            session_token: Some("sso-token".to_string()),
            expiration: None,
        })
    }
}

struct Headless;

impl UrlOpener for Headless {
    fn open(&self, _url: &str) -> std::io::Result<()> {
        Ok(())
    }
}

fn config() -> Config {
    let mut profiles = BTreeMap::new();
    profiles.insert(
        "admin".to_string(),
        Profile {
            order: 0,
            source_profile: Some("base".to_string()),
            role_arn: Some("arn:aws:iam::111111111111:role/Admin".to_string()),
            ..Profile::default()
        },
    );
    profiles.insert(
        "sso-dev".to_string(),
        Profile {
            order: 1,
            sso_session: Some("corp".to_string()),
            sso_account_id: Some("444444444444".to_string()),
            sso_role_name: Some("Developer".to_string()),
            region: Some("eu-west-1".to_string()),
            ..Profile::default()
        },
    );

    let mut sessions = BTreeMap::new();
    sessions.insert(
        "corp".to_string(),
        SsoSession {
            order: 2,
            sso_start_url: Some("https://corp.awsapps.com/start".to_string()),
            sso_region: Some("eu-west-1".to_string()),
            ..SsoSession::default()
        },
    );

    let credentials = vec![(
        "base".to_string(),
        CredentialsEntry {
            aws_access_key_id: "AKIABASE".to_string(),
            aws_secret_access_key: "base-secret".to_string(),
            aws_session_token: None,
        },
    )];

    Config::from_parts(profiles, sessions, credentials)
}

fn launcher(store: Arc<dyn SettingsStore>, sts: Arc<RecordingSts>, oidc: Arc<ApprovingOidc>) -> ConsoleLauncher {
    let authenticator = Arc::new(SsoAuthenticator::new(
        store,
        oidc,
        Arc::new(Headless),
        PendingRequests::new(),
        "awsconsole",
    ));
    let roles = SsoRoleLister::new(Arc::clone(&authenticator), Arc::new(StaticSso), 100);
    ConsoleLauncher::new(
        CredentialChainExecutor::new(sts, "us-east-1"),
        authenticator,
        roles,
        ConsoleUrlSigner::new(Arc::new(StaticFederation)),
    )
}

#[tokio::test]
async fn test_role_chain_launch() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileSettingsStore::new(dir.path().join("settings.json")));
    let sts = Arc::new(RecordingSts::default());
    let launcher = launcher(store, sts.clone(), Arc::new(ApprovingOidc::default()));

    let url = launcher
        .console_url(&config(), "admin", None, "launch-1")
        .await
        .unwrap();

    assert_eq!(
        url,
        "https://signin.aws.amazon.com/federation?Action=login&SigninToken=TOKEN123\
         &Destination=https%3A%2F%2Fconsole.aws.amazon.com&SessionDuration=43200"
    );
    assert_eq!(
        *sts.role_arns.lock().unwrap(),
        vec!["arn:aws:iam::111111111111:role/Admin"]
    );
}

#[tokio::test]
async fn test_sso_login_is_cached_across_launchers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    let oidc = Arc::new(ApprovingOidc::default());

    let first = launcher(
        Arc::new(JsonFileSettingsStore::new(&path)),
        Arc::new(RecordingSts::default()),
        oidc.clone(),
    );
    let url = first
        .console_url(&config(), "sso-dev", None, "launch-1")
        .await
        .unwrap();
    assert!(url.contains("Destination=https%3A%2F%2Feu-west-1.console.aws.amazon.com"));
    assert_eq!(*oidc.token_calls.lock().unwrap(), 1);

    let second = launcher(
        Arc::new(JsonFileSettingsStore::new(&path)),
        Arc::new(RecordingSts::default()),
        oidc.clone(),
    );
    second
        .console_url(&config(), "sso-dev", None, "launch-2")
        .await
        .unwrap();
    assert_eq!(*oidc.token_calls.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_list_sso_roles_through_profile() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileSettingsStore::new(dir.path().join("settings.json")));
    let launcher = launcher(
        store,
        Arc::new(RecordingSts::default()),
        Arc::new(ApprovingOidc::default()),
    );

    let roles = launcher
        .list_sso_roles(&config(), "sso-dev", "list-1")
        .await
        .unwrap();
    assert_eq!(roles.len(), 1);
    assert_eq!(roles[0].account_name, "sandbox");
    assert_eq!(roles[0].role_name, "Developer");
}

#[tokio::test]
async fn test_cancelled_launch_is_silent() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileSettingsStore::new(dir.path().join("settings.json")));
    let launcher = launcher(
        store,
        Arc::new(RecordingSts::default()),
        Arc::new(ApprovingOidc::default()),
    );

    launcher.cancel("launch-1");
    let err = launcher
        .console_url(&config(), "sso-dev", None, "launch-1")
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(matches!(err, ConsoleError::DeviceAuthorizationCancelled));
}
