//! Client shell talking to the guarded API, with a mock tenant serving discovery and keys.

use aad_bearer::auth::graph::SampleApiClient;
use aad_bearer::auth::session::TokenGrant;
use aad_bearer::auth::{
    Account, AuthenticatedClient, IdentityProvider, ProtectedResourceMap, RouteGuard, ScopeSet,
    Session, TokenBroker,
};
use aad_bearer::config::Config;
use aad_bearer::error::{ApiError, AppError, AuthError};
use aad_bearer::guard::ApiGuard;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zeroize::Zeroizing;

const PRIVATE_KEY: &str = include_str!("fixtures/rsa_private.pem");
const JWKS: &str = include_str!("fixtures/jwks.json");
const CLIENT_ID: &str = "11111111-2222-3333-4444-555555555555";
const TENANT: &str = "contoso-tenant";

/// Signs tokens with the fixture key, as the tenant would.
struct SigningProvider {
    issuer: String,
    audience: String,
}

impl SigningProvider {
    fn grant(&self) -> TokenGrant {
        let expires_at = Utc::now() + Duration::hours(1);
        let claims = json!({
            "iss": self.issuer,
            "aud": self.audience,
            "exp": expires_at.timestamp(),
            "nbf": Utc::now().timestamp() - 5,
            "oid": "48d31887-5fad-4d73-a9f5-3c356e68a038",
            "tid": TENANT,
            "preferred_username": "AdeleV@contoso.com",
            "name": "Adele Vance",
        });
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some("test-key-1".into());
        let key = EncodingKey::from_rsa_pem(PRIVATE_KEY.as_bytes()).unwrap();

        TokenGrant {
            token: Zeroizing::new(encode(&header, &claims, &key).unwrap()),
            expires_at,
            refresh_token: Some(Zeroizing::new("refresh".into())),
            account: Some(Account {
                username: Some("AdeleV@contoso.com".into()),
                name: Some("Adele Vance".into()),
                ..Account::default()
            }),
        }
    }
}

#[async_trait]
impl IdentityProvider for SigningProvider {
    async fn login_interactive(
        &self,
        _scopes: &ScopeSet,
        _login_hint: Option<&str>,
    ) -> Result<TokenGrant, AuthError> {
        Ok(self.grant())
    }

    async fn acquire_silent(&self, _rt: &str, _scopes: &ScopeSet) -> Result<TokenGrant, AuthError> {
        Ok(self.grant())
    }
}

async fn mock_tenant() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/{}/v2.0/.well-known/openid-configuration", TENANT)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": format!("{}/{}/v2.0", server.uri(), TENANT),
            "jwks_uri": format!("{}/{}/discovery/v2.0/keys", server.uri(), TENANT),
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/{}/discovery/v2.0/keys", TENANT)))
        .respond_with(ResponseTemplate::new(200).set_body_raw(JWKS, "application/json"))
        .mount(&server)
        .await;
    server
}

fn config(authority_host: &str) -> Config {
    let config = Config::from_toml(&format!(
        r#"
        [app]
        name = "aad-bearer"
        version = "0.1.0"

        [oauth]
        client_id = "{client_id}"
        tenant = "{tenant}"
        redirect_uri = "http://localhost:4200/"
        authority_host = "{authority_host}"

        [oauth.scopes]
        scopes = ["user.read", "openid", "profile"]

        [api]
        bind_address = "127.0.0.1:0"
        key_refresh_interval_secs = 3600
        key_refresh_min_interval_secs = 60
        leeway_secs = 60

        [client]
        api_base_url = "http://127.0.0.1:0/"
        login_timeout_secs = 5

        [token]
        refresh_before_expiry_seconds = 300

        [logging]
        level = "debug"
        "#,
        client_id = CLIENT_ID,
        tenant = TENANT,
        authority_host = authority_host,
    ))
    .unwrap();
    config.validate().unwrap();
    config
}

/// Start the guarded API on an ephemeral port; returns its base URL.
async fn start_api(config: &Config) -> (ApiGuard, String) {
    let guard = ApiGuard::start(config).await.unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}/", listener.local_addr().unwrap());
    let app = guard.router();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    (guard, base_url)
}

fn api_client(provider: SigningProvider, base_url: &str) -> (RouteGuard, SampleApiClient) {
    let broker = Arc::new(TokenBroker::new(Arc::new(provider), Arc::new(Session::new(300))));
    let route_guard = RouteGuard::new(Arc::clone(&broker), ScopeSet::new(["openid", "profile"]));
    let resources = ProtectedResourceMap::new().protect(base_url, [CLIENT_ID]);
    let client = AuthenticatedClient::new(broker, resources).unwrap();
    (route_guard, SampleApiClient::new(client, base_url))
}

#[tokio::test]
async fn test_signed_in_client_reaches_protected_api() {
    let tenant = mock_tenant().await;
    let config = config(&tenant.uri());
    let (guard, base_url) = start_api(&config).await;

    let provider = SigningProvider {
        issuer: format!("{}/{}/v2.0", tenant.uri(), TENANT),
        audience: CLIENT_ID.into(),
    };
    let (route_guard, api) = api_client(provider, &base_url);

    let account = route_guard.can_activate().await.unwrap();
    assert_eq!(account.display_name(), "Adele Vance");

    let me = api.whoami().await.unwrap();
    assert_eq!(me["preferredUsername"], "AdeleV@contoso.com");
    assert_eq!(me["tid"], TENANT);

    let forecast = api.weather_forecast().await.unwrap();
    assert_eq!(forecast.len(), 5);

    guard.shutdown().await;
}

#[tokio::test]
async fn test_token_for_another_api_is_rejected() {
    let tenant = mock_tenant().await;
    let config = config(&tenant.uri());
    let (guard, base_url) = start_api(&config).await;

    let provider = SigningProvider {
        issuer: format!("{}/{}/v2.0", tenant.uri(), TENANT),
        audience: "api://some-other-api".into(),
    };
    let (_route_guard, api) = api_client(provider, &base_url);

    let result = api.whoami().await;
    assert!(matches!(result, Err(AppError::Api(ApiError::Unauthorized))));

    guard.shutdown().await;
}

#[tokio::test]
async fn test_health_needs_no_token() {
    let tenant = mock_tenant().await;
    let (guard, base_url) = start_api(&config(&tenant.uri())).await;

    let response = reqwest::get(format!("{}health", base_url)).await.unwrap();
    assert_eq!(response.status(), 200);

    let response = reqwest::get(format!("{}api/me", base_url)).await.unwrap();
    assert_eq!(response.status(), 401);
    let challenge = response.headers()["www-authenticate"].to_str().unwrap().to_string();
    assert!(challenge.starts_with("Bearer"), "{}", challenge);

    guard.shutdown().await;
}

#[tokio::test]
async fn test_startup_fails_without_signing_keys() {
    let empty_tenant = MockServer::start().await;

    let result = ApiGuard::start(&config(&empty_tenant.uri())).await;

    assert!(result.is_err());
}
