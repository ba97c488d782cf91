//! HTTP client wrapper that attaches bearer tokens to outgoing requests.
//!
//! The target URL is looked up in the [`ProtectedResourceMap`]. Requests to
//! unmapped or unprotected URLs are sent untouched. Requests to a protected
//! prefix get a token for that prefix's scope set, acquired through the
//! [`TokenBroker`] (cache, then silent refresh, then interactive sign-in).

use super::broker::TokenBroker;
use super::resources::ProtectedResourceMap;
use crate::error::{AppError, AuthError};
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Request, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// HTTP connection timeout.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// `reqwest::Client` that knows which requests need which token.
#[derive(Clone)]
pub struct AuthenticatedClient {
    http: reqwest::Client,
    broker: Arc<TokenBroker>,
    resources: Arc<ProtectedResourceMap>,
}

impl AuthenticatedClient {
    pub fn new(broker: Arc<TokenBroker>, resources: ProtectedResourceMap) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .build()?;
        Ok(Self::with_client(http, broker, resources))
    }

    pub fn with_client(
        http: reqwest::Client,
        broker: Arc<TokenBroker>,
        resources: ProtectedResourceMap,
    ) -> Self {
        Self {
            http,
            broker,
            resources: Arc::new(resources),
        }
    }

    /// Build and send a GET request.
    pub async fn get(&self, url: &str) -> Result<Response, AppError> {
        let request = self.http.get(url).build()?;
        self.execute(request).await
    }

    /// Send `request`, attaching a bearer token when its URL is protected.
    ///
    /// A protected request that comes back 401 is retried once with a renewed
    /// token, provided the request body could be cloned.
    pub async fn execute(&self, mut request: Request) -> Result<Response, AppError> {
        let Some(scopes) = self.resources.scopes_for(request.url().as_str()).cloned() else {
            debug!("No token required for {}", request.url());
            return Ok(self.http.execute(request).await?);
        };

        let token = self.broker.acquire_token(&scopes).await?;
        set_bearer(&mut request, &token)?;
        let retry = request.try_clone();

        let response = self.http.execute(request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(mut retry) = retry else {
            warn!("Request to {} was rejected and cannot be replayed", response.url());
            return Ok(response);
        };

        warn!("Token for [{}] rejected by {}, renewing", scopes, response.url());
        let token = self.broker.renew_token(&scopes).await?;
        set_bearer(&mut retry, &token)?;
        Ok(self.http.execute(retry).await?)
    }
}

fn set_bearer(request: &mut Request, token: &str) -> Result<(), AppError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
        AuthError::InvalidRequest("token contains characters not allowed in a header".into())
    })?;
    value.set_sensitive(true);
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::broker::tests::FakeProvider;
    use crate::auth::resources::ScopeSet;
    use crate::auth::session::Session;
    use std::sync::atomic::Ordering;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, Request as MockRequest, ResponseTemplate};

    fn client(server: &MockServer, provider: Arc<FakeProvider>) -> AuthenticatedClient {
        let broker = Arc::new(TokenBroker::new(provider, Arc::new(Session::new(300))));
        let resources = ProtectedResourceMap::new()
            .unprotected(&format!("{}/public", server.uri()))
            .protect(&format!("{}/graph/", server.uri()), ["User.Read"])
            .protect(&format!("{}/", server.uri()), ["api://sample/access"]);
        AuthenticatedClient::with_client(reqwest::Client::new(), broker, resources)
    }

    fn no_auth_header(request: &MockRequest) -> bool {
        !request.headers.contains_key("authorization")
    }

    #[tokio::test]
    async fn test_protected_request_gets_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/graph/me"))
            .and(header("authorization", "Bearer interactive:user.read"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let provider = Arc::new(FakeProvider::default());
        let client = client(&server, Arc::clone(&provider));

        let response = client.get(&format!("{}/graph/me", server.uri())).await.unwrap();

        assert_eq!(response.status(), 200);
        let requested = provider.requested.lock().unwrap().clone();
        assert_eq!(requested, vec![ScopeSet::new(["user.read"])]);
    }

    #[tokio::test]
    async fn test_catch_all_prefix_uses_its_scopes() {
        let server = MockServer::start().await;
        Mock::given(path("/api/values"))
            .and(header("authorization", "Bearer interactive:api://sample/access"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let provider = Arc::new(FakeProvider::default());
        let client = client(&server, Arc::clone(&provider));

        let response = client.get(&format!("{}/api/values", server.uri())).await.unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_unprotected_request_sent_without_token() {
        let server = MockServer::start().await;
        Mock::given(path("/public/status"))
            .and(no_auth_header)
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let provider = Arc::new(FakeProvider::default());
        let client = client(&server, Arc::clone(&provider));

        let response = client.get(&format!("{}/public/status", server.uri())).await.unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(provider.interactive_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unmapped_host_sent_without_token() {
        let server = MockServer::start().await;
        let other = MockServer::start().await;
        Mock::given(path("/anything"))
            .and(no_auth_header)
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&other)
            .await;

        let provider = Arc::new(FakeProvider::default());
        let client = client(&server, Arc::clone(&provider));

        let response = client.get(&format!("{}/anything", other.uri())).await.unwrap();

        assert_eq!(response.status(), 204);
        assert!(provider.requested.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_token_renewed_once() {
        let server = MockServer::start().await;
        Mock::given(path("/graph/me"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(path("/graph/me"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let provider = Arc::new(FakeProvider::default());
        let client = client(&server, Arc::clone(&provider));

        let response = client.get(&format!("{}/graph/me", server.uri())).await.unwrap();

        assert_eq!(response.status(), 200);
        // Sign-in, then a silent renewal with the refresh token it returned
        assert_eq!(provider.interactive_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.silent_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_sign_in_fails_request() {
        let server = MockServer::start().await;
        Mock::given(path("/graph/me"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let provider = Arc::new(FakeProvider {
            cancel_interactive: true,
            ..FakeProvider::default()
        });
        let client = client(&server, provider);

        let result = client.get(&format!("{}/graph/me", server.uri())).await;

        assert!(matches!(result, Err(AppError::Auth(AuthError::UserCancelled))));
    }
}
