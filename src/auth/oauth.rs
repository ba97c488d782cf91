//! OAuth2 client with PKCE support for Azure AD authentication.

use super::resources::{ScopeSet, OIDC_SCOPES};
use crate::config::Config;
use crate::error::AuthError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// HTTP request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// HTTP connection timeout.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Token endpoint error codes that can only be resolved by signing in again.
const INTERACTION_ERRORS: [&str; 4] = [
    "invalid_grant",
    "interaction_required",
    "consent_required",
    "login_required",
];

/// PKCE code verifier and challenge pair. Wiped on drop.
#[derive(Debug, Zeroize, ZeroizeOnDrop)]
pub struct PkceChallenge {
    /// The code verifier (stored locally, sent in token exchange).
    pub verifier: String,
    /// The code challenge (SHA256 hash of verifier, sent in auth request).
    pub challenge: String,
}

impl PkceChallenge {
    /// Generate a new PKCE challenge pair.
    pub fn new() -> Self {
        let verifier = random_token(32);

        // challenge = BASE64URL(SHA256(verifier))
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        let challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());

        Self {
            verifier,
            challenge,
        }
    }
}

impl Default for PkceChallenge {
    fn default() -> Self {
        Self::new()
    }
}

/// A prepared browser sign-in: the URL to open plus the values the callback must echo.
#[derive(Debug)]
pub struct AuthorizationRequest {
    pub url: Url,
    pub state: String,
    pub nonce: String,
}

/// OAuth2 client for Azure AD authentication.
pub struct OAuth2Client {
    client_id: String,
    auth_url: String,
    token_url: String,
    redirect_uri: String,
    http_client: reqwest::Client,
}

impl OAuth2Client {
    /// Create a new OAuth2 client from configuration.
    pub fn new(config: &Config) -> Result<Self, AuthError> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AuthError::InvalidRequest(e.to_string()))?;

        Ok(Self {
            client_id: config.oauth.client_id.clone(),
            auth_url: config.auth_url(),
            token_url: config.token_url(),
            redirect_uri: config.oauth.redirect_uri.clone(),
            http_client,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The `scope` parameter sent for a scope set.
    ///
    /// A scope set naming only this application's client id is served by the
    /// id token, so only the OpenID Connect scopes are requested for it.
    pub fn scope_param(&self, scopes: &ScopeSet) -> String {
        let resources = if scopes.is_client_id_only(&self.client_id) {
            ScopeSet::default()
        } else {
            scopes.resource_scopes()
        };

        ScopeSet::new(resources.iter().chain(OIDC_SCOPES)).to_param()
    }

    /// Generate the authorization URL for browser-based sign-in.
    ///
    /// The returned state and nonce must be verified when the callback arrives.
    pub fn authorization_request(
        &self,
        pkce: &PkceChallenge,
        scopes: &ScopeSet,
        login_hint: Option<&str>,
    ) -> Result<AuthorizationRequest, AuthError> {
        let state = random_token(16);
        let nonce = random_token(16);

        let mut url = Url::parse(&self.auth_url)
            .map_err(|e| AuthError::InvalidRequest(format!("auth endpoint: {}", e)))?;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.client_id)
                .append_pair("response_type", "code")
                .append_pair("redirect_uri", &self.redirect_uri)
                .append_pair("response_mode", "query")
                .append_pair("scope", &self.scope_param(scopes))
                .append_pair("state", &state)
                .append_pair("nonce", &nonce)
                .append_pair("code_challenge", &pkce.challenge)
                .append_pair("code_challenge_method", "S256");

            match login_hint {
                Some(hint) => query.append_pair("login_hint", hint),
                None => query.append_pair("prompt", "select_account"),
            };
        }

        Ok(AuthorizationRequest { url, state, nonce })
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
        scopes: &ScopeSet,
    ) -> Result<TokenResponse, AuthError> {
        let scope = self.scope_param(scopes);
        let params = [
            ("client_id", self.client_id.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code_verifier", pkce_verifier),
            ("scope", scope.as_str()),
        ];

        self.token_request(&params)
            .await
            .map_err(|e| match e {
                TokenEndpointError::Transport(msg) | TokenEndpointError::Rejected { message: msg, .. } => {
                    AuthError::TokenExchangeFailed(msg)
                }
            })
    }

    /// Redeem a refresh token for a token covering `scopes`.
    ///
    /// Azure AD issues one access token per resource, so each scope set is a separate redemption.
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
        scopes: &ScopeSet,
    ) -> Result<TokenResponse, AuthError> {
        let scope = self.scope_param(scopes);
        let params = [
            ("client_id", self.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("scope", scope.as_str()),
        ];

        tracing::debug!("Requesting token for scopes: {}", scope);

        self.token_request(&params).await.map_err(|e| match e {
            TokenEndpointError::Rejected { code, message } if INTERACTION_ERRORS.contains(&code.as_str()) => {
                AuthError::InteractionRequired(message)
            }
            TokenEndpointError::Transport(msg) | TokenEndpointError::Rejected { message: msg, .. } => {
                AuthError::SilentAcquisitionFailed(msg)
            }
        })
    }

    async fn token_request(
        &self,
        params: &[(&str, &str)],
    ) -> Result<TokenResponse, TokenEndpointError> {
        let response = self
            .http_client
            .post(&self.token_url)
            .header("client-request-id", Uuid::new_v4().to_string())
            .form(params)
            .send()
            .await
            .map_err(|e| TokenEndpointError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body: TokenErrorResponse = response.json().await.unwrap_or_default();
            // Log error details for debugging (doesn't expose to user)
            tracing::error!(
                "Token request failed: HTTP {} - {} {}",
                status,
                body.error,
                body.error_description
            );
            return Err(TokenEndpointError::Rejected {
                message: if body.error.is_empty() {
                    format!("HTTP {}", status.as_u16())
                } else {
                    body.error.clone()
                },
                code: body.error,
            });
        }

        response
            .json()
            .await
            .map_err(|e| TokenEndpointError::Transport(e.to_string()))
    }
}

enum TokenEndpointError {
    Transport(String),
    Rejected { code: String, message: String },
}

/// Token response from Azure AD.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: String,
}

/// Error body of a failed token request.
#[derive(Debug, Default, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

/// Claims read from an id token for display and nonce checking.
///
/// The id token arrives straight from the token endpoint over TLS, so its
/// signature is not re-verified here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdTokenClaims {
    pub exp: Option<i64>,
    pub nonce: Option<String>,
    pub name: Option<String>,
    pub preferred_username: Option<String>,
    pub oid: Option<String>,
    pub tid: Option<String>,
}

impl IdTokenClaims {
    /// Decode the payload segment of a JWT.
    pub fn decode(token: &str) -> Result<Self, AuthError> {
        let payload = token
            .split('.')
            .nth(1)
            .ok_or_else(|| AuthError::TokenExchangeFailed("malformed id token".into()))?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| AuthError::TokenExchangeFailed(format!("id token payload: {}", e)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| AuthError::TokenExchangeFailed(format!("id token claims: {}", e)))
    }
}

/// Parse OAuth callback URL to extract code and state.
pub fn parse_callback_url(url_string: &str) -> Result<(String, String), AuthError> {
    let url = Url::parse(url_string).map_err(|_| AuthError::InvalidAuthCode)?;

    let params: HashMap<_, _> = url.query_pairs().collect();

    if let Some(error) = params.get("error") {
        // The user closed the prompt or declined consent
        if error == "access_denied" {
            return Err(AuthError::UserCancelled);
        }
        let description = params
            .get("error_description")
            .map(|s| s.to_string())
            .unwrap_or_else(|| error.to_string());
        return Err(AuthError::OAuthFailed(description));
    }

    let code = params
        .get("code")
        .ok_or(AuthError::InvalidAuthCode)?
        .to_string();

    let state = params
        .get("state")
        .ok_or(AuthError::StateValidationFailed)?
        .to_string();

    Ok((code, state))
}

fn random_token(len: usize) -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(&bytes)
}
