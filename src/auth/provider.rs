//! Identity provider seam: interactive sign-in and silent token redemption.

use super::callback_server::{CallbackResult, CallbackServer};
use super::oauth::{parse_callback_url, IdTokenClaims, OAuth2Client, PkceChallenge, TokenResponse};
use super::resources::ScopeSet;
use super::session::{Account, TokenGrant};
use crate::config::Config;
use crate::error::AuthError;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use std::sync::{mpsc, Mutex};
use tracing::{error, info, warn};
use url::Url;
use zeroize::Zeroizing;

/// Source of tokens for the client auth shell.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Sign the user in interactively and return a token for `scopes`.
    ///
    /// `login_hint` pre-selects the account when the user is re-authenticating.
    async fn login_interactive(
        &self,
        scopes: &ScopeSet,
        login_hint: Option<&str>,
    ) -> Result<TokenGrant, AuthError>;

    /// Redeem a refresh token for `scopes` without user interaction.
    async fn acquire_silent(
        &self,
        refresh_token: &str,
        scopes: &ScopeSet,
    ) -> Result<TokenGrant, AuthError>;
}

/// Opens the authorization URL for the user.
pub type BrowserLauncher = Box<dyn Fn(&Url) -> std::io::Result<()> + Send + Sync>;

/// Azure AD via authorization code + PKCE in the system browser.
pub struct AzureAdProvider {
    oauth: OAuth2Client,
    redirect: Url,
    login_timeout: std::time::Duration,
    launcher: BrowserLauncher,
    pending_cancel: Mutex<Option<mpsc::Sender<()>>>,
}

impl AzureAdProvider {
    pub fn new(config: &Config) -> Result<Self, AuthError> {
        let redirect = config
            .redirect_url()
            .map_err(|e| AuthError::InvalidRequest(e.to_string()))?;

        Ok(Self {
            oauth: OAuth2Client::new(config)?,
            redirect,
            login_timeout: std::time::Duration::from_secs(config.client.login_timeout_secs),
            launcher: Box::new(|url| open::that(url.as_str())),
            pending_cancel: Mutex::new(None),
        })
    }

    /// Replace how the authorization URL is opened.
    pub fn with_launcher(mut self, launcher: BrowserLauncher) -> Self {
        self.launcher = launcher;
        self
    }

    /// Abort a sign-in that is waiting for the browser.
    pub fn cancel_login(&self) {
        if let Some(tx) = self.take_pending() {
            let _ = tx.send(());
            info!("Sign-in cancelled");
        }
    }

    fn take_pending(&self) -> Option<mpsc::Sender<()>> {
        self.pending_cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    async fn wait_for_callback(
        &self,
        server: CallbackServer,
        cancel_rx: mpsc::Receiver<()>,
    ) -> Result<String, AuthError> {
        let waiter = tokio::task::spawn_blocking(move || server.wait(cancel_rx));

        match tokio::time::timeout(self.login_timeout, waiter).await {
            Err(_) => {
                warn!("Sign-in timed out after {:?}", self.login_timeout);
                if let Some(tx) = self.take_pending() {
                    let _ = tx.send(());
                }
                Err(AuthError::CallbackTimeout)
            }
            Ok(Err(e)) => Err(AuthError::CallbackServer(e.to_string())),
            Ok(Ok(CallbackResult::Success(url))) => Ok(url),
            Ok(Ok(CallbackResult::Cancelled)) => Err(AuthError::UserCancelled),
            Ok(Ok(CallbackResult::Error(e))) => Err(AuthError::CallbackServer(e)),
        }
    }
}

#[async_trait]
impl IdentityProvider for AzureAdProvider {
    async fn login_interactive(
        &self,
        scopes: &ScopeSet,
        login_hint: Option<&str>,
    ) -> Result<TokenGrant, AuthError> {
        info!("Starting interactive sign-in for [{}]", scopes);

        let pkce = PkceChallenge::new();
        let request = self.oauth.authorization_request(&pkce, scopes, login_hint)?;

        // Listen before the browser can possibly redirect back
        let (server, cancel_rx) = {
            let mut pending = self
                .pending_cancel
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if pending.is_some() {
                return Err(AuthError::InteractionInProgress);
            }
            let server = CallbackServer::bind(&self.redirect).map_err(AuthError::CallbackServer)?;
            let (cancel_tx, cancel_rx) = mpsc::channel();
            *pending = Some(cancel_tx);
            (server, cancel_rx)
        };

        if let Err(e) = (self.launcher)(&request.url) {
            error!("Failed to open browser: {}", e);
            self.take_pending();
            return Err(AuthError::OAuthFailed("Failed to open browser".to_string()));
        }

        let callback = self.wait_for_callback(server, cancel_rx).await;
        self.take_pending();
        let callback = callback?;

        let (code, state) = parse_callback_url(&callback)?;
        if state != request.state {
            return Err(AuthError::StateValidationFailed);
        }

        let response = self
            .oauth
            .exchange_code(&code, &pkce.verifier, scopes)
            .await?;
        let grant = into_grant(response, scopes, self.oauth.client_id())?;

        if let Some(id_token) = &grant.id_token {
            let claims = IdTokenClaims::decode(id_token)?;
            if claims.nonce.as_deref() != Some(request.nonce.as_str()) {
                return Err(AuthError::StateValidationFailed);
            }
        }

        Ok(grant.grant)
    }

    async fn acquire_silent(
        &self,
        refresh_token: &str,
        scopes: &ScopeSet,
    ) -> Result<TokenGrant, AuthError> {
        let response = self.oauth.refresh_token(refresh_token, scopes).await?;
        into_grant(response, scopes, self.oauth.client_id()).map(|g| g.grant)
    }
}

struct GrantWithIdToken {
    grant: TokenGrant,
    id_token: Option<Zeroizing<String>>,
}

/// Pick the bearer credential for `scopes` out of a token response.
///
/// For the application's own client id the id token is the credential;
/// otherwise the access token is.
fn into_grant(
    response: TokenResponse,
    scopes: &ScopeSet,
    client_id: &str,
) -> Result<GrantWithIdToken, AuthError> {
    let id_claims = response
        .id_token
        .as_deref()
        .map(IdTokenClaims::decode)
        .transpose()?;

    let access_expires_at = i64::try_from(response.expires_in)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
        .ok_or_else(|| {
            AuthError::TokenExchangeFailed(format!("expires_in out of range: {}", response.expires_in))
        })?;

    let (token, expires_at) = if scopes.is_client_id_only(client_id) {
        let id_token = response.id_token.clone().ok_or_else(|| {
            AuthError::TokenExchangeFailed("no id token returned for the client id scope".into())
        })?;
        let expires_at = id_claims
            .as_ref()
            .and_then(|c| c.exp)
            .and_then(timestamp)
            .unwrap_or(access_expires_at);
        (id_token, expires_at)
    } else {
        (response.access_token, access_expires_at)
    };

    let account = id_claims.map(|c| Account {
        username: c.preferred_username,
        name: c.name,
        object_id: c.oid,
        tenant_id: c.tid,
    });

    Ok(GrantWithIdToken {
        grant: TokenGrant {
            token: Zeroizing::new(token),
            expires_at,
            refresh_token: response.refresh_token.map(Zeroizing::new),
            account,
        },
        id_token: response.id_token.map(Zeroizing::new),
    })
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}
