//! Token acquisition: cache first, then silent refresh, then interactive sign-in.

use super::provider::IdentityProvider;
use super::resources::ScopeSet;
use super::session::Session;
use crate::error::AuthError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Hands out tokens per scope set and owns the sign-in flow.
pub struct TokenBroker {
    provider: Arc<dyn IdentityProvider>,
    session: Arc<Session>,
    /// Held for the whole of an interactive sign-in; only one browser prompt at a time.
    interaction: Mutex<()>,
    /// Number of interactive sign-ins that completed successfully.
    completed_logins: AtomicU64,
}

impl TokenBroker {
    pub fn new(provider: Arc<dyn IdentityProvider>, session: Arc<Session>) -> Self {
        Self {
            provider,
            session,
            interaction: Mutex::new(()),
            completed_logins: AtomicU64::new(0),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Token for exactly `scopes`.
    ///
    /// Concurrent callers asking for the same scope set share one provider round-trip.
    pub async fn acquire_token(&self, scopes: &ScopeSet) -> Result<Zeroizing<String>, AuthError> {
        if let Some(token) = self.session.cached_token(scopes).await {
            return Ok(token);
        }

        let lock = self.session.acquisition_lock(scopes);
        let _guard = lock.lock().await;

        // Another caller may have finished while we waited
        if let Some(token) = self.session.cached_token(scopes).await {
            debug!("Reusing token acquired concurrently for [{}]", scopes);
            return Ok(token);
        }

        let logins_seen = self.completed_logins.load(Ordering::SeqCst);
        match self.acquire_silent(scopes).await {
            Ok(token) => Ok(token),
            Err(e) if e.is_interaction_required() => {
                warn!("Silent acquisition for [{}] failed: {}", scopes, e);
                self.interactive(scopes, logins_seen).await
            }
            Err(e) => Err(e),
        }
    }

    /// Discard the cached token for `scopes` and acquire a new one.
    pub async fn renew_token(&self, scopes: &ScopeSet) -> Result<Zeroizing<String>, AuthError> {
        self.session.invalidate(scopes).await;
        self.acquire_token(scopes).await
    }

    /// Interactive sign-in for `scopes`.
    ///
    /// A sign-in that completes while this call waits for the browser lock is
    /// reused instead of prompting again. A failed or abandoned sign-in clears
    /// the whole session so no partial state remains.
    pub async fn login(&self, scopes: &ScopeSet) -> Result<Zeroizing<String>, AuthError> {
        let logins_seen = self.completed_logins.load(Ordering::SeqCst);
        self.interactive(scopes, logins_seen).await
    }

    async fn interactive(
        &self,
        scopes: &ScopeSet,
        logins_seen: u64,
    ) -> Result<Zeroizing<String>, AuthError> {
        let _interaction = self.interaction.lock().await;

        if self.completed_logins.load(Ordering::SeqCst) != logins_seen {
            if let Some(token) = self.session.cached_token(scopes).await {
                return Ok(token);
            }
            match self.acquire_silent(scopes).await {
                Ok(token) => return Ok(token),
                Err(e) => debug!("Silent acquisition after concurrent sign-in failed: {}", e),
            }
        }

        let login_hint = self.session.account().await.and_then(|a| a.username);
        match self
            .provider
            .login_interactive(scopes, login_hint.as_deref())
            .await
        {
            Ok(grant) => {
                if grant.account.is_none() && self.session.account().await.is_none() {
                    warn!("Sign-in returned no account information");
                }
                self.session.store(scopes, &grant).await;
                self.completed_logins.fetch_add(1, Ordering::SeqCst);
                Ok(grant.token)
            }
            Err(e) => {
                if e.is_cancellation() {
                    info!("Interactive sign-in cancelled");
                } else {
                    warn!("Interactive sign-in failed: {}", e);
                }
                self.session.clear().await;
                Err(e)
            }
        }
    }

    async fn acquire_silent(&self, scopes: &ScopeSet) -> Result<Zeroizing<String>, AuthError> {
        let refresh_token = self.session.refresh_token().await.ok_or(AuthError::NoAccount)?;

        let grant = self.provider.acquire_silent(&refresh_token, scopes).await?;
        self.session.store(scopes, &grant).await;
        debug!("Acquired token silently for [{}]", scopes);
        Ok(grant.token)
    }
}
