//! In-memory session: signed-in account, refresh token and per-scope token cache.

use super::resources::ScopeSet;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Signed-in user, as described by the id token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Account {
    pub username: Option<String>,
    pub name: Option<String>,
    pub object_id: Option<String>,
    pub tenant_id: Option<String>,
}

impl Account {
    /// Best available label for logs and display.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.username.clone())
            .unwrap_or_else(|| "Unknown User".to_string())
    }

    /// Same person: object ids when both carry one, otherwise usernames.
    pub fn is_same_user(&self, other: &Account) -> bool {
        match (&self.object_id, &other.object_id) {
            (Some(a), Some(b)) => a == b,
            _ => match (&self.username, &other.username) {
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                _ => false,
            },
        }
    }
}

/// Token obtained from the identity provider for one scope set.
pub struct TokenGrant {
    pub token: Zeroizing<String>,
    pub expires_at: DateTime<Utc>,
    /// Present when the provider rotated or issued a refresh token.
    pub refresh_token: Option<Zeroizing<String>>,
    /// Present when the grant came with an id token.
    pub account: Option<Account>,
}

#[derive(Clone)]
struct CachedToken {
    token: Zeroizing<String>,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct SessionState {
    account: Option<Account>,
    refresh_token: Option<Zeroizing<String>>,
    tokens: HashMap<ScopeSet, CachedToken>,
}

/// Session state shared by the route guard and the interceptor.
pub struct Session {
    state: RwLock<SessionState>,
    acquisitions: Mutex<HashMap<ScopeSet, Arc<tokio::sync::Mutex<()>>>>,
    refresh_buffer: TimeDelta,
}

impl Session {
    /// `refresh_buffer_secs` is how long before expiry a cached token stops being used.
    pub fn new(refresh_buffer_secs: u64) -> Self {
        Self {
            state: RwLock::new(SessionState::default()),
            acquisitions: Mutex::new(HashMap::new()),
            refresh_buffer: i64::try_from(refresh_buffer_secs)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .unwrap_or(TimeDelta::MAX),
        }
    }

    /// True when an account and a refresh token are present.
    pub async fn is_signed_in(&self) -> bool {
        let state = self.state.read().await;
        state.account.is_some() && state.refresh_token.is_some()
    }

    pub async fn account(&self) -> Option<Account> {
        self.state.read().await.account.clone()
    }

    pub async fn refresh_token(&self) -> Option<Zeroizing<String>> {
        self.state.read().await.refresh_token.clone()
    }

    /// A cached token for exactly `scopes`, if it is not about to expire.
    pub async fn cached_token(&self, scopes: &ScopeSet) -> Option<Zeroizing<String>> {
        let state = self.state.read().await;
        let cached = state.tokens.get(scopes)?;
        let usable_until = cached.expires_at.checked_sub_signed(self.refresh_buffer);
        if usable_until.is_some_and(|t| t > Utc::now()) {
            Some(cached.token.clone())
        } else {
            debug!("Cached token for [{}] is expired or about to expire", scopes);
            None
        }
    }

    /// Cache a grant for `scopes`, adopting its refresh token and account if present.
    pub async fn store(&self, scopes: &ScopeSet, grant: &TokenGrant) {
        let mut state = self.state.write().await;

        if let Some(refresh_token) = &grant.refresh_token {
            state.refresh_token = Some(refresh_token.clone());
        }
        if let Some(account) = &grant.account {
            match &state.account {
                Some(current) if !current.is_same_user(account) => {
                    info!(
                        "Account changed from {} to {}; dropping cached tokens",
                        current.display_name(),
                        account.display_name()
                    );
                    state.tokens.clear();
                }
                Some(_) => {}
                None => info!("Signed in as {}", account.display_name()),
            }
            state.account = Some(account.clone());
        }

        state.tokens.insert(
            scopes.clone(),
            CachedToken {
                token: grant.token.clone(),
                expires_at: grant.expires_at,
            },
        );
        debug!("Cached token for [{}] until {}", scopes, grant.expires_at);
    }

    /// Drop the cached token for `scopes` (e.g. after the resource rejected it).
    pub async fn invalidate(&self, scopes: &ScopeSet) {
        self.state.write().await.tokens.remove(scopes);
    }

    /// Forget everything: account, refresh token and cached tokens.
    pub async fn clear(&self) {
        *self.state.write().await = SessionState::default();
        info!("Session cleared");
    }

    pub async fn cached_scope_sets(&self) -> usize {
        self.state.read().await.tokens.len()
    }

    /// Lock serializing token acquisition for one scope set.
    pub fn acquisition_lock(&self, scopes: &ScopeSet) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .acquisitions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(scopes.clone()).or_default())
    }
}
