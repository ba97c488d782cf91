//! Route guard: a protected view is only entered with a signed-in account.

use super::broker::TokenBroker;
use super::resources::ScopeSet;
use super::session::Account;
use crate::error::AuthError;
use std::sync::Arc;
use tracing::{debug, info};

pub struct RouteGuard {
    broker: Arc<TokenBroker>,
    consent_scopes: ScopeSet,
}

impl RouteGuard {
    /// `consent_scopes` are requested up front when a sign-in is needed.
    pub fn new(broker: Arc<TokenBroker>, consent_scopes: ScopeSet) -> Self {
        Self {
            broker,
            consent_scopes,
        }
    }

    /// Resolve the account a protected route runs as.
    ///
    /// Signs in interactively when no account is present. A cancelled or
    /// failed sign-in is returned as an error and the route must not be shown.
    pub async fn can_activate(&self) -> Result<Account, AuthError> {
        let session = self.broker.session();
        if session.is_signed_in().await {
            if let Some(account) = session.account().await {
                debug!("Route allowed for {}", account.display_name());
                return Ok(account);
            }
        }

        info!("Sign-in required for [{}]", self.consent_scopes);
        self.broker.login(&self.consent_scopes).await?;
        session.account().await.ok_or(AuthError::NoAccount)
    }
}
