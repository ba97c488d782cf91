//! Server-side bearer token guard.
//!
//! Builds the authority from configuration, loads the identity provider's
//! signing keys, keeps them fresh in the background and exposes the
//! validating middleware and router.

pub mod authority;
pub mod keys;
pub mod middleware;
pub mod routes;
pub mod validator;

pub use authority::Authority;
pub use keys::SigningKeys;
pub use validator::{Claims, TokenValidator};

use crate::config::Config;
use crate::error::ConfigError;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Running guard: validator plus its key refresh task.
pub struct ApiGuard {
    validator: Arc<TokenValidator>,
    refresh_task: JoinHandle<()>,
    cancel: CancellationToken,
}

impl ApiGuard {
    /// Build the authority, fetch the signing keys once and start refreshing them.
    ///
    /// Fails when configuration is incomplete or no keys can be loaded.
    pub async fn start(config: &Config) -> Result<Self, ConfigError> {
        let authority = Authority::from_config(config)?;
        info!(
            "Validating tokens issued by {} for audiences {:?}",
            authority.issuer(),
            authority.audiences()
        );

        let keys = Arc::new(SigningKeys::new(
            authority.metadata_url(),
            authority.default_jwks_url(),
            Duration::from_secs(config.api.key_refresh_min_interval_secs),
        )?);
        keys.refresh().await?;

        let cancel = CancellationToken::new();
        let refresh_task = Arc::clone(&keys).spawn_refresh_task(
            Duration::from_secs(config.api.key_refresh_interval_secs),
            cancel.clone(),
        );

        let validator = Arc::new(TokenValidator::new(
            authority,
            keys,
            config.api.leeway_secs,
        ));

        Ok(Self {
            validator,
            refresh_task,
            cancel,
        })
    }

    pub fn validator(&self) -> Arc<TokenValidator> {
        Arc::clone(&self.validator)
    }

    /// Router with the guard applied to protected routes.
    pub fn router(&self) -> axum::Router {
        routes::router(self.validator())
    }

    /// Stop the background key refresh.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.refresh_task.await;
    }
}
