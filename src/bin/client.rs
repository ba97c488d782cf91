//! Console client for the sample API.
//!
//! Signs in through the system browser, then calls Microsoft Graph and the
//! protected sample API with tokens picked from the protected-resource map.

use aad_bearer::auth::graph::{GraphClient, SampleApiClient};
use aad_bearer::auth::{
    AuthenticatedClient, AzureAdProvider, ProtectedResourceMap, RouteGuard, ScopeSet, Session,
    TokenBroker,
};
use aad_bearer::config::Config;
use aad_bearer::error::{AppError, AuthError};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    aad_bearer::load_dotenv();

    let config = Config::load();
    let level = config.as_ref().map(|c| c.logging.level.as_str()).unwrap_or("info");
    aad_bearer::init_logging(level);

    let config = match config {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting {} client v{}", config.app.name, env!("CARGO_PKG_VERSION"));

    let provider = Arc::new(AzureAdProvider::new(&config).context("Failed to create OAuth client")?);
    let session = Arc::new(Session::new(config.token.refresh_before_expiry_seconds));
    let broker = Arc::new(TokenBroker::new(provider.clone(), session));

    tokio::select! {
        result = run(&config, broker) => result,
        _ = tokio::signal::ctrl_c() => {
            provider.cancel_login();
            info!("Interrupted");
            Ok(())
        }
    }
}

async fn run(config: &Config, broker: Arc<TokenBroker>) -> Result<()> {
    let route_guard = RouteGuard::new(Arc::clone(&broker), ScopeSet::new(&config.oauth.scopes.scopes));
    let account = match route_guard.can_activate().await {
        Ok(account) => account,
        Err(e @ (AuthError::UserCancelled | AuthError::CallbackTimeout)) => {
            warn!("{}", AppError::from(e).user_message());
            return Ok(());
        }
        Err(e) => return Err(e).context("Sign-in failed"),
    };
    info!("Welcome, {}", account.display_name());

    let resources = ProtectedResourceMap::from_config(
        &config.resolved_protected_resources(),
        &config.client.unprotected_resources,
    );
    info!("Protecting {} resource prefixes", resources.len());
    let client = AuthenticatedClient::new(broker, resources)?;

    let graph = GraphClient::new(client.clone());
    match graph.get_user_profile().await {
        Ok(profile) => info!("Graph profile: {} <{}>", profile.display_name_or_upn(), profile.email()),
        Err(e) => report("Graph /me", &e),
    }

    let api = SampleApiClient::new(client, &config.client.api_base_url);
    match api.whoami().await {
        Ok(claims) => info!("API sees: {}", claims),
        Err(e) => report("API /api/me", &e),
    }
    match api.weather_forecast().await {
        Ok(days) => {
            for day in days {
                info!(
                    "{}: {}C {}",
                    day.date,
                    day.temperature_c,
                    day.summary.as_deref().unwrap_or("")
                );
            }
        }
        Err(e) => report("API /api/weatherforecast", &e),
    }

    Ok(())
}

fn report(call: &str, e: &AppError) {
    error!("{} failed: {}", call, e);
    eprintln!("{}: {}", call, e.user_message());
    if e.requires_sign_in() {
        eprintln!("Sign in again to continue.");
    }
}
