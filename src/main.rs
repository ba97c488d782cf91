//! Sample API protected by Azure AD bearer tokens.
//!
//! Every `/api` route requires a token issued by the configured tenant for
//! this application. `/health` stays public.

use aad_bearer::config::Config;
use aad_bearer::guard::ApiGuard;
use anyhow::{Context, Result};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    aad_bearer::load_dotenv();

    let config = Config::load();
    let level = config.as_ref().map(|c| c.logging.level.as_str()).unwrap_or("info");
    aad_bearer::init_logging(level);

    let config = match config {
        Ok(c) => {
            info!("Configuration loaded successfully");
            c
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            eprintln!("Configuration error: {}", e);
            eprintln!("\nPlease set the following environment variables:");
            eprintln!("  AZURE_CLIENT_ID=<your-azure-ad-client-id>");
            eprintln!("  AZURE_TENANT_ID=<your-tenant-id>");
            std::process::exit(1);
        }
    };

    info!("Starting {} API v{}", config.app.name, env!("CARGO_PKG_VERSION"));

    let guard = ApiGuard::start(&config)
        .await
        .context("Failed to initialize token validation")?;

    let addr = config.bind_address()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("API listening on http://{}", addr);

    axum::serve(listener, guard.router())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    guard.shutdown().await;
    info!("API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
