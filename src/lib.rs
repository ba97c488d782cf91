//! Azure AD bearer token sample.
//!
//! [`guard`] protects an HTTP API with server-side JWT validation.
//! [`auth`] is the client side: interactive sign-in, a route guard and an
//! HTTP client that attaches tokens per protected resource.

#![deny(clippy::all)]

pub mod auth;
pub mod config;
pub mod error;
pub mod guard;

use tracing_subscriber::EnvFilter;

/// Initialize tracing/logging. `RUST_LOG` wins over `default_level`.
pub fn init_logging(default_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .try_init();
}

/// Load `.env` if present. Call before reading configuration.
pub fn load_dotenv() {
    if let Err(e) = dotenvy::dotenv() {
        // .env file is optional - only report if it exists but could not be read
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }
}
