//! Configuration loading and management.
//!
//! Loads configuration from embedded config.toml with environment variable overrides.
//! Validation happens once at startup so that a missing tenant or client id
//! stops the process instead of surfacing as per-request failures.

use crate::error::ConfigError;
use chrono::TimeDelta;
use serde::Deserialize;
use std::env;
use std::net::SocketAddr;
use url::Url;

/// Embedded configuration file content.
const CONFIG_TOML: &str = include_str!("../config.toml");

/// Placeholder written into config.toml for the client id.
const CLIENT_ID_PLACEHOLDER: &str = "YOUR_AZURE_AD_CLIENT_ID";
/// Placeholder written into config.toml for the tenant.
const TENANT_PLACEHOLDER: &str = "YOUR_TENANT_ID";
/// Token placeholder for the client id inside protected-resource scopes.
const CLIENT_ID_SCOPE_TOKEN: &str = "{client_id}";

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub oauth: OAuthConfig,
    pub api: ApiConfig,
    pub client: ClientConfig,
    pub token: TokenConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub tenant: String,
    pub redirect_uri: String,
    #[serde(default = "default_authority_host")]
    pub authority_host: String,
    pub scopes: ScopesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScopesConfig {
    pub scopes: Vec<String>,
}

/// Settings for the API guard.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub bind_address: String,
    /// Audiences accepted besides the client id and its App ID URI.
    #[serde(default)]
    pub additional_audiences: Vec<String>,
    pub key_refresh_interval_secs: u64,
    pub key_refresh_min_interval_secs: u64,
    pub leeway_secs: u64,
}

/// Settings for the client auth shell.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub login_timeout_secs: u64,
    #[serde(default)]
    pub unprotected_resources: Vec<String>,
    #[serde(default)]
    pub protected_resources: Vec<ProtectedResourceConfig>,
}

/// One `url prefix -> scopes` entry of the protected-resource map.
#[derive(Debug, Clone, Deserialize)]
pub struct ProtectedResourceConfig {
    pub url: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub refresh_before_expiry_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

fn default_authority_host() -> String {
    "https://login.microsoftonline.com".to_string()
}

impl Config {
    /// Load configuration from embedded config.toml with environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_toml(CONFIG_TOML)?;

        if let Ok(client_id) = env::var("AZURE_CLIENT_ID") {
            config.oauth.client_id = client_id;
        }

        if let Ok(tenant) = env::var("AZURE_TENANT_ID") {
            config.oauth.tenant = tenant;
        }

        if let Ok(redirect_uri) = env::var("AZURE_REDIRECT_URI") {
            config.oauth.redirect_uri = redirect_uri;
        }

        if let Ok(bind_address) = env::var("API_BIND_ADDRESS") {
            config.api.bind_address = bind_address;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            config.logging.level = log_level;
        }

        config.validate()?;

        Ok(config)
    }

    /// Parse configuration text without applying overrides or validation.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Validate that required configuration is present and well formed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let client_id = self.oauth.client_id.trim();
        if client_id.is_empty() || client_id == CLIENT_ID_PLACEHOLDER {
            return Err(ConfigError::MissingClientId);
        }

        let tenant = self.oauth.tenant.trim();
        if tenant.is_empty() || tenant == TENANT_PLACEHOLDER {
            return Err(ConfigError::MissingTenant);
        }

        self.redirect_url()?;
        Url::parse(&self.oauth.authority_host)
            .map_err(|e| ConfigError::Invalid(format!("authority_host: {}", e)))?;

        i64::try_from(self.token.refresh_before_expiry_seconds)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "refresh_before_expiry_seconds out of range: {}",
                    self.token.refresh_before_expiry_seconds
                ))
            })?;

        for entry in &self.client.protected_resources {
            if entry.url.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "protected resource with empty url".to_string(),
                ));
            }
            if entry.scopes.iter().all(|s| s.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "protected resource '{}' declares no scopes",
                    entry.url
                )));
            }
        }

        Ok(())
    }

    /// The redirect URI as a parsed URL; only loopback http URIs are usable.
    pub fn redirect_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.oauth.redirect_uri)
            .map_err(|e| ConfigError::Invalid(format!("redirect_uri: {}", e)))?;
        if url.scheme() != "http" || url.port_or_known_default().is_none() {
            return Err(ConfigError::Invalid(format!(
                "redirect_uri must be an http loopback address, got '{}'",
                self.oauth.redirect_uri
            )));
        }
        Ok(url)
    }

    /// Socket address the API server binds to.
    pub fn bind_address(&self) -> Result<SocketAddr, ConfigError> {
        self.api
            .bind_address
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("bind_address: {}", e)))
    }

    /// Base URL for the tenant, e.g. `https://login.microsoftonline.com/{tenant}`.
    pub fn tenant_url(&self) -> String {
        format!(
            "{}/{}",
            self.oauth.authority_host.trim_end_matches('/'),
            self.oauth.tenant
        )
    }

    /// Get the authorization URL for Azure AD.
    pub fn auth_url(&self) -> String {
        format!("{}/oauth2/v2.0/authorize", self.tenant_url())
    }

    /// Get the token URL for Azure AD.
    pub fn token_url(&self) -> String {
        format!("{}/oauth2/v2.0/token", self.tenant_url())
    }

    /// Protected-resource entries with `{client_id}` substituted in their scopes.
    pub fn resolved_protected_resources(&self) -> Vec<ProtectedResourceConfig> {
        self.client
            .protected_resources
            .iter()
            .map(|entry| ProtectedResourceConfig {
                url: entry.url.clone(),
                scopes: entry
                    .scopes
                    .iter()
                    .map(|s| s.replace(CLIENT_ID_SCOPE_TOKEN, &self.oauth.client_id))
                    .collect(),
            })
            .collect()
    }
}
