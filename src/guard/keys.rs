//! Signing key set fetched from the identity provider's JWKS endpoint.
//!
//! The current set lives behind an [`ArcSwap`]: validations load a snapshot,
//! refreshes build a complete replacement and swap it in.

use crate::error::{ConfigError, TokenValidationError};
use arc_swap::ArcSwap;
use jsonwebtoken::DecodingKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// HTTP request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// HTTP connection timeout.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// JWKS response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

/// JSON Web Key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type (RSA, EC, etc.)
    pub kty: String,

    /// Key use (sig, enc)
    #[serde(rename = "use")]
    pub use_: Option<String>,

    pub alg: Option<String>,

    pub kid: Option<String>,

    /// RSA modulus (base64url)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA exponent (base64url)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
}

impl Jwk {
    fn is_rsa_signing_key(&self) -> bool {
        self.kty == "RSA" && self.use_.as_deref().map_or(true, |u| u == "sig")
    }
}

/// Subset of the OpenID Connect discovery document.
#[derive(Debug, Deserialize)]
struct OpenIdConfiguration {
    issuer: Option<String>,
    jwks_uri: String,
}

/// Immutable snapshot of usable signing keys.
#[derive(Clone, Default)]
pub struct KeySet {
    by_kid: HashMap<String, DecodingKey>,
    unnamed: Vec<DecodingKey>,
}

impl KeySet {
    /// Load every RSA signing key; others are skipped.
    pub fn from_jwks(jwks: &Jwks) -> Self {
        let mut set = Self::default();

        for jwk in jwks.keys.iter().filter(|k| k.is_rsa_signing_key()) {
            let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
                warn!("Skipping RSA key without modulus or exponent: {:?}", jwk.kid);
                continue;
            };

            match DecodingKey::from_rsa_components(n, e) {
                Ok(key) => match &jwk.kid {
                    Some(kid) => {
                        set.by_kid.insert(kid.clone(), key);
                    }
                    None => set.unnamed.push(key),
                },
                Err(e) => warn!("Skipping invalid RSA key {:?}: {}", jwk.kid, e),
            }
        }

        set
    }

    pub fn len(&self) -> usize {
        self.by_kid.len() + self.unnamed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find the key for a token header `kid`.
    ///
    /// Tokens without a `kid` are only accepted when the set holds exactly one key.
    pub fn find(&self, kid: Option<&str>) -> Result<&DecodingKey, TokenValidationError> {
        match kid {
            Some(kid) => self
                .by_kid
                .get(kid)
                .ok_or_else(|| TokenValidationError::UnknownKey(kid.to_string())),
            None if self.len() == 1 => self
                .by_kid
                .values()
                .chain(self.unnamed.iter())
                .next()
                .ok_or(TokenValidationError::AmbiguousKey),
            None => Err(TokenValidationError::AmbiguousKey),
        }
    }
}

/// Where keys are fetched from.
#[derive(Debug, Clone)]
struct KeySource {
    metadata_url: String,
    fallback_jwks_url: String,
}

/// Shared, periodically refreshed signing keys.
pub struct SigningKeys {
    current: ArcSwap<KeySet>,
    source: Option<KeySource>,
    http_client: reqwest::Client,
    min_refresh_interval: Duration,
    last_refresh: Mutex<Option<Instant>>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl SigningKeys {
    /// Keys discovered through `metadata_url`, falling back to `fallback_jwks_url`.
    ///
    /// The set starts empty; call [`SigningKeys::refresh`] before serving.
    pub fn new(
        metadata_url: impl Into<String>,
        fallback_jwks_url: impl Into<String>,
        min_refresh_interval: Duration,
    ) -> Result<Self, ConfigError> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ConfigError::SigningKeys(e.to_string()))?;

        Ok(Self {
            current: ArcSwap::from_pointee(KeySet::default()),
            source: Some(KeySource {
                metadata_url: metadata_url.into(),
                fallback_jwks_url: fallback_jwks_url.into(),
            }),
            http_client,
            min_refresh_interval,
            last_refresh: Mutex::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Fixed keys that are never refreshed.
    pub fn from_jwks(jwks: &Jwks) -> Self {
        Self {
            current: ArcSwap::from_pointee(KeySet::from_jwks(jwks)),
            source: None,
            http_client: reqwest::Client::new(),
            min_refresh_interval: Duration::MAX,
            last_refresh: Mutex::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<KeySet> {
        self.current.load_full()
    }

    /// Fetch the key set and swap it in. The previous set stays active on failure.
    pub async fn refresh(&self) -> Result<usize, ConfigError> {
        let Some(source) = &self.source else {
            return Ok(self.current.load().len());
        };

        let _guard = self.refresh_lock.lock().await;
        self.mark_refreshed();

        let jwks_url = match self.discover_jwks_url(&source.metadata_url).await {
            Ok(url) => url,
            Err(e) => {
                warn!("OpenID discovery failed, using default key endpoint: {}", e);
                source.fallback_jwks_url.clone()
            }
        };

        let jwks = self.fetch_jwks(&jwks_url).await?;
        let set = KeySet::from_jwks(&jwks);
        if set.is_empty() {
            return Err(ConfigError::SigningKeys(format!(
                "no usable RSA signing keys at {}",
                jwks_url
            )));
        }

        let count = set.len();
        self.current.store(Arc::new(set));
        info!("Loaded {} signing keys from {}", count, jwks_url);
        Ok(count)
    }

    /// Refresh for an unknown `kid`, at most once per minimum interval.
    ///
    /// Returns true when a new set was loaded.
    pub async fn refresh_for_unknown_kid(&self) -> bool {
        if self.source.is_none() {
            return false;
        }

        let due = self
            .last_refresh
            .lock()
            .map(|last| last.map_or(true, |t| t.elapsed() >= self.min_refresh_interval))
            .unwrap_or(false);
        if !due {
            debug!("Skipping key refresh; last refresh is too recent");
            return false;
        }

        match self.refresh().await {
            Ok(_) => true,
            Err(e) => {
                warn!("On-demand key refresh failed: {}", e);
                false
            }
        }
    }

    /// Periodically refresh keys until `cancel` fires.
    pub fn spawn_refresh_task(
        self: Arc<Self>,
        every: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Signing key refresh scheduled every {} seconds", every.as_secs());

            let mut interval = tokio::time::interval(every.max(Duration::from_secs(60)));
            // Skip the first immediate tick
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.refresh().await {
                            warn!("Scheduled key refresh failed: {}", e);
                        }
                    }
                    _ = cancel.cancelled() => {
                        info!("Signing key refresh stopped");
                        break;
                    }
                }
            }
        })
    }

    fn mark_refreshed(&self) {
        if let Ok(mut last) = self.last_refresh.lock() {
            *last = Some(Instant::now());
        }
    }

    async fn discover_jwks_url(&self, metadata_url: &str) -> Result<String, ConfigError> {
        let response = self
            .http_client
            .get(metadata_url)
            .send()
            .await
            .map_err(|e| ConfigError::SigningKeys(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ConfigError::SigningKeys(format!(
                "discovery returned HTTP {}",
                response.status().as_u16()
            )));
        }

        let document: OpenIdConfiguration = response
            .json()
            .await
            .map_err(|e| ConfigError::SigningKeys(e.to_string()))?;

        debug!("Discovered issuer {:?}", document.issuer);
        Ok(document.jwks_uri)
    }

    async fn fetch_jwks(&self, jwks_url: &str) -> Result<Jwks, ConfigError> {
        let response = self
            .http_client
            .get(jwks_url)
            .send()
            .await
            .map_err(|e| ConfigError::SigningKeys(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ConfigError::SigningKeys(format!(
                "JWKS fetch failed with HTTP {}",
                response.status().as_u16()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ConfigError::SigningKeys(format!("Failed to parse JWKS: {}", e)))
    }
}
