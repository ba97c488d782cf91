//! Error types for the bearer-token guard and the client auth shell.
//!
//! Uses `thiserror` for library-style errors with automatic `Display` and `Error` implementations.

use thiserror::Error;

/// Top-level application error type.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Token validation error: {0}")]
    TokenValidation(#[from] TokenValidationError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Startup configuration errors. Always fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "Azure AD client_id not configured. Set AZURE_CLIENT_ID environment variable \
         or update config.toml"
    )]
    MissingClientId,

    #[error(
        "Azure AD tenant not configured. Set AZURE_TENANT_ID environment variable \
         or update config.toml"
    )]
    MissingTenant,

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to load signing keys: {0}")]
    SigningKeys(String),
}

/// Per-request bearer token validation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("Missing or malformed Authorization header")]
    MissingBearer,

    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("No signing key matches kid '{0}'")]
    UnknownKey(String),

    #[error("Token has no kid and the key set holds more than one key")]
    AmbiguousKey,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid issuer")]
    InvalidIssuer,

    #[error("Invalid audience")]
    InvalidAudience,

    #[error("Token expired")]
    Expired,

    #[error("Token not yet valid")]
    NotYetValid,
}

impl TokenValidationError {
    /// OAuth error code used in the `WWW-Authenticate` challenge.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingBearer => "invalid_request",
            _ => "invalid_token",
        }
    }
}

/// Authentication-related errors on the client side.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("OAuth2 authorization failed: {0}")]
    OAuthFailed(String),

    #[error("Invalid authorization code")]
    InvalidAuthCode,

    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("Silent token acquisition failed: {0}")]
    SilentAcquisitionFailed(String),

    #[error("Interaction required: {0}")]
    InteractionRequired(String),

    #[error("State validation failed (possible CSRF attack)")]
    StateValidationFailed,

    #[error("OAuth callback timeout")]
    CallbackTimeout,

    #[error("Callback server error: {0}")]
    CallbackServer(String),

    #[error("User cancelled authentication")]
    UserCancelled,

    #[error("No signed-in account")]
    NoAccount,

    #[error("Another sign-in is already in progress")]
    InteractionInProgress,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl AuthError {
    /// True when the failure can be recovered by asking the user to sign in again.
    pub fn is_interaction_required(&self) -> bool {
        matches!(
            self,
            Self::SilentAcquisitionFailed(_) | Self::InteractionRequired(_) | Self::NoAccount
        )
    }

    /// True when the user ended the interactive flow without signing in.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::UserCancelled | Self::CallbackTimeout)
    }
}

/// API-related errors.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse API response: {0}")]
    ParseFailed(String),

    #[error("Unauthorized (401): Token may be expired")]
    Unauthorized,

    #[error("Forbidden (403): Insufficient permissions")]
    Forbidden,

    #[error("Rate limited (429): Too many requests")]
    RateLimited,
}

impl ApiError {
    /// Map a non-success HTTP status to an error.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            429 => Self::RateLimited,
            // Don't expose raw API error details - just the status code
            status => Self::RequestFailed(format!("HTTP {}", status)),
        }
    }
}

impl AppError {
    /// Returns a user-friendly message for display.
    pub fn user_message(&self) -> &str {
        match self {
            Self::Config(_) => "Configuration error. Please check settings.",
            Self::Auth(AuthError::UserCancelled) => "Sign-in was cancelled.",
            Self::Auth(AuthError::CallbackTimeout) => "Sign-in timed out. Please try again.",
            Self::Auth(AuthError::StateValidationFailed) => {
                "Security error. Please try signing in again."
            }
            Self::Auth(AuthError::SilentAcquisitionFailed(_))
            | Self::Auth(AuthError::InteractionRequired(_)) => {
                "Session expired. Please sign in again."
            }
            Self::Auth(_) => "Sign-in failed. Please try again.",
            Self::TokenValidation(_) => "The access token was rejected.",
            Self::Api(ApiError::Unauthorized) => "Authentication expired. Sign in again.",
            Self::Api(ApiError::Forbidden) => "Insufficient permissions for this operation.",
            Self::Api(ApiError::RateLimited) => "Too many requests. Please wait a moment.",
            Self::Network(_) => "Network error. Check your connection.",
            _ => "An error occurred. Please try again.",
        }
    }

    /// Returns true if this error should send the user back to sign-in.
    pub fn requires_sign_in(&self) -> bool {
        match self {
            Self::Auth(e) => e.is_interaction_required(),
            Self::Api(ApiError::Unauthorized) => true,
            _ => false,
        }
    }
}
