//! Microsoft Graph profile client and the sample API client.
//!
//! Both go through [`AuthenticatedClient`], so the bearer token is chosen by
//! the protected-resource map rather than by the caller.

use super::interceptor::AuthenticatedClient;
use crate::error::{ApiError, AppError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Base URL for Microsoft Graph API.
pub const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Graph `/me` profile client.
pub struct GraphClient {
    client: AuthenticatedClient,
    base_url: String,
}

impl GraphClient {
    pub fn new(client: AuthenticatedClient) -> Self {
        Self::with_base_url(client, GRAPH_BASE_URL)
    }

    pub fn with_base_url(client: AuthenticatedClient, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch the current user's profile.
    pub async fn get_user_profile(&self) -> Result<UserProfile, AppError> {
        get_json(&self.client, &format!("{}/me", self.base_url)).await
    }
}

/// Client for the protected sample API.
pub struct SampleApiClient {
    client: AuthenticatedClient,
    base_url: String,
}

impl SampleApiClient {
    pub fn new(client: AuthenticatedClient, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Claims the API saw in our token.
    pub async fn whoami(&self) -> Result<serde_json::Value, AppError> {
        get_json(&self.client, &format!("{}/api/me", self.base_url)).await
    }

    pub async fn weather_forecast(&self) -> Result<Vec<Forecast>, AppError> {
        get_json(&self.client, &format!("{}/api/weatherforecast", self.base_url)).await
    }
}

async fn get_json<T: DeserializeOwned>(client: &AuthenticatedClient, url: &str) -> Result<T, AppError> {
    let response = client.get(url).await?;

    let status = response.status();
    if !status.is_success() {
        return Err(ApiError::from_status(status.as_u16()).into());
    }

    response
        .json()
        .await
        .map_err(|e| ApiError::ParseFailed(e.to_string()).into())
}

/// User profile from Microsoft Graph /me endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Unique identifier for the user.
    pub id: String,

    pub display_name: Option<String>,
    pub given_name: Option<String>,
    pub surname: Option<String>,
    pub mail: Option<String>,

    /// User Principal Name (typically email-like format).
    pub user_principal_name: Option<String>,

    pub job_title: Option<String>,
}

impl UserProfile {
    /// Get the best available display name.
    pub fn display_name_or_upn(&self) -> String {
        self.display_name
            .clone()
            .or_else(|| self.user_principal_name.clone())
            .unwrap_or_else(|| "Unknown User".to_string())
    }

    /// Get the best available email.
    pub fn email(&self) -> String {
        self.mail
            .clone()
            .or_else(|| self.user_principal_name.clone())
            .unwrap_or_else(|| "No email".to_string())
    }
}

/// One day of the sample API's forecast.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Forecast {
    pub date: String,
    pub temperature_c: i32,
    pub temperature_f: i32,
    pub summary: Option<String>,
}
