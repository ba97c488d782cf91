//! HTTP routes of the sample API.

use super::middleware::require_bearer;
use super::validator::{Claims, TokenValidator};
use axum::routing::get;
use axum::{middleware, Extension, Json, Router};
use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

const SUMMARIES: [&str; 10] = [
    "Freezing", "Bracing", "Chilly", "Cool", "Mild", "Warm", "Balmy", "Hot", "Sweltering",
    "Scorching",
];

/// One day of sample forecast data.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherForecast {
    pub date: String,
    pub temperature_c: i32,
    pub temperature_f: i32,
    pub summary: &'static str,
}

/// Build the application router.
///
/// `/health` is public; everything under `/api` requires a valid bearer token.
pub fn router(validator: Arc<TokenValidator>) -> Router {
    let protected = Router::new()
        .route("/api/me", get(me))
        .route("/api/weatherforecast", get(weather_forecast))
        .route_layer(middleware::from_fn_with_state(validator, require_bearer));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
}

/// Any origin, method and header.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn me(Extension(claims): Extension<Claims>) -> Json<Value> {
    Json(json!({
        "oid": claims.oid,
        "tid": claims.tid,
        "name": claims.name,
        "preferredUsername": claims.preferred_username,
        "scopes": claims.scopes(),
        "roles": claims.roles,
    }))
}

async fn weather_forecast() -> Json<Vec<WeatherForecast>> {
    let today = Utc::now().date_naive();
    let forecast = (1..=5)
        .map(|day| {
            let temperature_c = (day * 13 + 7) % 75 - 20;
            WeatherForecast {
                date: (today + Duration::days(day as i64)).to_string(),
                temperature_c,
                temperature_f: 32 + (temperature_c as f64 / 0.5556) as i32,
                summary: SUMMARIES[day as usize % SUMMARIES.len()],
            }
        })
        .collect();
    Json(forecast)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::validator::tests::{sign, test_validator, valid_claims, CLIENT_ID};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request, StatusCode};
    use tower::ServiceExt;

    fn app() -> Router {
        router(Arc::new(test_validator()))
    }

    async fn get_with(path: &str, auth: Option<String>) -> axum::response::Response {
        let mut builder = Request::builder().uri(path);
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        app().oneshot(builder.body(Body::empty()).unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let response = get_with("/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        for path in ["/api/me", "/api/weatherforecast"] {
            let response = get_with(path, None).await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", path);
            assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
        }
    }

    #[tokio::test]
    async fn test_wrong_audience_is_unauthorized() {
        let mut claims = valid_claims();
        claims["aud"] = serde_json::json!("not-the-client");
        let response = get_with("/api/me", Some(format!("Bearer {}", sign(&claims)))).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "invalid_token");
    }

    #[tokio::test]
    async fn test_valid_token_reaches_handler() {
        let token = sign(&valid_claims());
        let response = get_with("/api/me", Some(format!("Bearer {}", token))).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["oid"], "user-object-id");
        assert_eq!(body["preferredUsername"], "adele@contoso.com");
        assert_ne!(body["tid"], CLIENT_ID);
    }

    #[tokio::test]
    async fn test_forecast_returns_five_days() {
        let token = sign(&valid_claims());
        let response = get_with("/api/weatherforecast", Some(format!("Bearer {}", token))).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Vec<Value> = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.len(), 5);
    }

    #[tokio::test]
    async fn test_preflight_bypasses_guard() {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/me")
            .header(header::ORIGIN, "http://localhost:4200")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        assert_ne!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response
            .headers()
            .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }
}
