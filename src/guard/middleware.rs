//! Axum middleware that admits only requests carrying a valid bearer token.

use super::validator::TokenValidator;
use crate::error::TokenValidationError;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// OAuth-style error body returned with every 401.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    error_description: String,
}

/// Bearer authentication middleware.
///
/// For each request:
/// 1. Skips CORS preflight requests
/// 2. Extracts the bearer token, answering 401 if there is none
/// 3. Validates it and inserts the resolved [`Claims`](super::Claims) into request extensions
pub async fn require_bearer(
    State(validator): State<Arc<TokenValidator>>,
    mut req: Request,
    next: Next,
) -> Response {
    if is_preflight_request(req.method(), req.headers()) {
        return next.run(req).await;
    }

    let Some(token) = extract_bearer_token(req.headers()).map(str::to_owned) else {
        return unauthorized(&TokenValidationError::MissingBearer);
    };

    match validator.validate(&token).await {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Err(err) => {
            debug!("Bearer token rejected: {}", err);
            unauthorized(&err)
        }
    }
}

fn unauthorized(err: &TokenValidationError) -> Response {
    let challenge = format!("Bearer error=\"{}\"", err.error_code());
    let body = ErrorBody {
        error: err.error_code(),
        error_description: err.to_string(),
    };

    let mut response = (StatusCode::UNAUTHORIZED, Json(body)).into_response();
    if let Ok(value) = HeaderValue::from_str(&challenge) {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, value);
    }
    response
}

/// Extract Bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| {
            let (scheme, token) = s.split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
        })
        .filter(|token| !token.is_empty())
}

/// Preflight requests are OPTIONS requests with an Origin and an
/// Access-Control-Request-Method header.
fn is_preflight_request(method: &Method, headers: &HeaderMap) -> bool {
    method == Method::OPTIONS
        && headers.contains_key(header::ORIGIN)
        && headers.contains_key(header::ACCESS_CONTROL_REQUEST_METHOD)
}
