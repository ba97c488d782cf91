//! Bearer token validation against the configured authority.

use super::authority::Authority;
use super::keys::SigningKeys;
use crate::error::TokenValidationError;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// `aud` is either a single string or an array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Self::One(aud) => aud == value,
            Self::Many(auds) => auds.iter().any(|a| a == value),
        }
    }
}

/// Claims resolved from a validated access (or id) token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub aud: Audience,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Object id of the signed-in user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oid: Option<String>,
    /// Tenant id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    /// Space-separated delegated scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scp: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

impl Claims {
    pub fn scopes(&self) -> Vec<&str> {
        self.scp
            .as_deref()
            .map(|s| s.split_whitespace().collect())
            .unwrap_or_default()
    }
}

/// Validates signature, issuer, audience and lifetime of bearer tokens.
pub struct TokenValidator {
    authority: Authority,
    keys: Arc<SigningKeys>,
    leeway_secs: u64,
}

impl TokenValidator {
    pub fn new(authority: Authority, keys: Arc<SigningKeys>, leeway_secs: u64) -> Self {
        Self {
            authority,
            keys,
            leeway_secs,
        }
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Validate a raw JWT and return its claims.
    pub async fn validate(&self, token: &str) -> Result<Claims, TokenValidationError> {
        let header =
            decode_header(token).map_err(|e| TokenValidationError::Malformed(e.to_string()))?;

        if header.alg != Algorithm::RS256 {
            return Err(TokenValidationError::UnsupportedAlgorithm(format!(
                "{:?}",
                header.alg
            )));
        }

        let key = self.resolve_key(header.kid.as_deref()).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[self.authority.issuer()]);
        validation.set_audience(self.authority.audiences());
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.validate_nbf = true;
        validation.leeway = self.leeway_secs;

        let data = decode::<Claims>(token, &key, &validation).map_err(map_jwt_error)?;
        debug!("Validated token for oid {:?}", data.claims.oid);
        Ok(data.claims)
    }

    async fn resolve_key(&self, kid: Option<&str>) -> Result<DecodingKey, TokenValidationError> {
        match self.keys.snapshot().find(kid) {
            Ok(key) => return Ok(key.clone()),
            Err(TokenValidationError::UnknownKey(_)) => {}
            Err(e) => return Err(e),
        }

        // Keys may have rotated since the last refresh
        self.keys.refresh_for_unknown_kid().await;
        self.keys.snapshot().find(kid).cloned()
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> TokenValidationError {
    match err.kind() {
        ErrorKind::InvalidSignature => TokenValidationError::InvalidSignature,
        ErrorKind::InvalidIssuer => TokenValidationError::InvalidIssuer,
        ErrorKind::InvalidAudience => TokenValidationError::InvalidAudience,
        ErrorKind::ExpiredSignature => TokenValidationError::Expired,
        ErrorKind::ImmatureSignature => TokenValidationError::NotYetValid,
        ErrorKind::InvalidAlgorithm => {
            TokenValidationError::UnsupportedAlgorithm("algorithm not allowed".to_string())
        }
        _ => TokenValidationError::Malformed(err.to_string()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::guard::keys::tests::test_jwks;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    pub(crate) const TEST_PRIVATE_KEY: &str = include_str!("../../tests/fixtures/rsa_private.pem");
    const OTHER_PRIVATE_KEY: &str = include_str!("../../tests/fixtures/rsa_other_private.pem");
    pub(crate) const CLIENT_ID: &str = "11111111-2222-3333-4444-555555555555";
    pub(crate) const TENANT: &str = "contoso-tenant";

    pub(crate) fn test_validator() -> TokenValidator {
        let authority = Authority::new("https://login.microsoftonline.com", TENANT, CLIENT_ID, &[]);
        TokenValidator::new(authority, Arc::new(SigningKeys::from_jwks(&test_jwks())), 60)
    }

    pub(crate) fn valid_claims() -> serde_json::Value {
        json!({
            "iss": format!("https://login.microsoftonline.com/{}/v2.0", TENANT),
            "aud": CLIENT_ID,
            "exp": Utc::now().timestamp() + 3600,
            "nbf": Utc::now().timestamp() - 10,
            "oid": "user-object-id",
            "tid": TENANT,
            "name": "Adele Vance",
            "preferred_username": "adele@contoso.com",
            "scp": "access_as_user",
        })
    }

    pub(crate) fn sign_with(claims: &serde_json::Value, pem: &str, kid: Option<&str>) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = kid.map(str::to_string);
        let key = EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap();
        encode(&header, claims, &key).unwrap()
    }

    pub(crate) fn sign(claims: &serde_json::Value) -> String {
        sign_with(claims, TEST_PRIVATE_KEY, Some("test-key-1"))
    }

    #[tokio::test]
    async fn test_valid_token_accepted() {
        let claims = test_validator().validate(&sign(&valid_claims())).await.unwrap();

        assert_eq!(claims.oid.as_deref(), Some("user-object-id"));
        assert_eq!(claims.scopes(), vec!["access_as_user"]);
        assert!(claims.aud.contains(CLIENT_ID));
    }

    #[tokio::test]
    async fn test_app_id_uri_audience_accepted() {
        let mut claims = valid_claims();
        claims["aud"] = json!([format!("api://{}", CLIENT_ID)]);
        assert!(test_validator().validate(&sign(&claims)).await.is_ok());
    }

    #[tokio::test]
    async fn test_wrong_audience_rejected() {
        let mut claims = valid_claims();
        claims["aud"] = json!("some-other-client");
        assert_eq!(
            test_validator().validate(&sign(&claims)).await.err(),
            Some(TokenValidationError::InvalidAudience)
        );
    }

    #[tokio::test]
    async fn test_wrong_issuer_rejected() {
        let mut claims = valid_claims();
        claims["iss"] = json!("https://login.microsoftonline.com/other-tenant/v2.0");
        assert_eq!(
            test_validator().validate(&sign(&claims)).await.err(),
            Some(TokenValidationError::InvalidIssuer)
        );
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let mut claims = valid_claims();
        claims["exp"] = json!(Utc::now().timestamp() - 3600);
        assert_eq!(
            test_validator().validate(&sign(&claims)).await.err(),
            Some(TokenValidationError::Expired)
        );
    }

    #[tokio::test]
    async fn test_future_nbf_rejected() {
        let mut claims = valid_claims();
        claims["nbf"] = json!(Utc::now().timestamp() + 1800);
        assert_eq!(
            test_validator().validate(&sign(&claims)).await.err(),
            Some(TokenValidationError::NotYetValid)
        );
    }

    #[tokio::test]
    async fn test_foreign_signature_rejected() {
        let token = sign_with(&valid_claims(), OTHER_PRIVATE_KEY, Some("test-key-1"));
        assert_eq!(
            test_validator().validate(&token).await.err(),
            Some(TokenValidationError::InvalidSignature)
        );
    }

    #[tokio::test]
    async fn test_unknown_kid_rejected() {
        let token = sign_with(&valid_claims(), TEST_PRIVATE_KEY, Some("rotated-away"));
        assert_eq!(
            test_validator().validate(&token).await.err(),
            Some(TokenValidationError::UnknownKey("rotated-away".into()))
        );
    }

    #[tokio::test]
    async fn test_garbage_rejected() {
        assert!(matches!(
            test_validator().validate("not-a-jwt").await,
            Err(TokenValidationError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_hmac_token_rejected() {
        let token = encode(
            &Header::new(Algorithm::HS256),
            &valid_claims(),
            &EncodingKey::from_secret(b"shared-secret"),
        )
        .unwrap();
        assert!(matches!(
            test_validator().validate(&token).await,
            Err(TokenValidationError::UnsupportedAlgorithm(_))
        ));
    }
}
