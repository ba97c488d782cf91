//! Authority descriptor: tenant, issuer and accepted audiences.

use crate::config::Config;
use crate::error::ConfigError;

/// Where tokens come from and who they must be addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authority {
    tenant: String,
    client_id: String,
    host: String,
    audiences: Vec<String>,
}

impl Authority {
    /// Build the descriptor from validated configuration.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(
            &config.oauth.authority_host,
            &config.oauth.tenant,
            &config.oauth.client_id,
            &config.api.additional_audiences,
        ))
    }

    /// Both the client id and the App ID URI (`api://{client_id}`) are accepted audiences.
    pub fn new(host: &str, tenant: &str, client_id: &str, extra_audiences: &[String]) -> Self {
        let mut audiences = vec![client_id.to_string(), format!("api://{}", client_id)];
        for aud in extra_audiences {
            if !aud.is_empty() && !audiences.contains(aud) {
                audiences.push(aud.clone());
            }
        }

        Self {
            tenant: tenant.to_string(),
            client_id: client_id.to_string(),
            host: host.trim_end_matches('/').to_string(),
            audiences,
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// `https://login.microsoftonline.com/{tenant}/v2.0`
    pub fn authority_url(&self) -> String {
        format!("{}/{}/v2.0", self.host, self.tenant)
    }

    /// v2.0 tokens carry the authority URL as their issuer.
    pub fn issuer(&self) -> String {
        self.authority_url()
    }

    pub fn audiences(&self) -> &[String] {
        &self.audiences
    }

    /// OpenID Connect discovery document.
    pub fn metadata_url(&self) -> String {
        format!("{}/.well-known/openid-configuration", self.authority_url())
    }

    /// Key set location used when discovery is unavailable.
    pub fn default_jwks_url(&self) -> String {
        format!("{}/{}/discovery/v2.0/keys", self.host, self.tenant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;

    #[test]
    fn test_authority_urls() {
        let authority = Authority::from_config(&test_config()).unwrap();

        assert_eq!(
            authority.issuer(),
            "https://login.microsoftonline.com/contoso-tenant/v2.0"
        );
        assert_eq!(
            authority.metadata_url(),
            "https://login.microsoftonline.com/contoso-tenant/v2.0/.well-known/openid-configuration"
        );
        assert_eq!(
            authority.default_jwks_url(),
            "https://login.microsoftonline.com/contoso-tenant/discovery/v2.0/keys"
        );
    }

    #[test]
    fn test_audiences_contain_client_id() {
        let authority = Authority::new(
            "https://login.microsoftonline.com/",
            "t",
            "client-1",
            &["client-1".to_string(), "https://api.contoso.com".to_string()],
        );

        assert_eq!(
            authority.audiences(),
            &["client-1", "api://client-1", "https://api.contoso.com"]
        );
    }

    #[test]
    fn test_missing_tenant_fails_fast() {
        let mut config = test_config();
        config.oauth.tenant = String::new();
        assert!(matches!(
            Authority::from_config(&config),
            Err(ConfigError::MissingTenant)
        ));
    }
}
