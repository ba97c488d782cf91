//! Scope sets and the protected-resource map consulted by the interceptor.

use crate::config::ProtectedResourceConfig;
use std::collections::BTreeSet;
use std::fmt;

/// Scopes the identity provider always grants alongside a sign-in.
pub const OIDC_SCOPES: [&str; 3] = ["openid", "profile", "offline_access"];

/// Normalized set of scopes, used as the token cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            scopes
                .into_iter()
                .map(|s| s.as_ref().trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(&scope.to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Scopes other than the OpenID Connect ones.
    pub fn resource_scopes(&self) -> ScopeSet {
        Self(
            self.0
                .iter()
                .filter(|s| !OIDC_SCOPES.contains(&s.as_str()))
                .cloned()
                .collect(),
        )
    }

    /// True when the only resource scope is the application's own client id,
    /// meaning the application's id token is used as the bearer credential.
    pub fn is_client_id_only(&self, client_id: &str) -> bool {
        let resources = self.resource_scopes();
        resources.0.len() == 1 && resources.contains(client_id)
    }

    /// Space-separated form used on the wire.
    pub fn to_param(&self) -> String {
        self.iter().collect::<Vec<_>>().join(" ")
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_param())
    }
}

/// Ordered `url prefix -> scopes` entries. First match wins.
#[derive(Debug, Clone, Default)]
pub struct ProtectedResourceMap {
    unprotected: Vec<String>,
    entries: Vec<(String, ScopeSet)>,
}

impl ProtectedResourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(entries: &[ProtectedResourceConfig], unprotected: &[String]) -> Self {
        let mut map = Self::new();
        for prefix in unprotected {
            map = map.unprotected(prefix);
        }
        for entry in entries {
            map = map.protect(&entry.url, entry.scopes.iter());
        }
        map
    }

    /// Append a protected prefix.
    pub fn protect<I, S>(mut self, prefix: &str, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.entries.push((prefix.to_string(), ScopeSet::new(scopes)));
        self
    }

    /// Append a prefix that is always sent without a token.
    pub fn unprotected(mut self, prefix: &str) -> Self {
        self.unprotected.push(prefix.to_string());
        self
    }

    /// Scopes required for `url`, or `None` when no token should be attached.
    pub fn scopes_for(&self, url: &str) -> Option<&ScopeSet> {
        if self.unprotected.iter().any(|p| url.starts_with(p.as_str())) {
            return None;
        }

        self.entries
            .iter()
            .find(|(prefix, _)| url.starts_with(prefix.as_str()))
            .map(|(_, scopes)| scopes)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
