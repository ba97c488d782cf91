//! Client auth shell for Azure AD.
//!
//! Interactive sign-in with OAuth2 + PKCE, an in-memory session with a
//! per-scope token cache, a route guard for protected views and an HTTP
//! client that attaches bearer tokens according to a protected-resource map.

pub mod broker;
pub mod callback_server;
pub mod graph;
pub mod interceptor;
pub mod oauth;
pub mod provider;
pub mod resources;
pub mod route_guard;
pub mod session;

pub use broker::TokenBroker;
pub use interceptor::AuthenticatedClient;
pub use provider::{AzureAdProvider, IdentityProvider};
pub use resources::{ProtectedResourceMap, ScopeSet};
pub use route_guard::RouteGuard;
pub use session::{Account, Session};
