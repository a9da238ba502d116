//! Azure AD B2C authentication module.
//!
//! Provides B2C policy authorities, OAuth2 with PKCE, a persistent token
//! cache, the identity client used by the session controller, and the
//! Microsoft Graph caller.

pub mod account;
pub mod authority;
pub mod callback_server;
pub mod graph;
pub mod identity;
pub mod oauth;
pub mod token_cache;
