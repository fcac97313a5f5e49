//! # rustapi-oauth
//!
//! Multi-provider OAuth2 authorization-code toolkit for RustAPI services.
//!
//! - CSRF-bound `state` with optional PKCE for every login
//! - Code exchange and refresh against Azure AD, Clio, Intuit, Google,
//!   GitHub or a custom authorization server
//! - Tokens stored in request cookies, refresh token encrypted with AES-256-GCM
//! - Tenant-scoped provider instances (`provider:instance`) with sibling
//!   cookie cleanup
//! - Route guards that refresh expired tokens across several providers
//!   and commit all or nothing
//! - Bearer token validation against a cached JWKS
//!
//! The transport is abstracted behind [`RequestContext`](context::RequestContext)
//! and outbound HTTP behind [`HttpFetcher`](fetch::HttpFetcher).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rustapi_oauth::prelude::*;
//!
//! # async fn run(ctx: &mut dyn RequestContext) -> rustapi_oauth::Result<()> {
//! let service = OAuthService::from_env()?;
//! service.register(
//!     "clio",
//!     None,
//!     ProviderConfig::new(
//!         ProviderKind::Clio { region: ClioRegion::Us },
//!         "client-id",
//!         "client-secret",
//!         "https://app.example.com/oauth/clio/callback",
//!     ),
//! )?;
//!
//! // GET /oauth/clio/login
//! service.login(ctx, "clio", LoginOptions::new())?;
//!
//! // GET /oauth/clio/callback?code=...&state=...
//! service
//!     .callback(ctx, "clio", CallbackOptions::new().redirect_to("/"))
//!     .await?;
//!
//! // Any protected route
//! let tokens = service.guard(["clio"])?.authorize(ctx).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! | Variable | Default |
//! |---|---|
//! | `OAUTH_ENCRYPTION_KEY` | required, 64 hex characters |
//! | `OAUTH_CSRF_TTL_SECS` | 300 |
//! | `OAUTH_HTTP_TIMEOUT_SECS` | 30 |
//! | `OAUTH_DEFAULT_TOKEN_LIFETIME_SECS` | 3600 |
//!
//! ## Features
//!
//! - `reqwest` (default): [`ReqwestFetcher`](fetch::ReqwestFetcher) and
//!   [`OAuthService::from_env`]
//! - `test-utils`: the `testing` module with an in-memory request context
//!   and a scripted HTTP fetcher

pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod fetch;
pub mod guard;
pub mod jwt;
pub mod provider;
pub mod service;
pub mod state;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod tokens;

pub use config::{ConfigError, OAuthSettings};
pub use context::{ContextBag, CookieAttributes, CookieOverrides, HttpContext, RequestContext};
pub use error::{ErrorKind, OAuthError, Result};
pub use fetch::{FetchError, FetchRequest, HttpFetcher};
pub use guard::{AccessTokens, RouteGuard};
pub use provider::{ProviderConfig, ProviderKey, ProviderKind, ProviderRegistry};
pub use service::{CallbackOptions, CallbackOutcome, CallbackResult, LoginOptions, OAuthService};
pub use tokens::{TokenSet, TokenValidity};

#[cfg(feature = "reqwest")]
pub use fetch::ReqwestFetcher;

/// Prelude module - import everything you need with `use rustapi_oauth::prelude::*`
pub mod prelude {
    pub use crate::context::{CookieOverrides, HttpContext, RequestContext};
    pub use crate::error::{OAuthError, Result};
    pub use crate::guard::{AccessTokens, RouteGuard};
    pub use crate::jwt::{ValidationErrorCode, ValidationOptions, ValidationResult};
    pub use crate::provider::{
        ClioRegion, IntuitEnvironment, ProviderConfig, ProviderKey, ProviderKind,
    };
    pub use crate::service::{
        CallbackOptions, CallbackOutcome, CallbackResult, LoginOptions, OAuthService,
    };
    pub use crate::state::UserState;
    pub use crate::tokens::TokenSet;
    pub use crate::OAuthSettings;
}
