//! Same-origin identity proxy for Axum.
//!
//! Browser traffic under the mount path is forwarded to the hosted identity
//! service. Identity cookies become upstream headers on the way out; on the
//! way back a successful authentication response mints a sealed, chunked
//! session cookie, and logout responses clear it.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use identity_proxy::JwtPayloadDeriver;
//! use identity_proxy::proxy::{ProxyConfig, proxy_routes};
//!
//! // 1. Configure from environment
//! let config = ProxyConfig::from_env()?;
//!
//! // 2. Mount the proxy routes
//! let app = axum::Router::new()
//!     .merge(proxy_routes(config, JwtPayloadDeriver)?);
//!
//! // 3. Use AuthSession or resolve_session() in your own handlers
//! ```

mod config;
mod cookies;
mod error;
mod extractor;
mod headers;
mod request;
mod response;
#[cfg(feature = "upstream")]
mod routes;
mod state;

pub use config::{COOKIE_MAX_LENGTH, ProxyConfig};
pub use cookies::{CookieManager, CreateCookieOptions, indexed_name};
pub use error::ProxyError;
pub use extractor::{AuthSession, resolve_session};
pub use request::{FRAMEWORK_HEADER, MIDDLEWARE_HEADER, OutboundBody, RequestRewriter, SDK_HEADER};
pub use response::{ExchangeContext, ResponseRewriter, UpstreamResponse, UrlKind, hosted_logout_url};
#[cfg(feature = "upstream")]
pub use routes::proxy_routes;
pub use state::{ProxyServices, ProxyState};
