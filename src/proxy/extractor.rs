use std::convert::Infallible;

use axum::extract::{FromRequestParts, OptionalFromRequestParts};
use axum::http::HeaderMap;
use axum::http::request::Parts;

use super::error::ProxyError;
use super::state::{ProxyServices, ProxyState};
use crate::error::Error;
use crate::token::TokenDeriver;
use crate::types::TokenBundle;

/// Token bundle unsealed from the request's session cookie.
///
/// Use as an Axum extractor in route handlers sharing the proxy state.
/// Returns `401 Unauthorized` if no valid session exists.
///
/// # Example
///
/// ```rust,ignore
/// async fn protected(session: AuthSession) -> impl IntoResponse {
///     format!("Hello, {:?}", session.bundle.claim("sub"))
/// }
///
/// // Optional: accessible to both authenticated and anonymous users
/// async fn public(session: Option<AuthSession>) -> impl IntoResponse {
///     match session {
///         Some(s) => format!("Token expires at {}", s.bundle.expires_at),
///         None => "Hello, guest".to_string(),
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub bundle: TokenBundle,
}

impl<D: TokenDeriver> FromRequestParts<ProxyState<D>> for AuthSession {
    type Rejection = ProxyError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ProxyState<D>,
    ) -> Result<Self, Self::Rejection> {
        let bundle = resolve_session(&state.services, &parts.headers)?;
        Ok(Self { bundle })
    }
}

impl<D: TokenDeriver> OptionalFromRequestParts<ProxyState<D>> for AuthSession {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ProxyState<D>,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(resolve_session(&state.services, &parts.headers)
            .ok()
            .map(|bundle| Self { bundle }))
    }
}

/// Reassemble and unseal the session cookie carried by `headers`.
///
/// # Errors
///
/// [`Error::IncompleteChunkSet`] when no session cookie is present, else
/// whatever [`SessionCodec::unseal`](crate::SessionCodec::unseal) reports.
pub fn resolve_session(services: &ProxyServices, headers: &HeaderMap) -> Result<TokenBundle, Error> {
    let sealed = services
        .cookies
        .reassemble_from_headers(headers)
        .ok_or(Error::IncompleteChunkSet)?;

    services.codec.unseal(&sealed).inspect_err(|e| {
        tracing::debug!(error = %e, "Session cookie rejected");
    })
}
