use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::header::{CONTENT_LENGTH, COOKIE, LOCATION, REFERER, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::Value as JsonValue;
use time::OffsetDateTime;
use url::Url;

use super::config::ProxySettings;
use super::cookies::CreateCookieOptions;
use super::error::ProxyError;
use super::headers::{is_hop_by_hop, set_cookie_values};
use super::state::ProxyServices;
use crate::error::Error;
use crate::token::{TokenDeriver, access_token_from_body};

const OAUTH_LOGOUT_SUFFIX: &str = "/oauth/logout";

/// SAML/OIDC callbacks answer with a bodiless 302; no session to mint there.
const SSO_POST_SUFFIXES: [&str; 3] = ["/saml/callback", "/oidc/callback", "/postlogin"];

/// Request-side facts the response rewriter needs.
#[derive(Debug, Clone)]
pub struct ExchangeContext {
    /// Request path (a query string, if present, is ignored).
    pub path: String,
    /// Original client request headers.
    pub headers: HeaderMap,
}

/// Fully buffered upstream response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[cfg(feature = "upstream")]
impl UpstreamResponse {
    /// Read the whole upstream body.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Transport`] if the body stream fails.
    pub async fn from_reqwest(response: reqwest::Response) -> Result<Self, ProxyError> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(Self {
            status,
            headers,
            body,
        })
    }
}

/// Classification of a proxied request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlKind {
    Logout,
    OAuthLogout,
    Normal,
}

impl UrlKind {
    pub(crate) fn classify(path: &str, settings: &ProxySettings) -> Self {
        let path = path.split('?').next().unwrap_or_default();
        if path.ends_with(OAUTH_LOGOUT_SUFFIX) {
            Self::OAuthLogout
        } else if path.ends_with(&settings.logout_suffix) {
            Self::Logout
        } else {
            Self::Normal
        }
    }
}

fn is_sso_post_request(path: &str) -> bool {
    let path = path.split('?').next().unwrap_or_default();
    SSO_POST_SUFFIXES.iter().any(|suffix| path.ends_with(suffix))
}

/// Hosted-logout URL on the identity service returning to `redirect`.
#[must_use]
pub fn hosted_logout_url(base_url: &Url, redirect: &str) -> String {
    format!(
        "{}{OAUTH_LOGOUT_SUFFIX}?post_logout_redirect_uri={}",
        base_url.as_str().trim_end_matches('/'),
        urlencoding::encode(redirect)
    )
}

/// Inbound leg: turns a buffered upstream response into the client response,
/// minting or clearing the session cookie on the way.
pub struct ResponseRewriter<D> {
    services: Arc<ProxyServices>,
    deriver: Arc<D>,
}

impl<D: TokenDeriver> ResponseRewriter<D> {
    #[must_use]
    pub fn new(services: Arc<ProxyServices>, deriver: Arc<D>) -> Self {
        Self { services, deriver }
    }

    /// Always produces a response; internal failures become a 500.
    pub async fn rewrite(&self, ctx: ExchangeContext, upstream: UpstreamResponse) -> Response {
        match self.try_rewrite(&ctx, upstream).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(path = %ctx.path, error = %e, "Proxy failed to send response");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
            }
        }
    }

    async fn try_rewrite(
        &self,
        ctx: &ExchangeContext,
        upstream: UpstreamResponse,
    ) -> Result<Response, ProxyError> {
        let settings = &self.services.settings;
        let secure = settings.is_secure();

        match UrlKind::classify(&ctx.path, settings) {
            UrlKind::Normal if is_success(upstream.status) => {
                self.forward_success(ctx, upstream, secure).await
            }
            UrlKind::Normal => {
                let status = upstream.status;
                if is_logged_upstream_error(status) {
                    tracing::error!(
                        path = %ctx.path,
                        status = status.as_u16(),
                        error = %ProxyError::UnexpectedUpstream(status),
                        "Middleware request failed"
                    );
                }
                build_response(upstream, None)
            }
            kind => self.logout(ctx, upstream, kind, secure),
        }
    }

    fn logout(
        &self,
        ctx: &ExchangeContext,
        upstream: UpstreamResponse,
        kind: UrlKind,
        secure: bool,
    ) -> Result<Response, ProxyError> {
        let settings = &self.services.settings;
        let cookies = &self.services.cookies;

        let mut set_cookies = HeaderMap::new();
        for value in cookies.normalize_set_cookie(&set_cookie_values(&upstream.headers), secure) {
            set_cookies.append(SET_COOKIE, header_value(&value)?);
        }
        cookies.stage_removal(&mut set_cookies, &ctx.headers, None, secure);

        if kind == UrlKind::OAuthLogout || settings.hosted_login {
            let location = hosted_logout_url(&settings.base_url, &self.redirect_target(&ctx.headers));
            tracing::info!(path = %ctx.path, "Redirecting to hosted logout");

            let mut response = Response::builder()
                .status(StatusCode::FOUND)
                .header(LOCATION, header_value(&location)?)
                .body(Body::from(location))?;
            for value in set_cookies.get_all(SET_COOKIE) {
                response.headers_mut().append(SET_COOKIE, value.clone());
            }
            return Ok(response);
        }

        build_response(upstream, Some(set_cookies))
    }

    /// Where the identity service sends the browser after hosted logout.
    fn redirect_target(&self, headers: &HeaderMap) -> String {
        let settings = &self.services.settings;
        headers
            .get(REFERER)
            .and_then(|v| v.to_str().ok())
            .filter(|referer| !referer.is_empty() && !referer.ends_with(&settings.app_logout_route))
            .map(str::to_string)
            .unwrap_or_else(|| settings.app_url.to_string())
    }

    async fn forward_success(
        &self,
        ctx: &ExchangeContext,
        upstream: UpstreamResponse,
        secure: bool,
    ) -> Result<Response, ProxyError> {
        let status = upstream.status;
        let mut cookies = self
            .services
            .cookies
            .normalize_set_cookie(&set_cookie_values(&upstream.headers), secure);

        match self.mint_session(&upstream.body, secure).await {
            Ok(Some(session_cookies)) => {
                tracing::debug!(path = %ctx.path, count = session_cookies.len(), "Minted session cookie");
                cookies.extend(session_cookies);
            }
            Ok(None) => {}
            Err(_) if is_silent_mint_failure(status, &ctx.path) => {}
            Err(e) => {
                tracing::warn!(
                    path = %ctx.path,
                    status = status.as_u16(),
                    error = %e,
                    "Failed to create session"
                );
            }
        }

        let mut set_cookies = HeaderMap::new();
        for value in &cookies {
            set_cookies.append(SET_COOKIE, header_value(value)?);
        }
        build_response(upstream, Some(set_cookies))
    }

    /// Session cookie headers for a body carrying an access token.
    async fn mint_session(
        &self,
        body: &Bytes,
        secure: bool,
    ) -> Result<Option<Vec<String>>, ProxyError> {
        if body.is_empty() {
            return Ok(None);
        }
        let json: JsonValue = serde_json::from_slice(body)?;
        if access_token_from_body(&json).is_none() {
            return Ok(None);
        }

        let bundle = self.deriver.derive(&json).await?;
        let expires = OffsetDateTime::from_unix_timestamp(bundle.expires_at)
            .map_err(|e| Error::Token(format!("exp: {e}")))?;
        let sealed = self
            .services
            .codec
            .seal(&bundle, expires - OffsetDateTime::now_utc())?;

        let headers = self.services.cookies.create(
            &CreateCookieOptions::new(sealed)
                .with_expires(expires)
                .with_secure(secure),
        )?;
        Ok(Some(headers))
    }
}

/// Upstream error statuses worth an error log; 404 is routine.
fn is_logged_upstream_error(status: StatusCode) -> bool {
    status.as_u16() >= 400 && status != StatusCode::NOT_FOUND
}

/// SSO callbacks answer with a 302 whose body is not a token payload.
fn is_silent_mint_failure(status: StatusCode, path: &str) -> bool {
    status == StatusCode::FOUND && is_sso_post_request(path)
}

fn is_success(status: StatusCode) -> bool {
    (200..400).contains(&status.as_u16())
}

fn header_value(value: &str) -> Result<HeaderValue, ProxyError> {
    HeaderValue::from_str(value).map_err(|e| ProxyError::Failure(e.to_string()))
}

/// Client response with upstream status, headers and body.
///
/// `cookie`, `content-length` and hop-by-hop headers are dropped. When
/// `set_cookies` is given it replaces the upstream `Set-Cookie` values.
fn build_response(
    upstream: UpstreamResponse,
    set_cookies: Option<HeaderMap>,
) -> Result<Response, ProxyError> {
    let mut response = Response::builder()
        .status(upstream.status)
        .body(Body::from(upstream.body))?;

    let headers = response.headers_mut();
    for (name, value) in &upstream.headers {
        if name == COOKIE || name == CONTENT_LENGTH || is_hop_by_hop(name) {
            continue;
        }
        if set_cookies.is_some() && name == SET_COOKIE {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    if let Some(set_cookies) = set_cookies {
        for value in set_cookies.get_all(SET_COOKIE) {
            headers.append(SET_COOKIE, value.clone());
        }
    }
    Ok(response)
}
