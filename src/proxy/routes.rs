use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, COOKIE, HOST};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use serde_json::{Map, Value as JsonValue};
use url::Url;

use super::config::ProxyConfig;
use super::error::ProxyError;
use super::headers::is_hop_by_hop;
use super::request::OutboundBody;
use super::response::{ExchangeContext, UpstreamResponse};
use super::state::{ProxyServices, ProxyState};
use crate::error::Error;
use crate::token::TokenDeriver;

/// Largest client body buffered for forwarding.
const MAX_REQUEST_BODY: usize = 2 * 1024 * 1024;

struct RouteState<D> {
    proxy: ProxyState<D>,
    http: reqwest::Client,
    mount_path: Arc<str>,
}

// Manual Clone: avoid derive adding a `D: Clone` bound.
impl<D> Clone for RouteState<D> {
    fn clone(&self) -> Self {
        Self {
            proxy: self.proxy.clone(),
            http: self.http.clone(),
            mount_path: self.mount_path.clone(),
        }
    }
}

/// Create the identity proxy router.
///
/// Every request under the configured mount path is forwarded to the
/// identity service and its response rewritten on the way back.
///
/// # Errors
///
/// Returns [`ProxyError::Config`] if the sealing password is invalid, or
/// [`ProxyError::Transport`] if the HTTP client cannot be built.
pub fn proxy_routes<D: TokenDeriver>(config: ProxyConfig, deriver: D) -> Result<Router, ProxyError> {
    let mount_path = config.settings.mount_path.trim_end_matches('/').to_string();
    let services = ProxyServices::new(config).map_err(|e| match e {
        Error::Config(msg) => ProxyError::Config(msg),
        other => ProxyError::Session(other),
    })?;

    // 3xx answers belong to the browser, not to the proxy.
    let http = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()?;

    let state = RouteState {
        proxy: ProxyState::new(Arc::new(services), Arc::new(deriver)),
        http,
        mount_path: Arc::from(mount_path.as_str()),
    };

    tracing::info!(mount_path = %mount_path, "Identity proxy routes mounted");

    Ok(Router::new()
        .route(&format!("{mount_path}/{{*path}}"), any(forward::<D>))
        .with_state(state))
}

async fn forward<D: TokenDeriver>(
    State(state): State<RouteState<D>>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();
    let request_path = parts.uri.path().to_string();

    let body = match axum::body::to_bytes(body, MAX_REQUEST_BODY).await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(path = %request_path, error = %e, "Failed to read request body");
            return (StatusCode::BAD_REQUEST, "Invalid request body").into_response();
        }
    };

    let mut outbound = HeaderMap::new();
    for (name, value) in &parts.headers {
        if name == HOST || name == COOKIE || name == CONTENT_LENGTH || is_hop_by_hop(name) {
            continue;
        }
        outbound.append(name.clone(), value.clone());
    }

    let outbound_body = parse_body(&parts.headers, body);
    let body = state.proxy.request_rewriter().rewrite(
        &request_path,
        &parts.headers,
        &mut outbound,
        outbound_body,
    );

    let path = upstream_path(&request_path, &state.mount_path);
    let url = upstream_url(&state.proxy.services.settings.base_url, path, parts.uri.query());
    tracing::debug!(path = %request_path, upstream = %url, "Forwarding to identity service");

    let upstream = match send(&state.http, parts.method.clone(), url, outbound, body).await {
        Ok(upstream) => upstream,
        Err(e) => return e.into_response(),
    };

    let ctx = ExchangeContext {
        path: request_path,
        headers: parts.headers,
    };
    state.proxy.response_rewriter().rewrite(ctx, upstream).await
}

async fn send(
    http: &reqwest::Client,
    method: axum::http::Method,
    url: Url,
    headers: HeaderMap,
    body: Bytes,
) -> Result<UpstreamResponse, ProxyError> {
    let response = http
        .request(method, url)
        .headers(headers)
        .body(body)
        .send()
        .await?;
    UpstreamResponse::from_reqwest(response).await
}

/// Still percent-encoded request path below the mount point.
fn upstream_path<'a>(request_path: &'a str, mount_path: &str) -> &'a str {
    request_path
        .strip_prefix(mount_path)
        .unwrap_or(request_path)
        .trim_start_matches('/')
}

fn upstream_url(base_url: &Url, path: &str, query: Option<&str>) -> Url {
    let mut url = base_url.clone();
    let joined = format!("{}/{}", base_url.path().trim_end_matches('/'), path);
    url.set_path(&joined);
    url.set_query(query);
    url
}

/// Form bodies are parsed so they can be re-sent as JSON; anything else
/// is forwarded untouched.
fn parse_body(headers: &HeaderMap, body: Bytes) -> OutboundBody {
    if body.is_empty() {
        return OutboundBody::Empty;
    }

    let is_form = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
    if !is_form {
        return OutboundBody::Raw(body);
    }

    let fields: Map<String, JsonValue> = url::form_urlencoded::parse(&body)
        .into_owned()
        .map(|(k, v)| (k, JsonValue::String(v)))
        .collect();
    OutboundBody::Parsed(JsonValue::Object(fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    #[test]
    fn test_upstream_url_joins_paths() {
        let base: Url = "https://auth.example/tenant/".parse().unwrap();
        let url = upstream_url(&base, "identity/resources/auth/v1/user", Some("a=1"));
        assert_eq!(
            url.as_str(),
            "https://auth.example/tenant/identity/resources/auth/v1/user?a=1"
        );

        let base: Url = "https://auth.example".parse().unwrap();
        let url = upstream_url(&base, "oauth/logout", None);
        assert_eq!(url.as_str(), "https://auth.example/oauth/logout");
    }

    #[test]
    fn test_upstream_path_keeps_encoding() {
        assert_eq!(
            upstream_path("/api/identity/users/a%2Fb", "/api/identity"),
            "users/a%2Fb"
        );
        assert_eq!(
            upstream_path("/api/identity/users/a%2541", "/api/identity"),
            "users/a%2541"
        );

        let base: Url = "https://auth.example".parse().unwrap();
        let url = upstream_url(&base, "users/a%2Fb/c%2541", None);
        assert_eq!(url.path(), "/users/a%2Fb/c%2541");
    }

    #[test]
    fn test_short_password_rejected() {
        let config = ProxyConfig::new(
            "https://app.example".parse().unwrap(),
            "https://auth.example".parse().unwrap(),
            "client-1",
            "too-short",
        );
        let result = proxy_routes(config, crate::JwtPayloadDeriver);
        assert!(matches!(result, Err(ProxyError::Config(_))));
    }

    #[test]
    fn test_parse_form_body() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded; charset=utf-8"),
        );
        let body = parse_body(&headers, Bytes::from_static(b"email=a%40b.c&name=x+y"));
        match body {
            OutboundBody::Parsed(value) => {
                assert_eq!(value, json!({"email": "a@b.c", "name": "x y"}));
            }
            other => panic!("expected parsed body, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_json_body_is_raw() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let body = parse_body(&headers, Bytes::from_static(br#"{"a":1}"#));
        assert!(matches!(body, OutboundBody::Raw(_)));
        assert!(matches!(
            parse_body(&headers, Bytes::new()),
            OutboundBody::Empty
        ));
    }
}
