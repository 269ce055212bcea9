use std::sync::Arc;

use axum::body::Bytes;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderName};
use axum::http::{HeaderMap, HeaderValue};
use axum_extra::extract::cookie::CookieJar;
use serde_json::Value as JsonValue;

use super::error::ProxyError;
use super::state::ProxyServices;

/// Marks requests that went through this proxy.
pub const MIDDLEWARE_HEADER: &str = "x-identity-middleware";
/// Identifies the SDK that issued the request.
pub const SDK_HEADER: &str = "x-identity-sdk";
/// Identifies the host web framework.
pub const FRAMEWORK_HEADER: &str = "x-identity-framework";

const SDK_ID: &str = concat!(env!("CARGO_PKG_NAME"), "@", env!("CARGO_PKG_VERSION"));
const FRAMEWORK_ID: &str = "axum@0.8";

/// Client request body as handed to the rewriter.
#[derive(Debug, Clone, Default)]
pub enum OutboundBody {
    #[default]
    Empty,
    /// Forwarded byte-for-byte.
    Raw(Bytes),
    /// Already parsed by the host; re-serialized as JSON.
    Parsed(JsonValue),
}

/// Outbound leg: prepares a client request for the identity service.
pub struct RequestRewriter {
    services: Arc<ProxyServices>,
}

impl RequestRewriter {
    #[must_use]
    pub fn new(services: Arc<ProxyServices>) -> Self {
        Self { services }
    }

    /// Rewrite `outbound` in place and return the body to send.
    ///
    /// Never fails: header errors are logged and the request goes out with
    /// whatever was set before the failure.
    pub fn rewrite(
        &self,
        path: &str,
        incoming: &HeaderMap,
        outbound: &mut HeaderMap,
        body: OutboundBody,
    ) -> Bytes {
        tracing::debug!(path, "Going to proxy request");

        if let Err(e) = self.forward_identity_cookies(incoming, outbound) {
            tracing::error!(path, error = %e, "Failed to proxy identity cookies");
        } else {
            stamp_identification(incoming, outbound);
        }

        write_body(path, outbound, body)
    }

    /// Re-emit each identity cookie as its own upstream header.
    fn forward_identity_cookies(
        &self,
        incoming: &HeaderMap,
        outbound: &mut HeaderMap,
    ) -> Result<(), ProxyError> {
        let settings = &self.services.settings;
        let jar = CookieJar::from_headers(incoming);

        for cookie in jar.iter() {
            let name = cookie.name();
            if !name.starts_with(&settings.identity_cookie_prefix)
                || name.starts_with(&settings.cookie_name)
            {
                continue;
            }
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ProxyError::Failure(format!("cookie '{name}': {e}")))?;
            let header_value = HeaderValue::from_str(cookie.value())
                .map_err(|e| ProxyError::Failure(format!("cookie '{name}': {e}")))?;
            tracing::trace!(cookie = %name, "Forwarding identity cookie");
            outbound.insert(header_name, header_value);
        }
        Ok(())
    }
}

fn stamp_identification(incoming: &HeaderMap, outbound: &mut HeaderMap) {
    outbound.insert(MIDDLEWARE_HEADER, HeaderValue::from_static("true"));
    for (name, default) in [(SDK_HEADER, SDK_ID), (FRAMEWORK_HEADER, FRAMEWORK_ID)] {
        let value = incoming
            .get(name)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static(default));
        outbound.insert(name, value);
    }
}

fn write_body(path: &str, outbound: &mut HeaderMap, body: OutboundBody) -> Bytes {
    match body {
        OutboundBody::Empty => Bytes::new(),
        OutboundBody::Raw(bytes) => bytes,
        OutboundBody::Parsed(value) => match serde_json::to_vec(&value) {
            Ok(json) => {
                tracing::trace!(path, "Writing parsed body as JSON");
                outbound.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                outbound.insert(CONTENT_LENGTH, HeaderValue::from(json.len()));
                Bytes::from(json)
            }
            Err(e) => {
                tracing::error!(path, error = %e, "Failed to serialize request body");
                Bytes::new()
            }
        },
    }
}
