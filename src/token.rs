use std::future::Future;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Map, Value as JsonValue};

use crate::error::Error;
use crate::types::TokenBundle;

/// Both spellings the identity service has used for the access-token field.
pub const ACCESS_TOKEN_FIELDS: [&str; 2] = ["accessToken", "access_token"];
/// Both spellings the identity service has used for the refresh-token field.
pub const REFRESH_TOKEN_FIELDS: [&str; 2] = ["refreshToken", "refresh_token"];

/// Consumer-provided token bundle derivation.
///
/// Called by the response rewriter for every successful upstream body that
/// carries an access token. The returned bundle is sealed into the session
/// cookie with a TTL running until [`TokenBundle::expires_at`].
///
/// # Example
///
/// ```rust,ignore
/// impl TokenDeriver for MyVerifier {
///     async fn derive(&self, body: &serde_json::Value) -> Result<TokenBundle, Error> {
///         let token = access_token_from_body(body).ok_or(Error::Token("missing".into()))?;
///         let claims = self.verify(token).await?;
///         Ok(TokenBundle::new(token, claims.exp))
///     }
/// }
/// ```
pub trait TokenDeriver: Send + Sync + 'static {
    /// Build a [`TokenBundle`] from an upstream JSON body.
    fn derive(
        &self,
        body: &JsonValue,
    ) -> impl Future<Output = Result<TokenBundle, Error>> + Send;
}

/// Returns the access token under either accepted field spelling.
#[must_use]
pub fn access_token_from_body(body: &JsonValue) -> Option<&str> {
    first_string_field(body, &ACCESS_TOKEN_FIELDS)
}

fn first_string_field<'a>(body: &'a JsonValue, fields: &[&str]) -> Option<&'a str> {
    fields
        .iter()
        .find_map(|field| body.get(*field).and_then(JsonValue::as_str))
        .filter(|s| !s.is_empty())
}

/// Derives bundles by decoding the access token's JWT payload.
///
/// The signature is NOT verified: the token arrives over the TLS channel
/// to the identity service. Implement [`TokenDeriver`] yourself when the
/// token must be verified locally.
#[derive(Debug, Clone, Copy, Default)]
pub struct JwtPayloadDeriver;

impl TokenDeriver for JwtPayloadDeriver {
    async fn derive(&self, body: &JsonValue) -> Result<TokenBundle, Error> {
        let access_token = access_token_from_body(body)
            .ok_or_else(|| Error::Token("missing claim: access token".into()))?;

        let mut claims = decode_jwt_payload(access_token)?;
        let expires_at = claims
            .remove("exp")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| Error::Token("missing claim: exp".into()))?;

        let mut bundle = TokenBundle::new(access_token, expires_at).with_claims(claims);
        if let Some(refresh) = first_string_field(body, &REFRESH_TOKEN_FIELDS) {
            bundle = bundle.with_refresh_token(refresh);
        }
        Ok(bundle)
    }
}

/// Decodes the payload segment of a JWT without verifying its signature.
///
/// # Errors
///
/// Returns `Error::Token` if the token does not have three segments or the
/// payload is not a base64url-encoded JSON object.
pub fn decode_jwt_payload(token_str: &str) -> Result<Map<String, JsonValue>, Error> {
    let parts: Vec<&str> = token_str.split('.').collect();
    if parts.len() != 3 {
        return Err(Error::Token("invalid token format".into()));
    }

    // Some issuers pad their segments; the engine rejects padding.
    let payload_b64 = parts[1].trim_end_matches('=');
    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| Error::Token("invalid payload".into()))?;

    match serde_json::from_slice(&payload_bytes) {
        Ok(JsonValue::Object(map)) => Ok(map),
        Ok(_) => Err(Error::Token("payload is not an object".into())),
        Err(e) => Err(Error::Token(e.to_string())),
    }
}
