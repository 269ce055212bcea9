use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Tokens issued by the identity service for one authenticated user.
///
/// Produced by a [`TokenDeriver`](crate::TokenDeriver) from an upstream
/// response body. The cookie layer only looks at [`expires_at`](Self::expires_at);
/// everything else travels opaquely inside the sealed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct TokenBundle {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Access-token expiry as a unix timestamp (seconds).
    pub expires_at: i64,
    /// Remaining access-token claims.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub claims: Map<String, JsonValue>,
}

impl TokenBundle {
    #[must_use]
    pub fn new(access_token: impl Into<String>, expires_at: i64) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at,
            claims: Map::new(),
        }
    }

    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    #[must_use]
    pub fn with_claims(mut self, claims: Map<String, JsonValue>) -> Self {
        self.claims = claims;
        self
    }

    /// Gets a claim value by key.
    #[must_use]
    pub fn claim(&self, key: &str) -> Option<&JsonValue> {
        self.claims.get(key)
    }
}

/// Encrypted, authenticated, time-bounded serialization of a [`TokenBundle`].
///
/// Safe to hand to the client as cookie content. Produced by
/// [`SessionCodec::seal`](crate::SessionCodec::seal).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, From, Into)]
pub struct SealedSession(pub String);

impl SealedSession {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_serde_roundtrip_keeps_claims() {
        let mut claims = Map::new();
        claims.insert("sub".into(), JsonValue::from("user-1"));
        let bundle = TokenBundle::new("abc", 1_700_000_000)
            .with_refresh_token("r-1")
            .with_claims(claims);

        let json = serde_json::to_string(&bundle).unwrap();
        let parsed: TokenBundle = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, bundle);
        assert_eq!(parsed.claim("sub"), Some(&JsonValue::from("user-1")));
    }

    #[test]
    fn test_bundle_omits_empty_optionals() {
        let json = serde_json::to_value(TokenBundle::new("abc", 1)).unwrap();
        assert!(json.get("refresh_token").is_none());
        assert!(json.get("claims").is_none());
    }

    #[test]
    fn test_sealed_session_from_string() {
        let sealed = SealedSession::from("v1.xyz".to_string());
        assert_eq!(sealed.to_string(), "v1.xyz");
        assert_eq!(sealed.as_str(), "v1.xyz");
    }
}
