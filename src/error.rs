/// Errors from the sealed-session protocol.
///
/// Every variant means "no valid session" to a caller reading cookies;
/// none of them carries partially decoded data.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The sealed session decrypted correctly but its time-to-live has lapsed.
    #[error("Sealed session expired")]
    ExpiredSession,

    /// Authentication or format failure (tampered, truncated or foreign value).
    #[error("Invalid sealed session")]
    InvalidSeal,

    /// The first indexed session cookie is missing from the request.
    #[error("Session cookie chunk set is incomplete")]
    IncompleteChunkSet,

    /// A non-positive time-to-live was requested for sealing.
    #[error("Session TTL must be positive")]
    InvalidTtl,

    /// Cookie attributes alone leave no room for a value under the size ceiling.
    #[error("Cookie '{name}' attributes exceed the {max} byte limit")]
    CookieTooLarge { name: String, max: usize },

    /// A token bundle could not be derived from the upstream payload.
    #[error("Token derivation error: {0}")]
    Token(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}
