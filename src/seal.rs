use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

use crate::error::Error;
use crate::types::{SealedSession, TokenBundle};

const SEAL_PREFIX: &str = "v1.";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Minimum password length accepted for the sealing key.
pub const MIN_PASSWORD_LEN: usize = 32;

#[derive(Serialize, Deserialize)]
struct Envelope {
    /// Expiry as unix milliseconds.
    exp: i64,
    data: TokenBundle,
}

/// Seals token bundles into opaque, tamper-proof, time-bounded strings.
///
/// The codec is stateless after construction: the key is derived once from
/// the configured password and shared read-only by every request.
#[derive(Clone)]
pub struct SessionCodec {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SessionCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCodec").finish_non_exhaustive()
    }
}

impl SessionCodec {
    /// Derive the sealing key from a password.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the password is shorter than
    /// [`MIN_PASSWORD_LEN`] bytes.
    pub fn new(password: &str) -> Result<Self, Error> {
        if password.len() < MIN_PASSWORD_LEN {
            return Err(Error::Config(format!(
                "encryption password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        let key = Sha256::digest(password.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| Error::Config(format!("encryption key: {e}")))?;
        Ok(Self { cipher })
    }

    /// Seal `bundle` so that it unseals only during the next `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTtl`] if `ttl` is not positive or the expiry
    /// falls outside the representable date range.
    pub fn seal(&self, bundle: &TokenBundle, ttl: Duration) -> Result<SealedSession, Error> {
        self.seal_at(bundle, ttl, OffsetDateTime::now_utc())
    }

    /// [`seal`](Self::seal) with an explicit issue time.
    ///
    /// # Errors
    ///
    /// See [`seal`](Self::seal).
    pub fn seal_at(
        &self,
        bundle: &TokenBundle,
        ttl: Duration,
        now: OffsetDateTime,
    ) -> Result<SealedSession, Error> {
        if !ttl.is_positive() {
            return Err(Error::InvalidTtl);
        }
        let expires = now.checked_add(ttl).ok_or(Error::InvalidTtl)?;
        let envelope = Envelope {
            exp: unix_millis(expires),
            data: bundle.clone(),
        };
        let payload = serde_json::to_vec(&envelope).map_err(|_| Error::InvalidSeal)?;

        let nonce: [u8; NONCE_LEN] = rand::rng().random();
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), payload.as_ref())
            .map_err(|_| Error::InvalidSeal)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);

        Ok(SealedSession(format!(
            "{SEAL_PREFIX}{}",
            URL_SAFE_NO_PAD.encode(out)
        )))
    }

    /// Reverse [`seal`](Self::seal).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExpiredSession`] once the TTL has elapsed and
    /// [`Error::InvalidSeal`] on any authentication or format failure.
    pub fn unseal(&self, sealed: &str) -> Result<TokenBundle, Error> {
        self.unseal_at(sealed, OffsetDateTime::now_utc())
    }

    /// [`unseal`](Self::unseal) checked against an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`unseal`](Self::unseal).
    pub fn unseal_at(&self, sealed: &str, now: OffsetDateTime) -> Result<TokenBundle, Error> {
        let encoded = sealed.strip_prefix(SEAL_PREFIX).ok_or(Error::InvalidSeal)?;
        let raw = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| Error::InvalidSeal)?;

        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::InvalidSeal);
        }

        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::InvalidSeal)?;

        let envelope: Envelope =
            serde_json::from_slice(&plaintext).map_err(|_| Error::InvalidSeal)?;

        if unix_millis(now) >= envelope.exp {
            return Err(Error::ExpiredSession);
        }
        Ok(envelope.data)
    }
}

fn unix_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}
