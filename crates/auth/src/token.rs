//! Personal access token model: minting, hashing and the persisted record.
//!
//! Raw tokens look like `kw_pat_<64 hex chars>`. Only the SHA-256 digest of
//! the full string is ever persisted.

use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use keyward_core::{PrincipalId, TokenId};

/// Default prefix marking the token class/version.
pub const DEFAULT_TOKEN_PREFIX: &str = "kw_pat_";

/// Bytes of randomness per token (256 bits).
pub const TOKEN_SECRET_BYTES: usize = 32;

/// Labels longer than this are truncated.
pub const MAX_LABEL_CHARS: usize = 100;

/// Label used when the caller has nothing better (e.g. no user agent).
pub const FALLBACK_LABEL: &str = "Unknown Device";

/// A raw bearer token as handed to the client.
///
/// `Debug` is redacted so the secret cannot leak through logs or panics.
#[derive(Clone, PartialEq, Eq)]
pub struct RawToken(String);

impl RawToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The secret itself. Only for returning it to the client once.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn hash(&self) -> TokenHash {
        TokenHash::of(&self.0)
    }
}

impl core::fmt::Debug for RawToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("RawToken(<redacted>)")
    }
}

/// Lowercase hex SHA-256 digest of a raw token; the persisted lookup key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenHash(String);

impl TokenHash {
    /// Length of the hex encoding.
    pub const LEN: usize = 64;

    pub fn of(raw: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(raw.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Rehydrate a digest read back from storage.
    pub fn from_stored(hex_digest: impl Into<String>) -> Result<Self, TokenFormatError> {
        let s = hex_digest.into();
        if s.len() != Self::LEN || !s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
            return Err(TokenFormatError::MalformedHash);
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Debug for TokenHash {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // The digest is not secret, but a short form keeps logs readable.
        write!(f, "TokenHash({}…)", &self.0[..8.min(self.0.len())])
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenFormatError {
    #[error("stored token hash is not a 64-char lowercase hex digest")]
    MalformedHash,

    #[error("secure randomness unavailable: {0}")]
    Entropy(String),
}

/// Mint a fresh raw token from the OS CSPRNG.
///
/// Never falls back to a weaker generator: an entropy failure is returned.
pub fn mint_token(prefix: &str) -> Result<RawToken, TokenFormatError> {
    let mut secret = [0u8; TOKEN_SECRET_BYTES];
    OsRng
        .try_fill_bytes(&mut secret)
        .map_err(|e| TokenFormatError::Entropy(e.to_string()))?;

    let mut raw = String::with_capacity(prefix.len() + TOKEN_SECRET_BYTES * 2);
    raw.push_str(prefix);
    raw.push_str(&hex::encode(secret));
    Ok(RawToken(raw))
}

/// Normalize a caller-supplied label: blank becomes [`FALLBACK_LABEL`],
/// long values are cut at [`MAX_LABEL_CHARS`].
pub fn normalize_label(label: &str) -> String {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        return FALLBACK_LABEL.to_string();
    }
    trimmed.chars().take(MAX_LABEL_CHARS).collect()
}

/// Persisted access token record. Holds no raw secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub id: TokenId,
    pub secret_hash: TokenHash,
    pub principal_id: PrincipalId,
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    /// A token without `expires_at` never expires by time.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires_at) if now >= expires_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn record(expires_at: Option<DateTime<Utc>>) -> AccessToken {
        AccessToken {
            id: TokenId::new(),
            secret_hash: TokenHash::of("x"),
            principal_id: PrincipalId::new(),
            label: "laptop".to_string(),
            created_at: Utc::now(),
            last_used_at: None,
            expires_at,
        }
    }

    #[test]
    fn minted_token_has_prefix_and_256_bits_of_hex() {
        let raw = mint_token(DEFAULT_TOKEN_PREFIX).unwrap();
        let body = raw.expose().strip_prefix(DEFAULT_TOKEN_PREFIX).unwrap();
        assert_eq!(body.len(), TOKEN_SECRET_BYTES * 2);
        assert!(body.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn minted_tokens_differ() {
        let a = mint_token(DEFAULT_TOKEN_PREFIX).unwrap();
        let b = mint_token(DEFAULT_TOKEN_PREFIX).unwrap();
        assert_ne!(a, b);
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn hash_matches_known_sha256() {
        assert_eq!(
            TokenHash::of("abc").as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn debug_never_prints_the_secret() {
        let raw = mint_token(DEFAULT_TOKEN_PREFIX).unwrap();
        let printed = format!("{raw:?}");
        assert!(!printed.contains(raw.expose()));
    }

    #[test]
    fn from_stored_rejects_non_digests() {
        assert!(TokenHash::from_stored("abc").is_err());
        assert!(TokenHash::from_stored("Z".repeat(64)).is_err());
        let ok = TokenHash::of("anything");
        assert_eq!(TokenHash::from_stored(ok.as_str()).unwrap(), ok);
    }

    #[test]
    fn expiry_boundaries() {
        let now = Utc::now();
        assert!(!record(None).is_expired(now));
        assert!(!record(Some(now + Duration::seconds(1))).is_expired(now));
        assert!(record(Some(now)).is_expired(now));
        assert!(record(Some(now - Duration::hours(1))).is_expired(now));
    }

    #[test]
    fn label_normalization() {
        assert_eq!(normalize_label("   "), FALLBACK_LABEL);
        assert_eq!(normalize_label(" curl/8.0 "), "curl/8.0");
        assert_eq!(normalize_label(&"x".repeat(300)).chars().count(), MAX_LABEL_CHARS);
    }

    proptest! {
        #[test]
        fn hash_is_deterministic_and_fixed_length(raw in ".{0,200}") {
            let a = TokenHash::of(&raw);
            let b = TokenHash::of(&raw);
            prop_assert_eq!(a.as_str().len(), TokenHash::LEN);
            prop_assert_eq!(a, b);
        }
    }
}
