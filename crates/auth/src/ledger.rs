//! Token ledger: issue, authenticate and revoke personal access tokens.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use keyward_core::{Clock, PrincipalId, TokenId};

use crate::context::{Cancelled, OpContext};
use crate::refresher::RefreshQueue;
use crate::store::{StoreError, TokenStore};
use crate::token::{
    AccessToken, DEFAULT_TOKEN_PREFIX, RawToken, TokenFormatError, mint_token, normalize_label,
};

/// Reference validity window for issued tokens.
pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 48;

/// Ledger configuration.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Validity window; `None` issues tokens that never expire by time.
    pub token_ttl: Option<Duration>,
    /// Fixed prefix rendered in front of the secret.
    pub token_prefix: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            token_ttl: Some(Duration::hours(DEFAULT_TOKEN_TTL_HOURS)),
            token_prefix: DEFAULT_TOKEN_PREFIX.to_string(),
        }
    }
}

impl LedgerConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = Some(ttl);
        self
    }

    pub fn without_expiry(mut self) -> Self {
        self.token_ttl = None;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.token_prefix = prefix.into();
        self
    }
}

/// Why a presented credential was rejected. Only ever logged; callers see a
/// single error class for both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialFault {
    Unknown,
    Expired,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Unknown or expired token. The two are deliberately indistinguishable.
    #[error("invalid or expired credential")]
    InvalidCredential(CredentialFault),

    #[error("token storage failure: {0}")]
    StorageFailure(#[from] StoreError),

    #[error("secure token generation failed: {0}")]
    Crypto(String),

    /// The configured validity window runs past the representable date range.
    #[error("token expiry out of range")]
    ExpiryOutOfRange,

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl From<TokenFormatError> for LedgerError {
    fn from(value: TokenFormatError) -> Self {
        match value {
            TokenFormatError::Entropy(msg) => LedgerError::Crypto(msg),
            TokenFormatError::MalformedHash => {
                LedgerError::StorageFailure(StoreError::Corrupt(value.to_string()))
            }
        }
    }
}

/// Result of a successful issuance. The raw token is not retrievable again.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token_id: TokenId,
    pub raw: RawToken,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Identity resolved from a presented token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authenticated {
    pub principal_id: PrincipalId,
    pub token_id: TokenId,
}

/// Owns the lifecycle of opaque bearer tokens.
pub struct TokenLedger<S> {
    store: S,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
    refresh: RefreshQueue,
}

impl<S: TokenStore> TokenLedger<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>, config: LedgerConfig, refresh: RefreshQueue) -> Self {
        Self {
            store,
            clock,
            config,
            refresh,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Mint, hash and persist a new token for `principal`.
    #[instrument(skip(self, ctx, label), fields(principal_id = %principal), err)]
    pub async fn issue(
        &self,
        ctx: &OpContext,
        principal: PrincipalId,
        label: &str,
    ) -> Result<IssuedToken, LedgerError> {
        let now = self.clock.now();
        let expires_at = match self.config.token_ttl {
            Some(ttl) => Some(
                now.checked_add_signed(ttl)
                    .ok_or(LedgerError::ExpiryOutOfRange)?,
            ),
            None => None,
        };

        let raw = mint_token(&self.config.token_prefix)?;
        let record = AccessToken {
            id: TokenId::new(),
            secret_hash: raw.hash(),
            principal_id: principal,
            label: normalize_label(label),
            created_at: now,
            last_used_at: None,
            expires_at,
        };

        ctx.run(self.store.insert_access_token(&record)).await??;

        info!(token_id = %record.id, expires_at = ?record.expires_at, "access token issued");
        Ok(IssuedToken {
            token_id: record.id,
            raw,
            expires_at: record.expires_at,
        })
    }

    /// Resolve a raw token to its owner.
    ///
    /// Expired records are deleted on discovery. On success a `last_used_at`
    /// refresh is queued without waiting for it.
    #[instrument(skip_all, err(level = "debug"))]
    pub async fn authenticate(&self, ctx: &OpContext, raw: &str) -> Result<Authenticated, LedgerError> {
        let hash = RawToken::new(raw).hash();

        let Some(record) = ctx.run(self.store.find_access_token_by_hash(&hash)).await?? else {
            return Err(LedgerError::InvalidCredential(CredentialFault::Unknown));
        };

        let now = self.clock.now();
        if record.is_expired(now) {
            match ctx.run(self.store.delete_access_token_by_hash(&hash)).await {
                Ok(Ok(_)) => debug!(token_id = %record.id, "expired token removed"),
                Ok(Err(err)) => {
                    warn!(token_id = %record.id, error = %err, "failed to remove expired token")
                }
                Err(Cancelled) => debug!(token_id = %record.id, "expired token cleanup cancelled"),
            }
            return Err(LedgerError::InvalidCredential(CredentialFault::Expired));
        }

        self.refresh.schedule(record.id, hash, now);

        Ok(Authenticated {
            principal_id: record.principal_id,
            token_id: record.id,
        })
    }

    /// Delete the token matching `raw`. Unknown tokens are not an error.
    #[instrument(skip_all, err)]
    pub async fn revoke(&self, ctx: &OpContext, raw: &str) -> Result<(), LedgerError> {
        let hash = RawToken::new(raw).hash();
        let removed = ctx.run(self.store.delete_access_token_by_hash(&hash)).await??;
        debug!(removed, "token revoke");
        Ok(())
    }

    /// Delete every token owned by `principal`. Returns how many were removed.
    #[instrument(skip(self, ctx), fields(principal_id = %principal), err)]
    pub async fn revoke_all(&self, ctx: &OpContext, principal: PrincipalId) -> Result<u64, LedgerError> {
        let removed = ctx
            .run(self.store.delete_access_tokens_by_principal(principal))
            .await??;
        info!(removed, "all tokens revoked for principal");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    use keyward_core::ManualClock;

    use crate::refresher::{LastUsedRefresher, RefresherConfig};
    use crate::test_support::FakeStore;
    use crate::token::TokenHash;

    struct Fixture {
        store: Arc<FakeStore>,
        clock: Arc<ManualClock>,
        ledger: TokenLedger<Arc<FakeStore>>,
        refresher: crate::refresher::RefresherHandle,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(FakeStore::default());
        let clock = Arc::new(ManualClock::default());
        let refresher = LastUsedRefresher::spawn(store.clone(), RefresherConfig::default());
        let ledger = TokenLedger::new(
            store.clone(),
            clock.clone(),
            LedgerConfig::default(),
            refresher.queue(),
        );
        Fixture {
            store,
            clock,
            ledger,
            refresher,
        }
    }

    #[tokio::test]
    async fn issued_token_authenticates_to_its_owner() {
        let f = fixture();
        let ctx = OpContext::background();
        let principal = PrincipalId::new();

        let issued = f.ledger.issue(&ctx, principal, "laptop").await.unwrap();
        let who = f.ledger.authenticate(&ctx, issued.raw.expose()).await.unwrap();

        assert_eq!(who.principal_id, principal);
        assert_eq!(who.token_id, issued.token_id);
    }

    #[tokio::test]
    async fn only_the_hash_is_persisted() {
        let f = fixture();
        let ctx = OpContext::background();
        let issued = f.ledger.issue(&ctx, PrincipalId::new(), "cli").await.unwrap();

        let stored = f.store.token(&issued.raw.hash()).unwrap();
        assert_eq!(stored.secret_hash, TokenHash::of(issued.raw.expose()));
        assert_ne!(stored.secret_hash.as_str(), issued.raw.expose());
        assert_eq!(stored.label, "cli");
    }

    #[tokio::test]
    async fn expiry_is_48_hours_from_issue() {
        let f = fixture();
        let ctx = OpContext::background();
        let issued_at = f.clock.now();
        let issued = f.ledger.issue(&ctx, PrincipalId::new(), "x").await.unwrap();
        assert_eq!(issued.expires_at, Some(issued_at + Duration::hours(48)));
    }

    #[tokio::test]
    async fn expired_token_fails_like_unknown_and_is_deleted() {
        let f = fixture();
        let ctx = OpContext::background();
        let issued = f.ledger.issue(&ctx, PrincipalId::new(), "phone").await.unwrap();

        f.clock.advance(Duration::hours(48) + Duration::seconds(1));

        let err = f.ledger.authenticate(&ctx, issued.raw.expose()).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidCredential(CredentialFault::Expired)));
        assert!(f.store.token(&issued.raw.hash()).is_none());

        let unknown = f.ledger.authenticate(&ctx, "kw_pat_nope").await.unwrap_err();
        assert_eq!(err.to_string(), unknown.to_string());

        // A second presentation finds nothing at all.
        let again = f.ledger.authenticate(&ctx, issued.raw.expose()).await.unwrap_err();
        assert!(matches!(again, LedgerError::InvalidCredential(CredentialFault::Unknown)));
    }

    #[tokio::test]
    async fn revoke_then_authenticate_fails_and_revoke_is_idempotent() {
        let f = fixture();
        let ctx = OpContext::background();
        let issued = f.ledger.issue(&ctx, PrincipalId::new(), "x").await.unwrap();

        f.ledger.revoke(&ctx, issued.raw.expose()).await.unwrap();
        assert!(f.ledger.authenticate(&ctx, issued.raw.expose()).await.is_err());

        f.ledger.revoke(&ctx, issued.raw.expose()).await.unwrap();
        f.ledger.revoke(&ctx, "kw_pat_never_issued").await.unwrap();
    }

    #[tokio::test]
    async fn revoke_all_is_scoped_to_one_principal() {
        let f = fixture();
        let ctx = OpContext::background();
        let alice = PrincipalId::new();
        let bob = PrincipalId::new();

        let a1 = f.ledger.issue(&ctx, alice, "a1").await.unwrap();
        let a2 = f.ledger.issue(&ctx, alice, "a2").await.unwrap();
        let b1 = f.ledger.issue(&ctx, bob, "b1").await.unwrap();

        assert_eq!(f.ledger.revoke_all(&ctx, alice).await.unwrap(), 2);
        assert!(f.ledger.authenticate(&ctx, a1.raw.expose()).await.is_err());
        assert!(f.ledger.authenticate(&ctx, a2.raw.expose()).await.is_err());
        assert!(f.ledger.authenticate(&ctx, b1.raw.expose()).await.is_ok());

        assert_eq!(f.ledger.revoke_all(&ctx, alice).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn authenticate_refreshes_last_used_in_background() {
        let f = fixture();
        let ctx = OpContext::background();
        let issued = f.ledger.issue(&ctx, PrincipalId::new(), "x").await.unwrap();
        f.clock.advance(Duration::minutes(5));
        let used_at = f.clock.now();

        f.ledger.authenticate(&ctx, issued.raw.expose()).await.unwrap();
        f.refresher.shutdown().await;

        let stored = f.store.token(&issued.raw.hash()).unwrap();
        assert_eq!(stored.last_used_at, Some(used_at));
    }

    #[tokio::test]
    async fn refresh_after_revocation_is_a_harmless_no_op() {
        let f = fixture();
        let ctx = OpContext::background();
        let issued = f.ledger.issue(&ctx, PrincipalId::new(), "x").await.unwrap();

        f.store.set_update_delay(StdDuration::from_millis(20));
        f.ledger.authenticate(&ctx, issued.raw.expose()).await.unwrap();
        f.ledger.revoke(&ctx, issued.raw.expose()).await.unwrap();

        let queue = f.refresher.queue();
        f.refresher.shutdown().await;
        let stats = queue.stats();
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.applied + stats.stale, 1);
    }

    #[tokio::test]
    async fn cancelled_issue_writes_nothing() {
        let f = fixture();
        let ctx = OpContext::background();
        ctx.cancel();

        let err = f.ledger.issue(&ctx, PrincipalId::new(), "x").await.unwrap_err();
        assert!(matches!(err, LedgerError::Cancelled(_)));
        assert_eq!(f.store.token_count(), 0);
    }

    #[tokio::test]
    async fn storage_fault_is_surfaced_as_storage_failure() {
        let f = fixture();
        let ctx = OpContext::background();
        f.store.fail_next(StoreError::Unavailable("down".into()));

        let err = f.ledger.issue(&ctx, PrincipalId::new(), "x").await.unwrap_err();
        assert!(matches!(err, LedgerError::StorageFailure(StoreError::Unavailable(_))));
        assert_eq!(f.store.token_count(), 0);
    }

    #[tokio::test]
    async fn tokens_without_ttl_never_expire() {
        let store = Arc::new(FakeStore::default());
        let clock = Arc::new(ManualClock::default());
        let refresher = LastUsedRefresher::spawn(store.clone(), RefresherConfig::default());
        let ledger = TokenLedger::new(
            store.clone(),
            clock.clone(),
            LedgerConfig::default().without_expiry(),
            refresher.queue(),
        );
        let ctx = OpContext::background();

        let issued = ledger.issue(&ctx, PrincipalId::new(), "svc").await.unwrap();
        assert_eq!(issued.expires_at, None);

        clock.advance(Duration::days(3650));
        assert!(ledger.authenticate(&ctx, issued.raw.expose()).await.is_ok());
    }

    #[tokio::test]
    async fn ttl_past_the_calendar_is_an_error_not_a_panic() {
        let store = Arc::new(FakeStore::default());
        let refresher = LastUsedRefresher::spawn(store.clone(), RefresherConfig::default());
        let ledger = TokenLedger::new(
            store.clone(),
            Arc::new(ManualClock::default()),
            LedgerConfig::default().with_ttl(Duration::hours(10_000_000_000)),
            refresher.queue(),
        );

        let err = ledger
            .issue(&OpContext::background(), PrincipalId::new(), "x")
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::ExpiryOutOfRange);
        assert_eq!(store.token_count(), 0);
    }
}
