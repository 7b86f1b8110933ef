//! Request-time access decision.
//!
//! `Start -> TokenCheck -> [CapabilityCheck] -> Allowed | Denied`.
//! Transport agnostic: callers hand over the raw `Authorization` header
//! value (if any) and the capability the route requires (if any).

use serde::Serialize;
use tracing::{debug, info, warn};

use keyward_core::{PrincipalId, TokenId};

use crate::context::OpContext;
use crate::ledger::{LedgerError, TokenLedger};
use crate::permissions::Capability;
use crate::resolver::{PermissionResolver, Resolution};
use crate::store::{CredentialStore, TokenStore};
use crate::token::RawToken;

/// Authenticated identity bound to a request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub principal_id: PrincipalId,
    pub token_id: TokenId,
    /// The presented token, kept so the request can revoke itself on logout.
    pub raw_token: RawToken,
}

/// Why a request was denied.
///
/// The variant is the stable reason code; which tier failed during
/// resolution is only ever logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    MissingCredential,
    InvalidOrExpiredCredential,
    InsufficientCapability,
    ResolutionFailure,
}

impl DenialReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenialReason::MissingCredential => "missing_credential",
            DenialReason::InvalidOrExpiredCredential => "invalid_or_expired_credential",
            DenialReason::InsufficientCapability => "insufficient_capability",
            DenialReason::ResolutionFailure => "resolution_failure",
        }
    }

    /// Authentication failures (401) as opposed to authorization failures (403).
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            DenialReason::MissingCredential | DenialReason::InvalidOrExpiredCredential
        )
    }
}

impl core::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone)]
pub enum AccessDecision {
    Allowed(AuthContext),
    Denied(DenialReason),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allowed(_))
    }

    pub fn denial(&self) -> Option<DenialReason> {
        match self {
            AccessDecision::Allowed(_) => None,
            AccessDecision::Denied(reason) => Some(*reason),
        }
    }
}

/// Extract the token from an `Authorization: Bearer <token>` value.
pub fn parse_bearer(header: &str) -> Option<&str> {
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() { None } else { Some(token) }
}

/// Combines the token ledger and the permission resolver.
pub struct AccessGate<T, C> {
    ledger: TokenLedger<T>,
    resolver: PermissionResolver<C>,
}

impl<T, C> AccessGate<T, C>
where
    T: TokenStore,
    C: CredentialStore,
{
    pub fn new(ledger: TokenLedger<T>, resolver: PermissionResolver<C>) -> Self {
        Self { ledger, resolver }
    }

    pub fn ledger(&self) -> &TokenLedger<T> {
        &self.ledger
    }

    pub fn resolver(&self) -> &PermissionResolver<C> {
        &self.resolver
    }

    /// Run the full decision for one request.
    pub async fn decide(
        &self,
        ctx: &OpContext,
        authorization: Option<&str>,
        required: Option<&Capability>,
    ) -> AccessDecision {
        let auth = match self.authenticate(ctx, authorization).await {
            Ok(auth) => auth,
            Err(reason) => return AccessDecision::Denied(reason),
        };

        match required {
            None => AccessDecision::Allowed(auth),
            Some(capability) => match self.authorize(ctx, &auth, capability).await {
                Ok(()) => AccessDecision::Allowed(auth),
                Err(reason) => AccessDecision::Denied(reason),
            },
        }
    }

    /// `Start` and `TokenCheck` only.
    pub async fn authenticate(
        &self,
        ctx: &OpContext,
        authorization: Option<&str>,
    ) -> Result<AuthContext, DenialReason> {
        let Some(raw) = authorization.and_then(parse_bearer) else {
            debug!(reason = %DenialReason::MissingCredential, "request denied");
            return Err(DenialReason::MissingCredential);
        };

        match self.ledger.authenticate(ctx, raw).await {
            Ok(who) => Ok(AuthContext {
                principal_id: who.principal_id,
                token_id: who.token_id,
                raw_token: RawToken::new(raw),
            }),
            Err(LedgerError::InvalidCredential(fault)) => {
                info!(
                    reason = %DenialReason::InvalidOrExpiredCredential,
                    fault = ?fault,
                    "request denied"
                );
                Err(DenialReason::InvalidOrExpiredCredential)
            }
            Err(err) => {
                warn!(reason = %DenialReason::ResolutionFailure, error = %err, "token check failed");
                Err(DenialReason::ResolutionFailure)
            }
        }
    }

    /// `CapabilityCheck` for an already authenticated request.
    pub async fn authorize(
        &self,
        ctx: &OpContext,
        auth: &AuthContext,
        capability: &Capability,
    ) -> Result<(), DenialReason> {
        match self.resolver.resolve(ctx, auth.principal_id, capability).await {
            Ok(Resolution::Granted(_)) => Ok(()),
            Ok(Resolution::Denied { roles }) => {
                info!(
                    reason = %DenialReason::InsufficientCapability,
                    principal_id = %auth.principal_id,
                    capability = %capability,
                    roles_checked = roles,
                    "request denied"
                );
                Err(DenialReason::InsufficientCapability)
            }
            Err(err) => {
                warn!(
                    reason = %DenialReason::ResolutionFailure,
                    principal_id = %auth.principal_id,
                    capability = %capability,
                    error = %err,
                    "capability check failed"
                );
                Err(DenialReason::ResolutionFailure)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Duration;
    use keyward_core::{ManualClock, RoleId};

    use crate::ledger::LedgerConfig;
    use crate::refresher::{LastUsedRefresher, RefresherConfig, RefresherHandle};
    use crate::store::StoreError;
    use crate::test_support::FakeStore;

    struct Fixture {
        store: Arc<FakeStore>,
        clock: Arc<ManualClock>,
        gate: AccessGate<Arc<FakeStore>, Arc<FakeStore>>,
        _refresher: RefresherHandle,
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
        let gate = AccessGate::new(ledger, PermissionResolver::new(store.clone()));
        Fixture {
            store,
            clock,
            gate,
            _refresher: refresher,
        }
    }

    async fn bearer_for(f: &Fixture, principal: PrincipalId) -> String {
        let ctx = OpContext::background();
        let issued = f.gate.ledger().issue(&ctx, principal, "test").await.unwrap();
        format!("Bearer {}", issued.raw.expose())
    }

    #[test]
    fn parse_bearer_rejects_other_schemes_and_blanks() {
        assert_eq!(parse_bearer("Bearer abc"), Some("abc"));
        assert_eq!(parse_bearer("Bearer   abc  "), Some("abc"));
        assert_eq!(parse_bearer("Basic abc"), None);
        assert_eq!(parse_bearer("bearer abc"), None);
        assert_eq!(parse_bearer("Bearer "), None);
        assert_eq!(parse_bearer("Bearer    "), None);
    }

    #[test]
    fn reason_classes_map_to_auth_vs_authz() {
        assert!(DenialReason::MissingCredential.is_authentication_failure());
        assert!(DenialReason::InvalidOrExpiredCredential.is_authentication_failure());
        assert!(!DenialReason::InsufficientCapability.is_authentication_failure());
        assert!(!DenialReason::ResolutionFailure.is_authentication_failure());
    }

    #[tokio::test]
    async fn missing_or_malformed_header_is_missing_credential() {
        let f = fixture();
        let ctx = OpContext::background();

        for header in [None, Some("Token abc"), Some("Bearer ")] {
            let decision = f.gate.decide(&ctx, header, None).await;
            assert_eq!(decision.denial(), Some(DenialReason::MissingCredential));
        }
    }

    #[tokio::test]
    async fn unknown_token_is_invalid_credential() {
        let f = fixture();
        let ctx = OpContext::background();
        let decision = f.gate.decide(&ctx, Some("Bearer kw_pat_unknown"), None).await;
        assert_eq!(decision.denial(), Some(DenialReason::InvalidOrExpiredCredential));
    }

    #[tokio::test]
    async fn valid_token_without_requirement_is_allowed() {
        let f = fixture();
        let p = PrincipalId::new();
        let header = bearer_for(&f, p).await;

        let ctx = OpContext::background();
        match f.gate.decide(&ctx, Some(&header), None).await {
            AccessDecision::Allowed(auth) => {
                assert_eq!(auth.principal_id, p);
                assert_eq!(format!("Bearer {}", auth.raw_token.expose()), header);
            }
            AccessDecision::Denied(reason) => panic!("denied: {reason}"),
        }
        // No requirement means the resolver is never consulted.
        assert_eq!(f.store.calls(), (0, 0, 0));
    }

    #[tokio::test]
    async fn capability_requirement_consults_resolver() {
        let f = fixture();
        let p = PrincipalId::new();
        f.store.add_role(p, RoleId::new(), &["roles:view"]);
        let header = bearer_for(&f, p).await;
        let ctx = OpContext::background();

        let view = Capability::from_static("roles:view");
        let manage = Capability::from_static("roles:manage");

        assert!(f.gate.decide(&ctx, Some(&header), Some(&view)).await.is_allowed());
        assert_eq!(
            f.gate.decide(&ctx, Some(&header), Some(&manage)).await.denial(),
            Some(DenialReason::InsufficientCapability)
        );
    }

    #[tokio::test]
    async fn resolver_fault_is_resolution_failure_not_insufficient() {
        let f = fixture();
        let p = PrincipalId::new();
        let header = bearer_for(&f, p).await;
        let ctx = OpContext::background();

        // Token lookup succeeds; the next call (tier 1) fails.
        let auth = f.gate.authenticate(&ctx, Some(&header)).await.unwrap();
        f.store.fail_next(StoreError::Unavailable("db down".into()));
        let err = f
            .gate
            .authorize(&ctx, &auth, &Capability::from_static("roles:view"))
            .await
            .unwrap_err();

        assert_eq!(err, DenialReason::ResolutionFailure);
    }

    #[tokio::test]
    async fn ledger_fault_is_resolution_failure() {
        let f = fixture();
        let ctx = OpContext::background();
        f.store.fail_next(StoreError::Unavailable("db down".into()));

        let decision = f.gate.decide(&ctx, Some("Bearer kw_pat_whatever"), None).await;
        assert_eq!(decision.denial(), Some(DenialReason::ResolutionFailure));
    }

    #[tokio::test]
    async fn token_expires_after_48_hours() {
        let f = fixture();
        let p = PrincipalId::new();
        let header = bearer_for(&f, p).await;
        let ctx = OpContext::background();

        f.clock.advance(Duration::hours(47));
        assert!(f.gate.decide(&ctx, Some(&header), None).await.is_allowed());

        f.clock.advance(Duration::hours(1));
        for _ in 0..2 {
            assert_eq!(
                f.gate.decide(&ctx, Some(&header), None).await.denial(),
                Some(DenialReason::InvalidOrExpiredCredential)
            );
        }
        assert_eq!(f.store.token_count(), 0);
    }
}
