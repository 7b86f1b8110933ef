//! Startup seeding: builtin capabilities and an optional bootstrap administrator.

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::info;

use keyward_auth::{
    AdminError, CapabilityRecord, GrantAdmin, GrantStore, IssuedToken, LedgerError, OpContext,
    PrincipalProfile, TokenLedger, TokenStore, builtin,
};

#[derive(Debug, Error)]
pub enum SeedError {
    #[error(transparent)]
    Admin(#[from] AdminError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Make sure every capability the service gates on exists. Safe to repeat.
pub async fn seed_builtin_capabilities<S: GrantStore>(
    ctx: &OpContext,
    admin: &GrantAdmin<S>,
) -> Result<Vec<CapabilityRecord>, AdminError> {
    let mut records = Vec::with_capacity(builtin::ALL.len());
    for capability in builtin::ALL {
        records.push(admin.ensure_capability(ctx, &capability).await?);
    }
    info!(count = records.len(), "builtin capabilities seeded");
    Ok(records)
}

/// The bootstrap administrator and its only live token.
#[derive(Debug)]
pub struct BootstrapAdmin {
    pub principal: PrincipalProfile,
    pub token: IssuedToken,
    /// `true` when an administrator with this name already existed.
    pub reused: bool,
}

/// Ensure one principal named `display_name` holds every builtin capability
/// as a direct grant, and give it a fresh token.
///
/// Repeated runs reuse the oldest principal with that name and revoke its
/// earlier tokens, so restarts neither add administrators nor pile up tokens.
pub async fn bootstrap_admin<S, T>(
    ctx: &OpContext,
    admin: &GrantAdmin<S>,
    ledger: &TokenLedger<T>,
    display_name: &str,
) -> Result<BootstrapAdmin, SeedError>
where
    S: GrantStore,
    T: TokenStore,
{
    let capabilities = seed_builtin_capabilities(ctx, admin).await?;
    let (principal, reused) = match admin.find_principal_by_display_name(ctx, display_name).await? {
        Some(existing) => (existing, true),
        None => (admin.register_principal(ctx, display_name).await?, false),
    };

    let grants: BTreeSet<_> = capabilities.iter().map(|c| c.id).collect();
    admin.assign_direct_grants(ctx, principal.id, grants).await?;

    let revoked = if reused {
        ledger.revoke_all(ctx, principal.id).await?
    } else {
        0
    };

    let token = ledger.issue(ctx, principal.id, "bootstrap").await?;
    info!(
        principal_id = %principal.id,
        token_id = %token.token_id,
        reused,
        revoked,
        "bootstrap administrator ready"
    );
    Ok(BootstrapAdmin {
        principal,
        token,
        reused,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use keyward_auth::{
        AccessGate, LastUsedRefresher, LedgerConfig, PermissionResolver, RefresherConfig,
    };
    use keyward_core::SystemClock;

    use crate::memory::InMemoryCredentialStore;

    #[tokio::test]
    async fn seeding_twice_keeps_one_row_per_capability() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let admin = GrantAdmin::new(store.clone());
        let ctx = OpContext::background();

        let first = seed_builtin_capabilities(&ctx, &admin).await.unwrap();
        let second = seed_builtin_capabilities(&ctx, &admin).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(admin.list_capabilities(&ctx).await.unwrap().len(), builtin::ALL.len());
    }

    #[tokio::test]
    async fn bootstrap_admin_passes_every_builtin_gate() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let refresher = LastUsedRefresher::spawn(store.clone(), RefresherConfig::default());
        let ledger = TokenLedger::new(
            store.clone(),
            Arc::new(SystemClock),
            LedgerConfig::default(),
            refresher.queue(),
        );
        let admin = GrantAdmin::new(store.clone());
        let ctx = OpContext::background();

        let boot = bootstrap_admin(&ctx, &admin, &ledger, "root").await.unwrap();
        let header = format!("Bearer {}", boot.token.raw.expose());

        let gate = AccessGate::new(ledger, PermissionResolver::new(store.clone()));
        for capability in builtin::ALL {
            let decision = gate.decide(&ctx, Some(&header), Some(&capability)).await;
            assert!(decision.is_allowed(), "{capability} denied");
        }
    }

    #[tokio::test]
    async fn restarts_reuse_the_admin_and_rotate_its_token() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let refresher = LastUsedRefresher::spawn(store.clone(), RefresherConfig::default());
        let ledger = TokenLedger::new(
            store.clone(),
            Arc::new(SystemClock),
            LedgerConfig::default(),
            refresher.queue(),
        );
        let admin = GrantAdmin::new(store.clone());
        let ctx = OpContext::background();

        let first = bootstrap_admin(&ctx, &admin, &ledger, "root").await.unwrap();
        let second = bootstrap_admin(&ctx, &admin, &ledger, " root ").await.unwrap();

        assert!(!first.reused);
        assert!(second.reused);
        assert_eq!(second.principal.id, first.principal.id);
        assert_eq!(
            admin
                .find_principal_by_display_name(&ctx, "root")
                .await
                .unwrap()
                .map(|p| p.id),
            Some(first.principal.id)
        );

        assert!(ledger.authenticate(&ctx, first.token.raw.expose()).await.is_err());
        assert!(ledger.authenticate(&ctx, second.token.raw.expose()).await.is_ok());
    }
}
