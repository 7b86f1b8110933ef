//! Two-tier permission resolution.
//!
//! Tier 1 is the principal's direct grants. Tier 2 is role membership and
//! tier 3 the capabilities of those roles, fetched in one batched lookup.
//! Resolution stops at the first tier that grants the capability; a
//! principal without roles never reaches tier 3.

use std::collections::BTreeSet;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

use keyward_core::{PrincipalId, RoleId};

use crate::context::{Cancelled, OpContext};
use crate::permissions::Capability;
use crate::store::{CredentialStore, StoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("grant lookup failed: {0}")]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Which grant path satisfied a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantTier {
    Direct,
    Role,
}

/// Outcome of a capability check, with the internal detail kept for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Granted(GrantTier),
    /// Not granted; `roles` is how many roles were consulted.
    Denied { roles: usize },
}

impl Resolution {
    pub fn is_granted(&self) -> bool {
        matches!(self, Resolution::Granted(_))
    }
}

/// Resolves capabilities against a credential store.
#[derive(Debug, Clone)]
pub struct PermissionResolver<S> {
    store: S,
}

impl<S: CredentialStore> PermissionResolver<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn has_capability(
        &self,
        ctx: &OpContext,
        principal: PrincipalId,
        capability: &Capability,
    ) -> Result<bool, ResolveError> {
        Ok(self.resolve(ctx, principal, capability).await?.is_granted())
    }

    /// Like [`has_capability`](Self::has_capability) but reports the tier.
    #[instrument(
        skip(self, ctx),
        fields(principal_id = %principal, capability = %capability),
        err
    )]
    pub async fn resolve(
        &self,
        ctx: &OpContext,
        principal: PrincipalId,
        capability: &Capability,
    ) -> Result<Resolution, ResolveError> {
        let direct = ctx
            .run(self.store.find_direct_capability_names(principal))
            .await??;
        if direct.contains(capability.as_str()) {
            debug!(tier = "direct", "capability granted");
            return Ok(Resolution::Granted(GrantTier::Direct));
        }

        let roles = ctx
            .run(self.store.find_role_ids_for_principal(principal))
            .await??;
        if roles.is_empty() {
            debug!("principal has no roles; capability denied");
            return Ok(Resolution::Denied { roles: 0 });
        }

        let from_roles = ctx
            .run(self.store.find_capability_names_for_roles(&roles))
            .await??;
        if from_roles.contains(capability.as_str()) {
            debug!(tier = "role", roles = roles.len(), "capability granted");
            return Ok(Resolution::Granted(GrantTier::Role));
        }

        debug!(roles = roles.len(), "capability denied");
        Ok(Resolution::Denied { roles: roles.len() })
    }

    /// Union of direct and role-derived capabilities, sorted and deduplicated.
    #[instrument(skip(self, ctx), fields(principal_id = %principal), err)]
    pub async fn list_effective_capability_names(
        &self,
        ctx: &OpContext,
        principal: PrincipalId,
    ) -> Result<BTreeSet<String>, ResolveError> {
        let mut effective = ctx
            .run(self.store.find_direct_capability_names(principal))
            .await??;
        let roles = ctx
            .run(self.store.find_role_ids_for_principal(principal))
            .await??;
        effective.extend(self.list_capability_names_for_roles(ctx, &roles).await?);
        Ok(effective)
    }

    /// Capabilities across `roles` in one batched lookup; empty input issues no lookup.
    pub async fn list_capability_names_for_roles(
        &self,
        ctx: &OpContext,
        roles: &BTreeSet<RoleId>,
    ) -> Result<BTreeSet<String>, ResolveError> {
        if roles.is_empty() {
            return Ok(BTreeSet::new());
        }
        Ok(ctx
            .run(self.store.find_capability_names_for_roles(roles))
            .await??)
    }
}
