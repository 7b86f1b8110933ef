//! Administration of principals, roles and grants.
//!
//! Thin validated layer over [`GrantStore`]. Each call is one logical
//! operation and one store transaction.

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::{info, instrument};

use keyward_core::{CapabilityId, DomainError, PrincipalId, RoleId};

use crate::context::{Cancelled, OpContext};
use crate::permissions::{Capability, CapabilityRecord};
use crate::principal::PrincipalProfile;
use crate::roles::{Role, RoleDetail, RoleSpec};
use crate::store::{GrantStore, StoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdminError {
    #[error("{0}")]
    Validation(String),

    #[error("not found")]
    NotFound,

    #[error("already exists: {0}")]
    Conflict(String),

    /// A role, capability or principal id in the request does not exist.
    #[error("unknown reference: {0}")]
    UnknownReference(String),

    #[error("storage failure: {0}")]
    Storage(StoreError),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl From<StoreError> for AdminError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound => AdminError::NotFound,
            StoreError::UniqueViolation { constraint } => AdminError::Conflict(constraint),
            StoreError::ForeignKeyViolation(what) => AdminError::UnknownReference(what),
            other => AdminError::Storage(other),
        }
    }
}

impl From<DomainError> for AdminError {
    fn from(value: DomainError) -> Self {
        AdminError::Validation(value.detail().to_string())
    }
}

pub struct GrantAdmin<S> {
    store: S,
}

impl<S: GrantStore> GrantAdmin<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[instrument(skip(self, ctx, display_name), err)]
    pub async fn register_principal(
        &self,
        ctx: &OpContext,
        display_name: &str,
    ) -> Result<PrincipalProfile, AdminError> {
        let profile = PrincipalProfile::new(PrincipalId::new(), display_name)?;
        ctx.run(self.store.register_principal(&profile)).await??;
        info!(principal_id = %profile.id, "principal registered");
        Ok(profile)
    }

    /// Oldest principal registered under `display_name`, if any.
    pub async fn find_principal_by_display_name(
        &self,
        ctx: &OpContext,
        display_name: &str,
    ) -> Result<Option<PrincipalProfile>, AdminError> {
        let matches = ctx
            .run(self.store.find_principals_by_display_name(display_name.trim()))
            .await??;
        Ok(matches.into_iter().next())
    }

    pub async fn get_principal(
        &self,
        ctx: &OpContext,
        id: PrincipalId,
    ) -> Result<PrincipalProfile, AdminError> {
        ctx.run(self.store.get_principal(id))
            .await??
            .ok_or(AdminError::NotFound)
    }

    /// Create the capability if its name is new; otherwise return the existing row.
    #[instrument(skip(self, ctx), fields(capability = %name), err)]
    pub async fn ensure_capability(
        &self,
        ctx: &OpContext,
        name: &Capability,
    ) -> Result<CapabilityRecord, AdminError> {
        Ok(ctx.run(self.store.ensure_capability(name)).await??)
    }

    pub async fn list_capabilities(&self, ctx: &OpContext) -> Result<Vec<CapabilityRecord>, AdminError> {
        Ok(ctx.run(self.store.list_capabilities()).await??)
    }

    #[instrument(skip(self, ctx, spec), fields(role = %spec.name), err)]
    pub async fn create_role(&self, ctx: &OpContext, spec: RoleSpec) -> Result<Role, AdminError> {
        let spec = normalized(spec)?;
        let role = ctx.run(self.store.create_role(RoleId::new(), &spec)).await??;
        info!(role_id = %role.id, capabilities = spec.capability_ids.len(), "role created");
        Ok(role)
    }

    /// Rename the role and replace its capability set in one step.
    #[instrument(skip(self, ctx, spec), fields(role_id = %id), err)]
    pub async fn update_role(
        &self,
        ctx: &OpContext,
        id: RoleId,
        spec: RoleSpec,
    ) -> Result<Role, AdminError> {
        let spec = normalized(spec)?;
        let role = ctx.run(self.store.update_role(id, &spec)).await??;
        info!(capabilities = spec.capability_ids.len(), "role updated");
        Ok(role)
    }

    #[instrument(skip(self, ctx), fields(role_id = %id), err)]
    pub async fn delete_role(&self, ctx: &OpContext, id: RoleId) -> Result<(), AdminError> {
        ctx.run(self.store.delete_role(id)).await??;
        info!("role deleted");
        Ok(())
    }

    pub async fn get_role(&self, ctx: &OpContext, id: RoleId) -> Result<RoleDetail, AdminError> {
        ctx.run(self.store.get_role(id)).await??.ok_or(AdminError::NotFound)
    }

    pub async fn list_roles(&self, ctx: &OpContext) -> Result<Vec<Role>, AdminError> {
        Ok(ctx.run(self.store.list_roles()).await??)
    }

    /// Replace the principal's role memberships with exactly `roles`.
    #[instrument(skip(self, ctx, roles), fields(principal_id = %principal, roles = roles.len()), err)]
    pub async fn assign_roles(
        &self,
        ctx: &OpContext,
        principal: PrincipalId,
        roles: BTreeSet<RoleId>,
    ) -> Result<(), AdminError> {
        ctx.run(self.store.replace_principal_roles(principal, &roles)).await??;
        info!("principal roles replaced");
        Ok(())
    }

    /// Replace the principal's direct grants with exactly `capabilities`.
    #[instrument(
        skip(self, ctx, capabilities),
        fields(principal_id = %principal, capabilities = capabilities.len()),
        err
    )]
    pub async fn assign_direct_grants(
        &self,
        ctx: &OpContext,
        principal: PrincipalId,
        capabilities: BTreeSet<CapabilityId>,
    ) -> Result<(), AdminError> {
        ctx.run(self.store.replace_direct_grants(principal, &capabilities))
            .await??;
        info!("principal direct grants replaced");
        Ok(())
    }
}

fn normalized(spec: RoleSpec) -> Result<RoleSpec, AdminError> {
    spec.validate()?;
    Ok(RoleSpec {
        name: spec.name.trim().to_string(),
        capability_ids: spec.capability_ids,
    })
}
