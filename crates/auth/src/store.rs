//! Credential store contracts.
//!
//! The store is an external collaborator: this crate only states what it
//! needs. Implementations (in-memory, Postgres) live in `keyward-infra`.
//!
//! All set-valued lookups return `BTreeSet`s so results are deduplicated and
//! deterministically ordered.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use keyward_core::{CapabilityId, PrincipalId, RoleId};

use crate::permissions::{Capability, CapabilityRecord};
use crate::principal::PrincipalProfile;
use crate::roles::{Role, RoleDetail, RoleSpec};
use crate::token::{AccessToken, TokenHash};

/// Storage fault, classified structurally (never by parsing driver text).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend unreachable, pool closed, timeout, I/O.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A unique constraint rejected the write.
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    /// A referenced row (principal, role, capability) does not exist.
    #[error("referenced row does not exist: {0}")]
    ForeignKeyViolation(String),

    /// The row addressed by an update/delete does not exist.
    #[error("not found")]
    NotFound,

    /// A stored row could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Grant lookups used by the permission resolver.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Capabilities granted directly to the principal (tier 1).
    async fn find_direct_capability_names(
        &self,
        principal: PrincipalId,
    ) -> Result<BTreeSet<String>, StoreError>;

    /// Roles the principal belongs to (tier 2).
    async fn find_role_ids_for_principal(
        &self,
        principal: PrincipalId,
    ) -> Result<BTreeSet<RoleId>, StoreError>;

    /// Union of the capabilities of every given role, in one batched lookup (tier 3).
    ///
    /// Implementations return an empty set for empty input without touching
    /// the backend.
    async fn find_capability_names_for_roles(
        &self,
        roles: &BTreeSet<RoleId>,
    ) -> Result<BTreeSet<String>, StoreError>;
}

/// Persistence for access token records, keyed by secret hash.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn find_access_token_by_hash(
        &self,
        hash: &TokenHash,
    ) -> Result<Option<AccessToken>, StoreError>;

    /// Insert atomically; a hash collision surfaces as `UniqueViolation`.
    async fn insert_access_token(&self, record: &AccessToken) -> Result<(), StoreError>;

    /// Returns whether a row was removed.
    async fn delete_access_token_by_hash(&self, hash: &TokenHash) -> Result<bool, StoreError>;

    /// Returns how many rows were removed.
    async fn delete_access_tokens_by_principal(
        &self,
        principal: PrincipalId,
    ) -> Result<u64, StoreError>;

    /// Returns whether a row was touched; zero rows (revoked meanwhile) is not an error.
    async fn update_last_used(
        &self,
        hash: &TokenHash,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

/// Administration of principals, roles and grants.
///
/// Every method is one logical operation and must be atomic: on failure the
/// previous state is left untouched.
#[async_trait]
pub trait GrantStore: Send + Sync {
    async fn register_principal(&self, principal: &PrincipalProfile) -> Result<(), StoreError>;

    async fn get_principal(&self, id: PrincipalId) -> Result<Option<PrincipalProfile>, StoreError>;

    /// Principals with exactly this display name, oldest first.
    async fn find_principals_by_display_name(
        &self,
        display_name: &str,
    ) -> Result<Vec<PrincipalProfile>, StoreError>;

    /// Idempotent by name: returns the existing row when the name is taken.
    async fn ensure_capability(&self, name: &Capability) -> Result<CapabilityRecord, StoreError>;

    async fn list_capabilities(&self) -> Result<Vec<CapabilityRecord>, StoreError>;

    async fn create_role(&self, id: RoleId, spec: &RoleSpec) -> Result<Role, StoreError>;

    /// Rename and replace the capability set (delete all links, insert the new set).
    async fn update_role(&self, id: RoleId, spec: &RoleSpec) -> Result<Role, StoreError>;

    async fn delete_role(&self, id: RoleId) -> Result<(), StoreError>;

    async fn get_role(&self, id: RoleId) -> Result<Option<RoleDetail>, StoreError>;

    async fn list_roles(&self) -> Result<Vec<Role>, StoreError>;

    async fn replace_principal_roles(
        &self,
        principal: PrincipalId,
        roles: &BTreeSet<RoleId>,
    ) -> Result<(), StoreError>;

    async fn replace_direct_grants(
        &self,
        principal: PrincipalId,
        capabilities: &BTreeSet<CapabilityId>,
    ) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> CredentialStore for Arc<S>
where
    S: CredentialStore + ?Sized,
{
    async fn find_direct_capability_names(
        &self,
        principal: PrincipalId,
    ) -> Result<BTreeSet<String>, StoreError> {
        (**self).find_direct_capability_names(principal).await
    }

    async fn find_role_ids_for_principal(
        &self,
        principal: PrincipalId,
    ) -> Result<BTreeSet<RoleId>, StoreError> {
        (**self).find_role_ids_for_principal(principal).await
    }

    async fn find_capability_names_for_roles(
        &self,
        roles: &BTreeSet<RoleId>,
    ) -> Result<BTreeSet<String>, StoreError> {
        (**self).find_capability_names_for_roles(roles).await
    }
}

#[async_trait]
impl<S> TokenStore for Arc<S>
where
    S: TokenStore + ?Sized,
{
    async fn find_access_token_by_hash(
        &self,
        hash: &TokenHash,
    ) -> Result<Option<AccessToken>, StoreError> {
        (**self).find_access_token_by_hash(hash).await
    }

    async fn insert_access_token(&self, record: &AccessToken) -> Result<(), StoreError> {
        (**self).insert_access_token(record).await
    }

    async fn delete_access_token_by_hash(&self, hash: &TokenHash) -> Result<bool, StoreError> {
        (**self).delete_access_token_by_hash(hash).await
    }

    async fn delete_access_tokens_by_principal(
        &self,
        principal: PrincipalId,
    ) -> Result<u64, StoreError> {
        (**self).delete_access_tokens_by_principal(principal).await
    }

    async fn update_last_used(
        &self,
        hash: &TokenHash,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        (**self).update_last_used(hash, at).await
    }
}

#[async_trait]
impl<S> GrantStore for Arc<S>
where
    S: GrantStore + ?Sized,
{
    async fn register_principal(&self, principal: &PrincipalProfile) -> Result<(), StoreError> {
        (**self).register_principal(principal).await
    }

    async fn get_principal(&self, id: PrincipalId) -> Result<Option<PrincipalProfile>, StoreError> {
        (**self).get_principal(id).await
    }

    async fn find_principals_by_display_name(
        &self,
        display_name: &str,
    ) -> Result<Vec<PrincipalProfile>, StoreError> {
        (**self).find_principals_by_display_name(display_name).await
    }

    async fn ensure_capability(&self, name: &Capability) -> Result<CapabilityRecord, StoreError> {
        (**self).ensure_capability(name).await
    }

    async fn list_capabilities(&self) -> Result<Vec<CapabilityRecord>, StoreError> {
        (**self).list_capabilities().await
    }

    async fn create_role(&self, id: RoleId, spec: &RoleSpec) -> Result<Role, StoreError> {
        (**self).create_role(id, spec).await
    }

    async fn update_role(&self, id: RoleId, spec: &RoleSpec) -> Result<Role, StoreError> {
        (**self).update_role(id, spec).await
    }

    async fn delete_role(&self, id: RoleId) -> Result<(), StoreError> {
        (**self).delete_role(id).await
    }

    async fn get_role(&self, id: RoleId) -> Result<Option<RoleDetail>, StoreError> {
        (**self).get_role(id).await
    }

    async fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        (**self).list_roles().await
    }

    async fn replace_principal_roles(
        &self,
        principal: PrincipalId,
        roles: &BTreeSet<RoleId>,
    ) -> Result<(), StoreError> {
        (**self).replace_principal_roles(principal, roles).await
    }

    async fn replace_direct_grants(
        &self,
        principal: PrincipalId,
        capabilities: &BTreeSet<CapabilityId>,
    ) -> Result<(), StoreError> {
        (**self).replace_direct_grants(principal, capabilities).await
    }
}
