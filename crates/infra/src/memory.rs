//! In-memory credential store for tests and local development.
//!
//! One `RwLock` guards the whole state. Every mutation validates first and
//! only then writes, all under a single write guard, so a failed call leaves
//! the state exactly as it was.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use keyward_auth::{
    AccessToken, Capability, CapabilityRecord, CredentialStore, GrantStore, PrincipalProfile, Role,
    RoleDetail, RoleSpec, StoreError, TokenHash, TokenStore,
};
use keyward_core::{CapabilityId, PrincipalId, RoleId};

#[derive(Debug)]
struct RoleRow {
    name: String,
    capabilities: BTreeSet<CapabilityId>,
}

#[derive(Debug, Default)]
struct State {
    principals: BTreeMap<PrincipalId, PrincipalProfile>,
    capabilities: BTreeMap<CapabilityId, Capability>,
    roles: BTreeMap<RoleId, RoleRow>,
    memberships: BTreeMap<PrincipalId, BTreeSet<RoleId>>,
    direct: BTreeMap<PrincipalId, BTreeSet<CapabilityId>>,
    tokens: HashMap<TokenHash, AccessToken>,
}

impl State {
    fn capability_names(&self, ids: &BTreeSet<CapabilityId>) -> BTreeSet<String> {
        ids.iter()
            .filter_map(|id| self.capabilities.get(id))
            .map(|c| c.as_str().to_string())
            .collect()
    }

    fn role_name_taken(&self, name: &str, except: Option<RoleId>) -> bool {
        self.roles
            .iter()
            .any(|(id, row)| row.name == name && Some(*id) != except)
    }

    fn check_capabilities(&self, ids: &BTreeSet<CapabilityId>) -> Result<(), StoreError> {
        match ids.iter().find(|id| !self.capabilities.contains_key(id)) {
            Some(missing) => Err(StoreError::ForeignKeyViolation(format!("capability {missing}"))),
            None => Ok(()),
        }
    }

    fn check_roles(&self, ids: &BTreeSet<RoleId>) -> Result<(), StoreError> {
        match ids.iter().find(|id| !self.roles.contains_key(id)) {
            Some(missing) => Err(StoreError::ForeignKeyViolation(format!("role {missing}"))),
            None => Ok(()),
        }
    }

    fn check_principal(&self, id: PrincipalId) -> Result<(), StoreError> {
        if self.principals.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::NotFound)
        }
    }
}

/// Process-local implementation of every store contract.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    inner: RwLock<State>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_direct_capability_names(
        &self,
        principal: PrincipalId,
    ) -> Result<BTreeSet<String>, StoreError> {
        let state = self.read()?;
        Ok(state
            .direct
            .get(&principal)
            .map(|ids| state.capability_names(ids))
            .unwrap_or_default())
    }

    async fn find_role_ids_for_principal(
        &self,
        principal: PrincipalId,
    ) -> Result<BTreeSet<RoleId>, StoreError> {
        let state = self.read()?;
        Ok(state.memberships.get(&principal).cloned().unwrap_or_default())
    }

    async fn find_capability_names_for_roles(
        &self,
        roles: &BTreeSet<RoleId>,
    ) -> Result<BTreeSet<String>, StoreError> {
        if roles.is_empty() {
            return Ok(BTreeSet::new());
        }
        let state = self.read()?;
        let ids: BTreeSet<CapabilityId> = roles
            .iter()
            .filter_map(|r| state.roles.get(r))
            .flat_map(|row| row.capabilities.iter().copied())
            .collect();
        Ok(state.capability_names(&ids))
    }
}

#[async_trait]
impl TokenStore for InMemoryCredentialStore {
    async fn find_access_token_by_hash(
        &self,
        hash: &TokenHash,
    ) -> Result<Option<AccessToken>, StoreError> {
        Ok(self.read()?.tokens.get(hash).cloned())
    }

    async fn insert_access_token(&self, record: &AccessToken) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if !state.principals.contains_key(&record.principal_id) {
            return Err(StoreError::ForeignKeyViolation(format!(
                "principal {}",
                record.principal_id
            )));
        }
        if state.tokens.contains_key(&record.secret_hash) {
            return Err(StoreError::UniqueViolation {
                constraint: "access_tokens_secret_hash_key".to_string(),
            });
        }
        state.tokens.insert(record.secret_hash.clone(), record.clone());
        Ok(())
    }

    async fn delete_access_token_by_hash(&self, hash: &TokenHash) -> Result<bool, StoreError> {
        Ok(self.write()?.tokens.remove(hash).is_some())
    }

    async fn delete_access_tokens_by_principal(
        &self,
        principal: PrincipalId,
    ) -> Result<u64, StoreError> {
        let mut state = self.write()?;
        let before = state.tokens.len();
        state.tokens.retain(|_, t| t.principal_id != principal);
        Ok((before - state.tokens.len()) as u64)
    }

    async fn update_last_used(
        &self,
        hash: &TokenHash,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.write()?;
        Ok(match state.tokens.get_mut(hash) {
            Some(token) => {
                token.last_used_at = Some(at);
                true
            }
            None => false,
        })
    }
}

#[async_trait]
impl GrantStore for InMemoryCredentialStore {
    async fn register_principal(&self, principal: &PrincipalProfile) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if state.principals.contains_key(&principal.id) {
            return Err(StoreError::UniqueViolation {
                constraint: "principals_pkey".to_string(),
            });
        }
        state.principals.insert(principal.id, principal.clone());
        Ok(())
    }

    async fn get_principal(&self, id: PrincipalId) -> Result<Option<PrincipalProfile>, StoreError> {
        Ok(self.read()?.principals.get(&id).cloned())
    }

    async fn find_principals_by_display_name(
        &self,
        display_name: &str,
    ) -> Result<Vec<PrincipalProfile>, StoreError> {
        let state = self.read()?;
        let mut out: Vec<_> = state
            .principals
            .values()
            .filter(|p| p.display_name == display_name)
            .cloned()
            .collect();
        // v7 ids sort by creation time.
        out.sort_by_key(|p| p.id);
        Ok(out)
    }

    async fn ensure_capability(&self, name: &Capability) -> Result<CapabilityRecord, StoreError> {
        let mut state = self.write()?;
        if let Some((id, existing)) = state.capabilities.iter().find(|(_, c)| *c == name) {
            return Ok(CapabilityRecord {
                id: *id,
                name: existing.clone(),
            });
        }
        let id = CapabilityId::new();
        state.capabilities.insert(id, name.clone());
        Ok(CapabilityRecord {
            id,
            name: name.clone(),
        })
    }

    async fn list_capabilities(&self) -> Result<Vec<CapabilityRecord>, StoreError> {
        let state = self.read()?;
        let mut out: Vec<_> = state
            .capabilities
            .iter()
            .map(|(id, name)| CapabilityRecord {
                id: *id,
                name: name.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn create_role(&self, id: RoleId, spec: &RoleSpec) -> Result<Role, StoreError> {
        let mut state = self.write()?;
        if state.roles.contains_key(&id) {
            return Err(StoreError::UniqueViolation {
                constraint: "roles_pkey".to_string(),
            });
        }
        if state.role_name_taken(&spec.name, None) {
            return Err(StoreError::UniqueViolation {
                constraint: "roles_name_key".to_string(),
            });
        }
        state.check_capabilities(&spec.capability_ids)?;

        state.roles.insert(
            id,
            RoleRow {
                name: spec.name.clone(),
                capabilities: spec.capability_ids.clone(),
            },
        );
        Ok(Role {
            id,
            name: spec.name.clone(),
        })
    }

    async fn update_role(&self, id: RoleId, spec: &RoleSpec) -> Result<Role, StoreError> {
        let mut state = self.write()?;
        if !state.roles.contains_key(&id) {
            return Err(StoreError::NotFound);
        }
        if state.role_name_taken(&spec.name, Some(id)) {
            return Err(StoreError::UniqueViolation {
                constraint: "roles_name_key".to_string(),
            });
        }
        state.check_capabilities(&spec.capability_ids)?;

        let row = state.roles.get_mut(&id).ok_or(StoreError::NotFound)?;
        row.name = spec.name.clone();
        row.capabilities = spec.capability_ids.clone();
        Ok(Role {
            id,
            name: spec.name.clone(),
        })
    }

    async fn delete_role(&self, id: RoleId) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if state.roles.remove(&id).is_none() {
            return Err(StoreError::NotFound);
        }
        for roles in state.memberships.values_mut() {
            roles.remove(&id);
        }
        Ok(())
    }

    async fn get_role(&self, id: RoleId) -> Result<Option<RoleDetail>, StoreError> {
        let state = self.read()?;
        let Some(row) = state.roles.get(&id) else {
            return Ok(None);
        };

        let mut capabilities: Vec<_> = row
            .capabilities
            .iter()
            .filter_map(|cid| {
                state.capabilities.get(cid).map(|name| CapabilityRecord {
                    id: *cid,
                    name: name.clone(),
                })
            })
            .collect();
        capabilities.sort_by(|a, b| a.name.cmp(&b.name));

        let mut members: Vec<_> = state
            .memberships
            .iter()
            .filter(|(_, roles)| roles.contains(&id))
            .filter_map(|(pid, _)| state.principals.get(pid).cloned())
            .collect();
        members.sort_by(|a, b| a.display_name.cmp(&b.display_name));

        Ok(Some(RoleDetail {
            id,
            name: row.name.clone(),
            capabilities,
            members,
        }))
    }

    async fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        let state = self.read()?;
        let mut out: Vec<_> = state
            .roles
            .iter()
            .map(|(id, row)| Role {
                id: *id,
                name: row.name.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn replace_principal_roles(
        &self,
        principal: PrincipalId,
        roles: &BTreeSet<RoleId>,
    ) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.check_principal(principal)?;
        state.check_roles(roles)?;
        if roles.is_empty() {
            state.memberships.remove(&principal);
        } else {
            state.memberships.insert(principal, roles.clone());
        }
        Ok(())
    }

    async fn replace_direct_grants(
        &self,
        principal: PrincipalId,
        capabilities: &BTreeSet<CapabilityId>,
    ) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.check_principal(principal)?;
        state.check_capabilities(capabilities)?;
        if capabilities.is_empty() {
            state.direct.remove(&principal);
        } else {
            state.direct.insert(principal, capabilities.clone());
        }
        Ok(())
    }
}
