//! Instrumented in-crate store used by the unit tests.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use keyward_core::{PrincipalId, RoleId};

use crate::store::{CredentialStore, StoreError, TokenStore};
use crate::token::{AccessToken, TokenHash};

#[derive(Debug, Default)]
struct Grants {
    direct: HashMap<PrincipalId, BTreeSet<String>>,
    memberships: HashMap<PrincipalId, BTreeSet<RoleId>>,
    role_caps: HashMap<RoleId, BTreeSet<String>>,
}

/// Counts every backend call so tests can assert which tiers ran.
#[derive(Debug, Default)]
pub struct FakeStore {
    tokens: Mutex<HashMap<TokenHash, AccessToken>>,
    grants: Mutex<Grants>,
    fail_next: Mutex<Option<StoreError>>,
    update_delay: Mutex<Option<Duration>>,
    pub direct_calls: AtomicUsize,
    pub role_calls: AtomicUsize,
    pub role_cap_calls: AtomicUsize,
}

impl FakeStore {
    pub fn token(&self, hash: &TokenHash) -> Option<AccessToken> {
        self.tokens.lock().unwrap().get(hash).cloned()
    }

    pub fn token_count(&self) -> usize {
        self.tokens.lock().unwrap().len()
    }

    pub fn fail_next(&self, err: StoreError) {
        *self.fail_next.lock().unwrap() = Some(err);
    }

    pub fn set_update_delay(&self, delay: Duration) {
        *self.update_delay.lock().unwrap() = Some(delay);
    }

    pub fn grant_direct(&self, principal: PrincipalId, capability: &str) {
        let mut g = self.grants.lock().unwrap();
        g.direct.entry(principal).or_default().insert(capability.to_string());
    }

    pub fn add_role(&self, principal: PrincipalId, role: RoleId, capabilities: &[&str]) {
        let mut g = self.grants.lock().unwrap();
        g.memberships.entry(principal).or_default().insert(role);
        let caps = g.role_caps.entry(role).or_default();
        caps.extend(capabilities.iter().map(|c| c.to_string()));
    }

    pub fn calls(&self) -> (usize, usize, usize) {
        (
            self.direct_calls.load(Ordering::SeqCst),
            self.role_calls.load(Ordering::SeqCst),
            self.role_cap_calls.load(Ordering::SeqCst),
        )
    }

    fn take_failure(&self) -> Result<(), StoreError> {
        match self.fail_next.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CredentialStore for FakeStore {
    async fn find_direct_capability_names(
        &self,
        principal: PrincipalId,
    ) -> Result<BTreeSet<String>, StoreError> {
        self.direct_calls.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        let g = self.grants.lock().unwrap();
        Ok(g.direct.get(&principal).cloned().unwrap_or_default())
    }

    async fn find_role_ids_for_principal(
        &self,
        principal: PrincipalId,
    ) -> Result<BTreeSet<RoleId>, StoreError> {
        self.role_calls.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        let g = self.grants.lock().unwrap();
        Ok(g.memberships.get(&principal).cloned().unwrap_or_default())
    }

    async fn find_capability_names_for_roles(
        &self,
        roles: &BTreeSet<RoleId>,
    ) -> Result<BTreeSet<String>, StoreError> {
        self.role_cap_calls.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        let g = self.grants.lock().unwrap();
        Ok(roles
            .iter()
            .filter_map(|r| g.role_caps.get(r))
            .flatten()
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TokenStore for FakeStore {
    async fn find_access_token_by_hash(
        &self,
        hash: &TokenHash,
    ) -> Result<Option<AccessToken>, StoreError> {
        self.take_failure()?;
        Ok(self.token(hash))
    }

    async fn insert_access_token(&self, record: &AccessToken) -> Result<(), StoreError> {
        self.take_failure()?;
        let mut tokens = self.tokens.lock().unwrap();
        if tokens.contains_key(&record.secret_hash) {
            return Err(StoreError::UniqueViolation {
                constraint: "access_tokens_secret_hash_key".to_string(),
            });
        }
        tokens.insert(record.secret_hash.clone(), record.clone());
        Ok(())
    }

    async fn delete_access_token_by_hash(&self, hash: &TokenHash) -> Result<bool, StoreError> {
        self.take_failure()?;
        Ok(self.tokens.lock().unwrap().remove(hash).is_some())
    }

    async fn delete_access_tokens_by_principal(
        &self,
        principal: PrincipalId,
    ) -> Result<u64, StoreError> {
        self.take_failure()?;
        let mut tokens = self.tokens.lock().unwrap();
        let before = tokens.len();
        tokens.retain(|_, t| t.principal_id != principal);
        Ok((before - tokens.len()) as u64)
    }

    async fn update_last_used(
        &self,
        hash: &TokenHash,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let delay = *self.update_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.take_failure()?;
        let mut tokens = self.tokens.lock().unwrap();
        match tokens.get_mut(hash) {
            Some(t) => {
                t.last_used_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
