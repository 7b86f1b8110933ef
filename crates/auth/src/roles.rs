
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use keyward_core::{CapabilityId, DomainError, RoleId};

use crate::permissions::CapabilityRecord;
use crate::principal::PrincipalProfile;

pub const MIN_ROLE_NAME_CHARS: usize = 3;
pub const MAX_ROLE_NAME_CHARS: usize = 100;

/// Role row: a named bundle of capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
}

/// Role together with its capabilities and member principals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDetail {
    pub id: RoleId,
    pub name: String,
    pub capabilities: Vec<CapabilityRecord>,
    pub members: Vec<PrincipalProfile>,
}

/// Desired state of a role for create/update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSpec {
    pub name: String,
    pub capability_ids: BTreeSet<CapabilityId>,
}

impl RoleSpec {
    pub fn new(name: impl Into<String>, capability_ids: impl IntoIterator<Item = CapabilityId>) -> Self {
        Self {
            name: name.into(),
            capability_ids: capability_ids.into_iter().collect(),
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        let len = self.name.trim().chars().count();
        if !(MIN_ROLE_NAME_CHARS..=MAX_ROLE_NAME_CHARS).contains(&len) {
            return Err(DomainError::validation(format!(
                "role name must be between {MIN_ROLE_NAME_CHARS} and {MAX_ROLE_NAME_CHARS} characters"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_name_length_is_enforced() {
        assert!(RoleSpec::new("ab", []).validate().is_err());
        assert!(RoleSpec::new("  ab  ", []).validate().is_err());
        assert!(RoleSpec::new("auditor", []).validate().is_ok());
        assert!(RoleSpec::new("r".repeat(101), []).validate().is_err());
    }
}
