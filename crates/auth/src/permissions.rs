
use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use keyward_core::{CapabilityId, DomainError};

/// Longest capability name accepted.
pub const MAX_CAPABILITY_CHARS: usize = 100;

/// Capability (named permission) identifier.
///
/// Capabilities are opaque strings (e.g. "roles:manage"), globally unique by
/// name. Matching is exact; there is no wildcard.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(Cow<'static, str>);

impl Capability {
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Validate and wrap a capability name coming from outside.
    pub fn parse(name: impl Into<String>) -> Result<Self, DomainError> {
        let name = name.into();
        if name.is_empty() {
            return Err(DomainError::validation("capability name must not be empty"));
        }
        if name.chars().count() > MAX_CAPABILITY_CHARS {
            return Err(DomainError::validation(format!(
                "capability name must be at most {MAX_CAPABILITY_CHARS} characters"
            )));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(DomainError::validation("capability name must not contain whitespace"));
        }
        Ok(Self(Cow::Owned(name)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Capability {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A persisted capability row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRecord {
    pub id: CapabilityId,
    pub name: Capability,
}

/// Capabilities the service itself gates routes on.
pub mod builtin {
    use super::Capability;

    pub const ROLES_VIEW: Capability = Capability::from_static("roles:view");
    pub const ROLES_MANAGE: Capability = Capability::from_static("roles:manage");
    pub const PERMISSIONS_VIEW: Capability = Capability::from_static("permissions:view");
    pub const TOKENS_MANAGE: Capability = Capability::from_static("tokens:manage");

    pub const ALL: [Capability; 4] = [ROLES_VIEW, ROLES_MANAGE, PERMISSIONS_VIEW, TOKENS_MANAGE];
}
