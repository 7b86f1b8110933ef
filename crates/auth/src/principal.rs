
use serde::{Deserialize, Serialize};

use keyward_core::{DomainError, PrincipalId};

/// Minimal principal row owned by the credential store.
///
/// The full user model (email, password) lives outside this system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalProfile {
    pub id: PrincipalId,
    pub display_name: String,
}

impl PrincipalProfile {
    pub fn new(id: PrincipalId, display_name: impl Into<String>) -> Result<Self, DomainError> {
        let display_name = display_name.into().trim().to_string();
        if display_name.is_empty() || display_name.chars().count() > 100 {
            return Err(DomainError::validation(
                "display name must be between 1 and 100 characters",
            ));
        }
        Ok(Self { id, display_name })
    }
}
