//! Input validation errors shared by ids, names and labels.

use thiserror::Error;

/// A caller-supplied value was rejected before touching storage.
///
/// Missing rows and uniqueness conflicts are reported by the store
/// contracts in `keyward-auth`, not here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier did not parse.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    /// Message without the variant prefix, for client-facing bodies.
    pub fn detail(&self) -> &str {
        match self {
            Self::Validation(msg) | Self::InvalidId(msg) => msg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_strips_the_prefix() {
        let err = DomainError::validation("role name too short");
        assert_eq!(err.to_string(), "validation failed: role name too short");
        assert_eq!(err.detail(), "role name too short");
    }
}
