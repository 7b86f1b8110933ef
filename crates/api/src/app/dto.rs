use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keyward_core::{CapabilityId, DomainError, PrincipalId, RoleId, TokenId};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterPrincipalRequest {
    pub display_name: String,
}

/// Body for both role creation and role update.
#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    pub name: String,
    #[serde(default)]
    pub capability_ids: Vec<CapabilityId>,
}

#[derive(Debug, Deserialize)]
pub struct AssignRolesRequest {
    pub role_ids: Vec<RoleId>,
}

#[derive(Debug, Deserialize)]
pub struct AssignPermissionsRequest {
    pub capability_ids: Vec<CapabilityId>,
}

#[derive(Debug, Deserialize)]
pub struct IssueTokenRequest {
    pub principal_id: PrincipalId,
    pub label: Option<String>,
}

// -------------------------
// Response DTOs
// -------------------------

/// Returned exactly once, at issuance. The raw token cannot be fetched again.
#[derive(Debug, Serialize)]
pub struct IssuedTokenResponse {
    pub token_id: TokenId,
    pub token: String,
    pub token_type: &'static str,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub principal_id: PrincipalId,
    pub display_name: Option<String>,
    pub token_id: TokenId,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct EffectiveCapabilitiesResponse {
    pub principal_id: PrincipalId,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RevokedResponse {
    pub revoked: u64,
}

// -------------------------
// Mapping helpers
// -------------------------

/// Parse a path segment into a typed id, or a 400 response.
pub fn parse_id<T>(raw: &str) -> Result<T, axum::response::Response>
where
    T: FromStr<Err = DomainError>,
{
    T::from_str(raw).map_err(|e| {
        errors::json_error(axum::http::StatusCode::BAD_REQUEST, "invalid_id", e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_id_rejects_garbage() {
        assert!(parse_id::<RoleId>("not-a-uuid").is_err());

        let id = RoleId::new();
        assert_eq!(parse_id::<RoleId>(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn role_request_defaults_to_no_capabilities() {
        let req: RoleRequest = serde_json::from_str(r#"{"name":"auditor"}"#).unwrap();
        assert!(req.capability_ids.is_empty());
    }
}
