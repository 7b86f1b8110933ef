//! Route-level capability guard.
//!
//! Called at the top of every capability-gated handler, after the auth
//! middleware has bound a [`PrincipalContext`].

use axum::response::Response;

use keyward_auth::{Capability, OpContext};

use crate::app::{errors, services::AppServices};
use crate::context::PrincipalContext;

/// Deny with 403 unless the principal holds `capability`.
pub async fn require_capability(
    services: &AppServices,
    ctx: &OpContext,
    principal: &PrincipalContext,
    capability: &Capability,
) -> Result<(), Response> {
    services
        .gate
        .authorize(ctx, principal.auth(), capability)
        .await
        .map_err(errors::denial_to_response)
}
