//! Principal registration and grant assignment (all `roles:manage`).

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{post, put},
    Json, Router,
};
use serde_json::json;

use keyward_auth::{OpContext, builtin};
use keyward_core::PrincipalId;

use crate::app::dto::{AssignPermissionsRequest, AssignRolesRequest, RegisterPrincipalRequest, parse_id};
use crate::app::{errors, services::AppServices};
use crate::authz::require_capability;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(register_principal))
        .route("/:id/roles", put(assign_roles))
        .route("/:id/permissions", put(assign_permissions))
}

/// POST /users
pub async fn register_principal(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<OpContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(req): Json<RegisterPrincipalRequest>,
) -> Result<Response, Response> {
    require_capability(&services, &ctx, &principal, &builtin::ROLES_MANAGE).await?;

    let profile = services
        .admin
        .register_principal(&ctx, &req.display_name)
        .await
        .map_err(errors::admin_error_to_response)?;

    Ok((StatusCode::CREATED, Json(json!({ "principal": profile }))).into_response())
}

/// PUT /users/:id/roles - replace role memberships
pub async fn assign_roles(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<OpContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(req): Json<AssignRolesRequest>,
) -> Result<Response, Response> {
    require_capability(&services, &ctx, &principal, &builtin::ROLES_MANAGE).await?;
    let target: PrincipalId = parse_id(&id)?;

    services
        .admin
        .assign_roles(&ctx, target, req.role_ids.into_iter().collect())
        .await
        .map_err(errors::admin_error_to_response)?;

    Ok(StatusCode::NO_CONTENT.into_response())
}

/// PUT /users/:id/permissions - replace direct grants
pub async fn assign_permissions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<OpContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(req): Json<AssignPermissionsRequest>,
) -> Result<Response, Response> {
    require_capability(&services, &ctx, &principal, &builtin::ROLES_MANAGE).await?;
    let target: PrincipalId = parse_id(&id)?;

    services
        .admin
        .assign_direct_grants(&ctx, target, req.capability_ids.into_iter().collect())
        .await
        .map_err(errors::admin_error_to_response)?;

    Ok(StatusCode::NO_CONTENT.into_response())
}
