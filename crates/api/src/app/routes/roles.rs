//! Role administration.
//!
//! Reads need `roles:view`; writes need `roles:manage`.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;

use keyward_auth::{OpContext, RoleSpec, builtin};
use keyward_core::RoleId;

use crate::app::dto::{RoleRequest, parse_id};
use crate::app::{errors, services::AppServices};
use crate::authz::require_capability;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_roles).post(create_role))
        .route("/:id", get(get_role).put(update_role).delete(delete_role))
}

/// GET /roles
pub async fn list_roles(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<OpContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> Result<Response, Response> {
    require_capability(&services, &ctx, &principal, &builtin::ROLES_VIEW).await?;

    let roles = services
        .admin
        .list_roles(&ctx)
        .await
        .map_err(errors::admin_error_to_response)?;

    Ok(Json(json!({ "roles": roles })).into_response())
}

/// GET /roles/:id - role with its capabilities and members
pub async fn get_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<OpContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    require_capability(&services, &ctx, &principal, &builtin::ROLES_VIEW).await?;
    let id: RoleId = parse_id(&id)?;

    let role = services
        .admin
        .get_role(&ctx, id)
        .await
        .map_err(errors::admin_error_to_response)?;

    Ok(Json(json!({ "role": role })).into_response())
}

/// POST /roles
pub async fn create_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<OpContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(req): Json<RoleRequest>,
) -> Result<Response, Response> {
    require_capability(&services, &ctx, &principal, &builtin::ROLES_MANAGE).await?;

    let role = services
        .admin
        .create_role(&ctx, RoleSpec::new(req.name, req.capability_ids))
        .await
        .map_err(errors::admin_error_to_response)?;

    Ok((StatusCode::CREATED, Json(json!({ "role": role }))).into_response())
}

/// PUT /roles/:id - rename and replace the capability set
pub async fn update_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<OpContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(req): Json<RoleRequest>,
) -> Result<Response, Response> {
    require_capability(&services, &ctx, &principal, &builtin::ROLES_MANAGE).await?;
    let id: RoleId = parse_id(&id)?;

    let role = services
        .admin
        .update_role(&ctx, id, RoleSpec::new(req.name, req.capability_ids))
        .await
        .map_err(errors::admin_error_to_response)?;

    Ok(Json(json!({ "role": role })).into_response())
}

/// DELETE /roles/:id
pub async fn delete_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<OpContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    require_capability(&services, &ctx, &principal, &builtin::ROLES_MANAGE).await?;
    let id: RoleId = parse_id(&id)?;

    services
        .admin
        .delete_role(&ctx, id)
        .await
        .map_err(errors::admin_error_to_response)?;

    Ok(StatusCode::NO_CONTENT.into_response())
}
