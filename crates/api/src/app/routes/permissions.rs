//! Capability catalogue and per-principal effective capabilities.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;

use keyward_auth::{OpContext, builtin};
use keyward_core::PrincipalId;

use crate::app::dto::{EffectiveCapabilitiesResponse, parse_id};
use crate::app::{errors, services::AppServices};
use crate::authz::require_capability;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_capabilities))
        .route("/user/:id", get(effective_for_principal))
}

/// GET /permissions
pub async fn list_capabilities(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<OpContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> Result<Response, Response> {
    require_capability(&services, &ctx, &principal, &builtin::PERMISSIONS_VIEW).await?;

    let capabilities = services
        .admin
        .list_capabilities(&ctx)
        .await
        .map_err(errors::admin_error_to_response)?;

    Ok(Json(json!({ "permissions": capabilities })).into_response())
}

/// GET /permissions/user/:id - union of direct and role-derived grants
pub async fn effective_for_principal(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<OpContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    require_capability(&services, &ctx, &principal, &builtin::PERMISSIONS_VIEW).await?;
    let target: PrincipalId = parse_id(&id)?;

    // 404 rather than an empty list for principals that do not exist.
    services
        .admin
        .get_principal(&ctx, target)
        .await
        .map_err(errors::admin_error_to_response)?;

    let capabilities = services
        .resolver()
        .list_effective_capability_names(&ctx, target)
        .await
        .map_err(errors::resolve_error_to_response)?;

    Ok(Json(EffectiveCapabilitiesResponse {
        principal_id: target,
        capabilities: capabilities.into_iter().collect(),
    })
    .into_response())
}
