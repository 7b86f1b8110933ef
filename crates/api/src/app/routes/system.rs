use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use keyward_auth::{AdminError, OpContext, PrincipalProfile};
use keyward_core::PrincipalId;

use crate::app::dto::MeResponse;
use crate::app::{errors, services::AppServices};
use crate::context::PrincipalContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /me - the caller's identity and effective capabilities
pub async fn me(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<OpContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> Result<Response, Response> {
    let capabilities = services
        .resolver()
        .list_effective_capability_names(&ctx, principal.principal_id())
        .await
        .map_err(errors::resolve_error_to_response)?;

    let display_name = display_name_or_warn(
        principal.principal_id(),
        services
            .admin
            .get_principal(&ctx, principal.principal_id())
            .await,
    );

    Ok(Json(MeResponse {
        principal_id: principal.principal_id(),
        display_name,
        token_id: principal.token_id(),
        capabilities: capabilities.into_iter().collect(),
    })
    .into_response())
}

/// Best effort: a failed profile lookup leaves the name out, with a warning.
fn display_name_or_warn(
    id: PrincipalId,
    lookup: Result<PrincipalProfile, AdminError>,
) -> Option<String> {
    match lookup {
        Ok(profile) => Some(profile.display_name),
        Err(err) => {
            tracing::warn!(principal_id = %id, error = %err, "profile lookup failed; omitting display name");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyward_auth::StoreError;

    #[test]
    fn profile_lookup_failure_drops_only_the_name() {
        let id = PrincipalId::new();
        let profile = PrincipalProfile::new(id, "root").unwrap();
        assert_eq!(display_name_or_warn(id, Ok(profile)), Some("root".to_string()));

        let fault = AdminError::Storage(StoreError::Unavailable("pool closed".into()));
        assert_eq!(display_name_or_warn(id, Err(fault)), None);
        assert_eq!(display_name_or_warn(id, Err(AdminError::NotFound)), None);
    }
}
