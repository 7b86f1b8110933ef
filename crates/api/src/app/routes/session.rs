//! Self-service token revocation.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use keyward_auth::OpContext;

use crate::app::dto::RevokedResponse;
use crate::app::{errors, services::AppServices};
use crate::context::PrincipalContext;

/// POST /logout - revoke the token that authenticated this request
pub async fn logout(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<OpContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> Result<Response, Response> {
    services
        .ledger()
        .revoke(&ctx, principal.raw_token().expose())
        .await
        .map_err(errors::ledger_error_to_response)?;

    Ok(StatusCode::NO_CONTENT.into_response())
}

/// POST /logout/all - revoke every token of the caller
pub async fn logout_all(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<OpContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> Result<Response, Response> {
    let revoked = services
        .ledger()
        .revoke_all(&ctx, principal.principal_id())
        .await
        .map_err(errors::ledger_error_to_response)?;

    Ok(Json(RevokedResponse { revoked }).into_response())
}
