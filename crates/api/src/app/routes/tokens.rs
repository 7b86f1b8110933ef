//! Administrative token issuance and bulk revocation (`tokens:manage`).

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode, header::USER_AGENT},
    response::{IntoResponse, Response},
    routing::{delete, post},
    Json, Router,
};

use keyward_auth::{OpContext, builtin};
use keyward_core::PrincipalId;

use crate::app::dto::{IssueTokenRequest, IssuedTokenResponse, RevokedResponse, parse_id};
use crate::app::{errors, services::AppServices};
use crate::authz::require_capability;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(issue_token))
        .route("/principal/:id", delete(revoke_principal_tokens))
}

/// POST /admin/tokens
///
/// The label defaults to the caller's `User-Agent`. The raw token appears in
/// this response only.
pub async fn issue_token(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<OpContext>,
    Extension(principal): Extension<PrincipalContext>,
    headers: HeaderMap,
    Json(req): Json<IssueTokenRequest>,
) -> Result<Response, Response> {
    require_capability(&services, &ctx, &principal, &builtin::TOKENS_MANAGE).await?;

    services
        .admin
        .get_principal(&ctx, req.principal_id)
        .await
        .map_err(errors::admin_error_to_response)?;

    let label = token_label(req.label.as_deref(), &headers);
    let issued = services
        .ledger()
        .issue(&ctx, req.principal_id, label)
        .await
        .map_err(errors::ledger_error_to_response)?;

    Ok((
        StatusCode::CREATED,
        Json(IssuedTokenResponse {
            token_id: issued.token_id,
            token: issued.raw.expose().to_string(),
            token_type: "Bearer",
            expires_at: issued.expires_at,
        }),
    )
        .into_response())
}

/// DELETE /admin/tokens/principal/:id
pub async fn revoke_principal_tokens(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<OpContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    require_capability(&services, &ctx, &principal, &builtin::TOKENS_MANAGE).await?;
    let target: PrincipalId = parse_id(&id)?;

    let revoked = services
        .ledger()
        .revoke_all(&ctx, target)
        .await
        .map_err(errors::ledger_error_to_response)?;

    Ok(Json(RevokedResponse { revoked }).into_response())
}

/// Explicit label first, then `User-Agent`. Blank values fall through to the
/// ledger's fallback label.
fn token_label<'a>(explicit: Option<&'a str>, headers: &'a HeaderMap) -> &'a str {
    explicit
        .filter(|l| !l.trim().is_empty())
        .or_else(|| headers.get(USER_AGENT).and_then(|v| v.to_str().ok()))
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn label_prefers_body_then_user_agent() {
        let mut headers = HeaderMap::new();
        assert_eq!(token_label(None, &headers), "");

        headers.insert(USER_AGENT, HeaderValue::from_static("curl/8.5"));
        assert_eq!(token_label(None, &headers), "curl/8.5");
        assert_eq!(token_label(Some("  "), &headers), "curl/8.5");
        assert_eq!(token_label(Some("ci"), &headers), "ci");
    }
}
