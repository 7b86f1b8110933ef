use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};

use crate::app::{errors, services::AppServices};
use crate::context::PrincipalContext;

#[derive(Clone)]
pub struct AuthState {
    pub services: Arc<AppServices>,
}

/// Authenticate the bearer token and bind the principal to the request.
///
/// Inserts the request's [`keyward_auth::OpContext`] and a
/// [`PrincipalContext`] as extensions. Capability checks happen per route.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let ctx = state.services.request_context();

    let auth = state
        .services
        .gate
        .authenticate(&ctx, authorization_header(req.headers()))
        .await
        .map_err(errors::denial_to_response)?;

    req.extensions_mut().insert(ctx);
    req.extensions_mut().insert(PrincipalContext::new(auth));

    Ok(next.run(req).await)
}

/// Non-UTF-8 values are treated as absent.
fn authorization_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok())
}
