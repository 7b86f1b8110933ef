//! HTTP application wiring.
//!
//! - `services.rs`: store, ledger, resolver and refresher wiring
//! - `routes/`: handlers, one file per resource
//! - `dto.rs`: request/response bodies
//! - `errors.rs`: error-to-response mapping

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router.
///
/// `/health` is public; everything else passes the bearer-token middleware.
pub fn build_app(services: Arc<services::AppServices>) -> Router {
    let auth_state = middleware::AuthState {
        services: services.clone(),
    };

    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::custom(errors::panic_to_response)),
        )
}
