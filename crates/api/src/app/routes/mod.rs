use axum::{
    routing::{get, post},
    Router,
};

pub mod permissions;
pub mod roles;
pub mod session;
pub mod system;
pub mod tokens;
pub mod users;

/// Router for every authenticated endpoint.
pub fn router() -> Router {
    Router::new()
        .route("/me", get(system::me))
        .route("/logout", post(session::logout))
        .route("/logout/all", post(session::logout_all))
        .nest("/roles", roles::router())
        .nest("/users", users::router())
        .nest("/permissions", permissions::router())
        .nest("/admin/tokens", tokens::router())
}
