use axum::http::{HeaderValue, StatusCode, header::WWW_AUTHENTICATE};
use axum::response::IntoResponse;
use serde_json::json;

use keyward_auth::{AdminError, DenialReason, LedgerError, ResolveError};

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// 401 for authentication failures, 403 for authorization failures.
///
/// The body never says which grant tier was missing or whether a token
/// expired or never existed.
pub fn denial_to_response(reason: DenialReason) -> axum::response::Response {
    if reason.is_authentication_failure() {
        let mut res = json_error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "missing, invalid or expired credential",
        );
        res.headers_mut()
            .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        res
    } else {
        json_error(StatusCode::FORBIDDEN, "forbidden", "insufficient permissions")
    }
}

pub fn admin_error_to_response(err: AdminError) -> axum::response::Response {
    match err {
        AdminError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        AdminError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        AdminError::Conflict(_) => json_error(StatusCode::CONFLICT, "conflict", "already exists"),
        AdminError::UnknownReference(what) => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "unknown_reference",
            format!("referenced row does not exist: {what}"),
        ),
        AdminError::Storage(e) => {
            tracing::error!(error = %e, "grant store failure");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "storage_failure", "storage unavailable")
        }
        AdminError::Cancelled(_) => deadline_exceeded(),
    }
}

pub fn ledger_error_to_response(err: LedgerError) -> axum::response::Response {
    match err {
        LedgerError::InvalidCredential(_) => {
            denial_to_response(DenialReason::InvalidOrExpiredCredential)
        }
        LedgerError::StorageFailure(e) => {
            tracing::error!(error = %e, "token store failure");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "storage_failure", "storage unavailable")
        }
        LedgerError::Crypto(msg) => {
            tracing::error!(error = %msg, "token generation failed");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "token_generation_failed",
                "could not generate a token",
            )
        }
        LedgerError::ExpiryOutOfRange => {
            tracing::error!("configured token ttl overflows the expiry timestamp");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "token_expiry_out_of_range",
                "could not compute a token expiry",
            )
        }
        LedgerError::Cancelled(_) => deadline_exceeded(),
    }
}

pub fn resolve_error_to_response(err: ResolveError) -> axum::response::Response {
    match err {
        ResolveError::Storage(e) => {
            tracing::error!(error = %e, "grant lookup failure");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "storage_failure", "storage unavailable")
        }
        ResolveError::Cancelled(_) => deadline_exceeded(),
    }
}

/// Handler panics become a JSON 500 instead of a dropped connection.
pub fn panic_to_response(err: Box<dyn std::any::Any + Send + 'static>) -> axum::response::Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic payload"
    };
    tracing::error!(panic = %detail, "handler panicked");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal server error")
}

fn deadline_exceeded() -> axum::response::Response {
    json_error(StatusCode::GATEWAY_TIMEOUT, "deadline_exceeded", "request deadline exceeded")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_are_401_with_challenge() {
        for reason in [DenialReason::MissingCredential, DenialReason::InvalidOrExpiredCredential] {
            let res = denial_to_response(reason);
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(res.headers()[WWW_AUTHENTICATE], "Bearer");
        }
    }

    #[test]
    fn authz_failures_share_one_status() {
        for reason in [DenialReason::InsufficientCapability, DenialReason::ResolutionFailure] {
            assert_eq!(denial_to_response(reason).status(), StatusCode::FORBIDDEN);
        }
    }

    #[test]
    fn admin_errors_map_to_statuses() {
        assert_eq!(
            admin_error_to_response(AdminError::Conflict("roles_name_key".into())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            admin_error_to_response(AdminError::Validation("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            admin_error_to_response(AdminError::NotFound).status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn expiry_overflow_is_a_server_error() {
        let res = ledger_error_to_response(LedgerError::ExpiryOutOfRange);
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
