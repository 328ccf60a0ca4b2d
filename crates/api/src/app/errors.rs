//! Error kind -> HTTP status mapping.
//!
//! Validation -> 400, NotFound -> 404, Conflict -> 409, Insufficient -> 422,
//! infrastructure and engine faults -> 500.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use cascade_core::DomainError;
use cascade_engine::{EngineError, LienError};
use cascade_ledger::{LedgerError, StoreError};

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

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match &err {
        DomainError::Validation(_) | DomainError::InvariantViolation(_) | DomainError::InvalidId(_) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", err.to_string())
        }
        DomainError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
        DomainError::Conflict(_) => json_error(StatusCode::CONFLICT, "conflict", err.to_string()),
        DomainError::InsufficientFunds { .. } => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "insufficient_funds",
            err.to_string(),
        ),
    }
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match &err {
        StoreError::Conflict(_) => json_error(StatusCode::CONFLICT, "conflict", err.to_string()),
        StoreError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
        StoreError::Database(_) | StoreError::Serialization(_) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "dependency_error",
            err.to_string(),
        ),
    }
}

pub fn ledger_error_to_response(err: LedgerError) -> axum::response::Response {
    match err {
        LedgerError::Domain(e) => domain_error_to_response(e),
        LedgerError::Store(e) => store_error_to_response(e),
    }
}

pub fn lien_error_to_response(err: LienError) -> axum::response::Response {
    match err {
        LienError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
        LienError::InsufficientFunds { .. } => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "insufficient_funds",
            err.to_string(),
        ),
        LienError::InvalidState { .. } | LienError::Expired(_) => {
            json_error(StatusCode::CONFLICT, "invalid_lien_state", err.to_string())
        }
        LienError::InvalidInput(_) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", err.to_string())
        }
        LienError::Balance(_) | LienError::Store(_) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "dependency_error",
            err.to_string(),
        ),
    }
}

pub fn engine_error_to_response(err: EngineError) -> axum::response::Response {
    match err {
        EngineError::EventNotFound(_) | EngineError::TransactionNotFound(_) => {
            json_error(StatusCode::NOT_FOUND, "not_found", err.to_string())
        }
        EngineError::InvalidEventState { .. } => {
            json_error(StatusCode::CONFLICT, "invalid_event_state", err.to_string())
        }
        EngineError::NoTransactions(_) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", err.to_string())
        }
        EngineError::Domain(e) => domain_error_to_response(e),
        EngineError::Store(e) => store_error_to_response(e),
        EngineError::ExecutorNotRegistered(_)
        | EngineError::DependencyCycle(_)
        | EngineError::UnknownDependency { .. }
        | EngineError::DependencyFailed { .. }
        | EngineError::TransactionFailed { .. }
        | EngineError::Cancelled(_) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "engine_error",
            err.to_string(),
        ),
    }
}
