use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

use crate::app::errors::json_error;

pub mod accounts;
pub mod events;
pub mod liens;
pub mod system;
pub mod transactions;

/// The `/api/v1` router.
pub fn api_router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .merge(accounts::router())
        .merge(transactions::router())
        .merge(events::router())
        .merge(liens::router())
}

/// Parse a path segment into a typed id; failures are 400s.
pub(crate) fn parse_id<T>(raw: &str) -> Result<T, axum::response::Response>
where
    T: std::str::FromStr<Err = cascade_core::DomainError>,
{
    raw.parse::<T>()
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()))
}
