//! HTTP application wiring (Axum router + service wiring).
//!
//! Layout:
//! - `services.rs`: store construction (postgres or in-memory), executor
//!   registration, system account provisioning
//! - `routes/`: handlers, one file per resource
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Build the full HTTP router (used by `main.rs` and the black-box tests).
pub fn build_app(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/api/v1", routes::api_router())
        .layer(Extension(services))
}
