use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use cascade_core::EventId;
use cascade_engine::TransactionSpec;

use crate::app::errors;
use crate::app::services::AppServices;
use crate::app::{dto, routes::parse_id};

pub fn router() -> Router {
    Router::new()
        .route("/events", post(create_event))
        .route("/events/:id", get(get_event).delete(delete_event))
        .route(
            "/events/:id/transactions",
            get(list_transactions).post(add_transaction),
        )
        .route("/events/:id/validate", post(validate_event))
        .route("/events/:id/start", post(start_event))
        .route("/events/:id/compensate", post(compensate_event))
        .route("/events/:id/cancel", post(cancel_event))
        .route("/events/:id/state", get(get_state))
        .route("/events/:id/liens", get(list_event_liens))
}

async fn create_event(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateEventRequest>,
) -> axum::response::Response {
    let timeout = body.timeout_secs.map(Duration::from_secs);
    let metadata = body.metadata.unwrap_or_else(|| json!({}));
    match services
        .coordinator
        .create_event(&body.name, body.description, timeout, metadata)
        .await
    {
        Ok(event) => (StatusCode::CREATED, Json(dto::event_to_json(&event))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

async fn get_event(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: EventId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.coordinator.get_event(id).await {
        Ok(event) => (StatusCode::OK, Json(dto::event_to_json(&event))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

async fn delete_event(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: EventId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.coordinator.delete_event(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

async fn add_transaction(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::AddTransactionRequest>,
) -> axum::response::Response {
    let id: EventId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let spec = TransactionSpec {
        name: body.name.unwrap_or_else(|| body.kind.clone()),
        kind: body.kind,
        order: body.order,
        dependencies: body.dependencies,
        payload: body.payload,
    };
    match services.coordinator.add_transaction(id, spec).await {
        Ok(tx) => (StatusCode::CREATED, Json(dto::transaction_to_json(&tx))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

async fn list_transactions(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: EventId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.coordinator.list_event_transactions(id).await {
        Ok(txs) => {
            let items: Vec<_> = txs.iter().map(dto::transaction_to_json).collect();
            (StatusCode::OK, Json(json!({ "items": items }))).into_response()
        }
        Err(e) => errors::engine_error_to_response(e),
    }
}

async fn validate_event(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: EventId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.coordinator.validate_event(id).await {
        Ok(event) => (StatusCode::OK, Json(dto::event_to_json(&event))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

async fn start_event(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: EventId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.coordinator.start_event(id).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({ "event_id": id }))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

async fn compensate_event(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: EventId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.coordinator.compensate_event(id).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "event_id": id }))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

async fn cancel_event(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: EventId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.coordinator.cancel_event(id).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({ "event_id": id }))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

async fn get_state(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: EventId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.coordinator.get_event_state(id).await {
        Ok(state) => (
            StatusCode::OK,
            Json(json!({ "event_id": id, "state": state.as_str() })),
        )
            .into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

async fn list_event_liens(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: EventId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.liens.list_liens_by_event(id).await {
        Ok(liens) => {
            let items: Vec<_> = liens.iter().map(dto::lien_to_json).collect();
            (StatusCode::OK, Json(json!({ "items": items }))).into_response()
        }
        Err(e) => errors::lien_error_to_response(e),
    }
}
