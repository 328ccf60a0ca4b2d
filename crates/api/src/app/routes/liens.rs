use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use cascade_core::LienId;

use crate::app::errors;
use crate::app::services::AppServices;
use crate::app::{dto, routes::parse_id};

pub fn router() -> Router {
    Router::new().route("/liens/:id", get(get_lien))
}

async fn get_lien(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: LienId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.liens.get_lien(id).await {
        Ok(lien) => (StatusCode::OK, Json(dto::lien_to_json(&lien))).into_response(),
        Err(e) => errors::lien_error_to_response(e),
    }
}
