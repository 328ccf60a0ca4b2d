use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use rust_decimal::Decimal;

use cascade_core::{EntryId, LineId};
use cascade_ledger::{Entry, EntryLine};

use crate::app::errors::{self, json_error};
use crate::app::services::AppServices;
use crate::app::{dto, routes::parse_id};

pub fn router() -> Router {
    Router::new()
        .route("/transactions", get(list_entries).post(post_entry))
        .route("/transactions/:id", get(get_entry))
}

/// Post a raw ledger entry. Unbalanced debits/credits are rejected before
/// anything is persisted.
async fn post_entry(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::PostEntryRequest>,
) -> axum::response::Response {
    if body.lines.is_empty() {
        return json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "entry must have lines",
        );
    }

    let entry_id = EntryId::new();
    let now = Utc::now();
    let lines: Vec<EntryLine> = body
        .lines
        .into_iter()
        .map(|line| EntryLine {
            id: LineId::new(),
            entry_id,
            account_id: line.account_id,
            debit: line.debit.unwrap_or(Decimal::ZERO),
            credit: line.credit.unwrap_or(Decimal::ZERO),
            created_at: now,
        })
        .collect();

    let entry = Entry::new(
        entry_id,
        body.description,
        body.transaction_type
            .unwrap_or_else(|| "manual".to_string()),
        body.reference_id,
        None,
        lines,
    );

    match services.ledger.post_entry(entry).await {
        Ok(entry) => (StatusCode::CREATED, Json(dto::entry_to_json(&entry))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

async fn get_entry(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: EntryId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.ledger.get_entry(id).await {
        Ok(Some(entry)) => (StatusCode::OK, Json(dto::entry_to_json(&entry))).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "not_found", "entry not found"),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

async fn list_entries(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ListEntriesQuery>,
) -> axum::response::Response {
    match services
        .ledger
        .list_entries_by_date(query.start_date, query.end_date, query.page, query.page_size)
        .await
    {
        Ok(page) => {
            let items: Vec<_> = page.entries.iter().map(dto::entry_to_json).collect();
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "items": items,
                    "total": page.total,
                    "page": page.page,
                    "page_size": page.page_size,
                })),
            )
                .into_response()
        }
        Err(e) => errors::ledger_error_to_response(e),
    }
}
