use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use cascade_core::AccountId;
use cascade_ledger::{Account, AccountKind};

use crate::app::errors::{self, json_error};
use crate::app::services::AppServices;
use crate::app::{dto, routes::parse_id};

pub fn router() -> Router {
    Router::new()
        .route("/accounts", get(list_accounts).post(create_account))
        .route(
            "/accounts/:id",
            get(get_account).put(update_account).delete(delete_account),
        )
        .route("/accounts/:id/balance", get(get_balance))
        .route("/accounts/:id/liens", get(list_account_liens))
}

async fn create_account(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateAccountRequest>,
) -> axum::response::Response {
    let kind: AccountKind = match body.kind.parse() {
        Ok(kind) => kind,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let account = Account::new(
        AccountId::new(),
        body.name,
        kind,
        body.user_id,
        body.currency,
    );
    match services.ledger.create_account(account).await {
        Ok(account) => (StatusCode::CREATED, Json(dto::account_to_json(&account))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

async fn get_account(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: AccountId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.ledger.get_account(id).await {
        Ok(Some(account)) => (StatusCode::OK, Json(dto::account_to_json(&account))).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "not_found", "account not found"),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

async fn list_accounts(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ListAccountsQuery>,
) -> axum::response::Response {
    match services.ledger.list_accounts_by_owner(query.user_id).await {
        Ok(accounts) => {
            let items: Vec<_> = accounts.iter().map(dto::account_to_json).collect();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(e) => errors::ledger_error_to_response(e),
    }
}

async fn update_account(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateAccountRequest>,
) -> axum::response::Response {
    let id: AccountId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.ledger.update_account_name(id, body.name).await {
        Ok(account) => (StatusCode::OK, Json(dto::account_to_json(&account))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

async fn delete_account(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: AccountId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.ledger.delete_account(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

async fn get_balance(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: AccountId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.ledger.available_balance(id).await {
        Ok(balance) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "account_id": id,
                "available_balance": balance,
            })),
        )
            .into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

async fn list_account_liens(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: AccountId = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.liens.list_liens_by_account(id).await {
        Ok(liens) => {
            let items: Vec<_> = liens.iter().map(dto::lien_to_json).collect();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(e) => errors::lien_error_to_response(e),
    }
}
