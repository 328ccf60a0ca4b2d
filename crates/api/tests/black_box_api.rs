//! Black-box API tests: the production router over in-memory stores, driven
//! through a real listener.

use std::str::FromStr;
use std::time::Duration;

use reqwest::StatusCode;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};

use cascade_api::app::{build_app, services::AppServices};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let services = AppServices::in_memory().await.expect("services");
        let app = build_app(services);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn create_account(
    client: &reqwest::Client,
    base_url: &str,
    name: &str,
    kind: &str,
    currency: &str,
) -> String {
    let res = client
        .post(format!("{base_url}/api/v1/accounts"))
        .json(&json!({ "name": name, "type": kind, "currency": currency }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: Value = res.json().await.unwrap();
    body["id"].as_str().unwrap().to_string()
}

async fn balance(client: &reqwest::Client, base_url: &str, account_id: &str) -> Decimal {
    let res = client
        .get(format!("{base_url}/api/v1/accounts/{account_id}/balance"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    Decimal::from_str(body["available_balance"].as_str().unwrap()).unwrap()
}

async fn wait_event_terminal(client: &reqwest::Client, base_url: &str, event_id: &str) -> String {
    for _ in 0..500 {
        let res = client
            .get(format!("{base_url}/api/v1/events/{event_id}/state"))
            .send()
            .await
            .unwrap();
        let body: Value = res.json().await.unwrap();
        let state = body["state"].as_str().unwrap().to_string();
        if matches!(state.as_str(), "COMPLETED" | "ROLLED_BACK") {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("event did not reach a terminal state within timeout");
}

#[tokio::test]
async fn health_reports_version() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    for path in ["/health", "/api/v1/health"] {
        let res = client
            .get(format!("{}{path}", server.base_url))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }
}

#[tokio::test]
async fn unbalanced_raw_entry_is_rejected_and_nothing_persists() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let a = create_account(&client, &server.base_url, "a", "asset", "USD").await;
    let b = create_account(&client, &server.base_url, "b", "asset", "USD").await;

    let res = client
        .post(format!("{}/api/v1/transactions", server.base_url))
        .json(&json!({
            "description": "unbalanced",
            "lines": [
                { "account_id": a, "debit": "100" },
                { "account_id": b, "credit": "90" },
            ],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");

    assert_eq!(balance(&client, &server.base_url, &a).await, dec!(0));
    assert_eq!(balance(&client, &server.base_url, &b).await, dec!(0));
}

#[tokio::test]
async fn balanced_entry_round_trips() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let clearing = create_account(&client, &server.base_url, "clearing", "system", "USD").await;
    let a = create_account(&client, &server.base_url, "a", "asset", "USD").await;

    let res = client
        .post(format!("{}/api/v1/transactions", server.base_url))
        .json(&json!({
            "description": "seed",
            "transaction_type": "deposit",
            "reference_id": "seed-1",
            "lines": [
                { "account_id": clearing, "debit": "100" },
                { "account_id": a, "credit": "100" },
            ],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: Value = res.json().await.unwrap();
    let entry_id = created["id"].as_str().unwrap();

    let res = client
        .get(format!("{}/api/v1/transactions/{entry_id}", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let fetched: Value = res.json().await.unwrap();
    assert_eq!(fetched["lines"].as_array().unwrap().len(), 2);
    assert_eq!(fetched["reference_id"], "seed-1");

    assert_eq!(balance(&client, &server.base_url, &a).await, dec!(100));

    // The entry shows up in a date-ranged listing.
    let res = client
        .get(format!(
            "{}/api/v1/transactions?start_date={}&end_date={}",
            server.base_url,
            "2000-01-01T00:00:00Z",
            "2100-01-01T00:00:00Z",
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let listing: Value = res.json().await.unwrap();
    assert_eq!(listing["total"], 1);
}

#[tokio::test]
async fn missing_and_malformed_ids() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!(
            "{}/api/v1/transactions/00000000-0000-0000-0000-000000000000",
            server.base_url
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(format!("{}/api/v1/transactions/not-a-uuid", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn chained_transfer_event_over_http() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let clearing = create_account(&client, &server.base_url, "clearing", "system", "USD").await;
    let a = create_account(&client, &server.base_url, "a", "asset", "USD").await;
    let b = create_account(&client, &server.base_url, "b", "asset", "USD").await;

    // Seed A with 100.
    let res = client
        .post(format!("{}/api/v1/transactions", server.base_url))
        .json(&json!({
            "description": "seed",
            "lines": [
                { "account_id": clearing, "debit": "100" },
                { "account_id": a, "credit": "100" },
            ],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    // Create the event.
    let res = client
        .post(format!("{}/api/v1/events", server.base_url))
        .json(&json!({ "name": "transfer-event" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let event: Value = res.json().await.unwrap();
    let event_id = event["id"].as_str().unwrap().to_string();
    assert_eq!(event["state"], "CREATED");

    // Append the transfer step.
    let res = client
        .post(format!(
            "{}/api/v1/events/{event_id}/transactions",
            server.base_url
        ))
        .json(&json!({
            "type": "wallet.transfer",
            "order": 1,
            "payload": {
                "source_account_id": a,
                "destination_account_id": b,
                "amount": "40",
                "currency": "USD",
            },
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    // Adding after validation is a conflict.
    let res = client
        .post(format!("{}/api/v1/events/{event_id}/validate", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let res = client
        .post(format!(
            "{}/api/v1/events/{event_id}/transactions",
            server.base_url
        ))
        .json(&json!({ "type": "wallet.transfer", "order": 2, "payload": {} }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = client
        .post(format!("{}/api/v1/events/{event_id}/start", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    let state = wait_event_terminal(&client, &server.base_url, &event_id).await;
    assert_eq!(state, "COMPLETED");

    assert_eq!(balance(&client, &server.base_url, &a).await, dec!(60));
    assert_eq!(balance(&client, &server.base_url, &b).await, dec!(40));

    // The step's result points at the posted entry.
    let res = client
        .get(format!(
            "{}/api/v1/events/{event_id}/transactions",
            server.base_url
        ))
        .send()
        .await
        .unwrap();
    let listing: Value = res.json().await.unwrap();
    let items = listing["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["state"], "COMPLETED");
    assert!(items[0]["result"]["entry_id"].is_string());
}

#[tokio::test]
async fn withdrawal_event_beyond_balance_rolls_back() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let a = create_account(&client, &server.base_url, "a", "asset", "USD").await;

    let res = client
        .post(format!("{}/api/v1/events", server.base_url))
        .json(&json!({ "name": "overdraw" }))
        .send()
        .await
        .unwrap();
    let event: Value = res.json().await.unwrap();
    let event_id = event["id"].as_str().unwrap().to_string();

    client
        .post(format!(
            "{}/api/v1/events/{event_id}/transactions",
            server.base_url
        ))
        .json(&json!({
            "type": "wallet.withdrawal",
            "order": 1,
            "payload": { "account_id": a, "amount": "50", "currency": "USD" },
        }))
        .send()
        .await
        .unwrap();
    client
        .post(format!("{}/api/v1/events/{event_id}/validate", server.base_url))
        .send()
        .await
        .unwrap();
    client
        .post(format!("{}/api/v1/events/{event_id}/start", server.base_url))
        .send()
        .await
        .unwrap();

    let state = wait_event_terminal(&client, &server.base_url, &event_id).await;
    assert_eq!(state, "ROLLED_BACK");
    assert_eq!(balance(&client, &server.base_url, &a).await, dec!(0));

    // No reserving liens linger on the account.
    let res = client
        .get(format!("{}/api/v1/accounts/{a}/liens", server.base_url))
        .send()
        .await
        .unwrap();
    let liens: Value = res.json().await.unwrap();
    for lien in liens["items"].as_array().unwrap() {
        assert_ne!(lien["state"], "PENDING");
        assert_ne!(lien["state"], "ACTIVE");
    }
}
