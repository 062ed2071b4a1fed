//! HTTP surface driven in-process through the router

use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tower::ServiceExt;

use payflow_ledger::gateway::middleware::RESPONSE_TIME_HEADER;
use payflow_ledger::gateway::{AppState, create_app, types::error_codes};
use payflow_ledger::ledger::cache::CacheError;
use payflow_ledger::ledger::{
    AccountId, BalanceCache, IdempotencyRegistry, MemoryLedgerStore, TransferEngine,
    TtlBalanceCache,
};

fn app() -> (Arc<MemoryLedgerStore>, axum::Router) {
    let store = Arc::new(
        MemoryLedgerStore::new().with_accounts([(1, Decimal::from(100)), (2, Decimal::from(50))]),
    );
    let registry = IdempotencyRegistry::with_default_ttl(store.clone());
    let engine = Arc::new(TransferEngine::new(
        store.clone(),
        registry,
        Arc::new(TtlBalanceCache::default()),
    ));
    (store, create_app(Arc::new(AppState::new(engine))))
}

async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn post_transfer(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/transfer")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_transfer_replay_and_lookup() {
    let (store, app) = app();
    let body = json!({
        "sender_id": 1,
        "receiver_id": 2,
        "amount": "30.00",
        "description": "dinner",
        "idempotency_key": "http-k1"
    });

    let (status, first) = send(&app, post_transfer(body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["code"], 0);
    assert_eq!(first["data"]["status"], "completed");
    assert_eq!(first["data"]["replayed"], false);
    assert_eq!(first["data"]["sender_balance"], "70.00");

    let (status, second) = send(&app, post_transfer(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["data"]["replayed"], true);
    assert_eq!(second["data"]["transaction_id"], first["data"]["transaction_id"]);
    assert!(second["data"].get("sender_balance").is_none());
    assert_eq!(store.balance(1).await, Some(Decimal::from(70)));

    let id = first["data"]["transaction_id"].as_str().unwrap();
    let (status, txn) = send(&app, get(&format!("/transaction/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(txn["data"]["id"], id);
    assert_eq!(txn["data"]["description"], "dinner");
    assert_eq!(txn["data"]["idempotency_key"], "http-k1");
}

#[tokio::test]
async fn test_transfer_errors_map_to_status() {
    let (_store, app) = app();

    let (status, body) = send(
        &app,
        post_transfer(json!({"sender_id": 1, "receiver_id": 2, "amount": "500", "idempotency_key": "big"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], error_codes::INSUFFICIENT_BALANCE);

    let (status, body) = send(
        &app,
        post_transfer(json!({"sender_id": 1, "receiver_id": 9, "amount": "5", "idempotency_key": "ghost"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], error_codes::ACCOUNT_NOT_FOUND);

    let (status, body) = send(
        &app,
        post_transfer(json!({"sender_id": 1, "receiver_id": 1, "amount": "5", "idempotency_key": "self"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], error_codes::INVALID_PARAMETER);

    let (status, body) = send(
        &app,
        post_transfer(json!({"sender_id": 1, "receiver_id": 2, "amount": "-5", "idempotency_key": "neg"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], error_codes::INVALID_PARAMETER);

    // Missing idempotency_key
    let (status, body) = send(
        &app,
        post_transfer(json!({"sender_id": 1, "receiver_id": 2, "amount": "5"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], error_codes::INVALID_PARAMETER);
}

#[tokio::test]
async fn test_unknown_transaction_is_404() {
    let (_store, app) = app();

    let (status, body) = send(&app, get("/transaction/not-a-uuid")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], error_codes::TRANSACTION_NOT_FOUND);

    let (status, _) = send(
        &app,
        get("/transaction/6f1c1b9e-8a39-4d5e-9d6b-2f0f5a3c1e11"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_balance_and_health() {
    let (_store, app) = app();

    let (status, body) = send(&app, get("/accounts/2/balance")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["balance"], "50");
    assert_eq!(body["data"]["cached"], false);

    let (status, _) = send(&app, get("/accounts/42/balance")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "healthy");
    assert_eq!(body["data"]["storage"], "memory");
    assert_eq!(body["data"]["cache"], "ttl");
    assert_eq!(body["data"]["cache_status"], "ok");
}

/// Cache backend that is down for every call
struct DownCache;

#[async_trait]
impl BalanceCache for DownCache {
    fn name(&self) -> &'static str {
        "down"
    }

    async fn get(&self, _account_id: AccountId) -> Result<Option<Decimal>, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn put(&self, _account_id: AccountId, _balance: Decimal) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn invalidate(&self, _account_id: AccountId) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
}

#[tokio::test]
async fn test_health_reports_degraded_cache_without_failing() {
    let store = Arc::new(MemoryLedgerStore::new().with_accounts([(1, Decimal::from(10))]));
    let engine = Arc::new(TransferEngine::new(
        store.clone(),
        IdempotencyRegistry::with_default_ttl(store),
        Arc::new(DownCache),
    ));
    let app = create_app(Arc::new(AppState::new(engine)));

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "healthy");
    assert_eq!(body["data"]["cache"], "down");
    assert_eq!(body["data"]["cache_status"], "unavailable");

    // Balance reads fall back to the store
    let (status, body) = send(&app, get("/accounts/1/balance")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["balance"], "10");
}

#[tokio::test]
async fn test_transaction_history_route() {
    let (_store, app) = app();
    for (i, (from, to)) in [(1, 2), (2, 1), (1, 2)].into_iter().enumerate() {
        let (status, _) = send(
            &app,
            post_transfer(json!({
                "sender_id": from,
                "receiver_id": to,
                "amount": "1.00",
                "idempotency_key": format!("hist-{}", i)
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(&app, get("/accounts/1/transactions")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 3);
    assert_eq!(body["data"]["direction"], "all");
    assert_eq!(body["data"]["transactions"][0]["idempotency_key"], "hist-2");

    let (status, body) = send(
        &app,
        get("/accounts/1/transactions?direction=received&limit=5"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["limit"], 5);
    assert_eq!(body["data"]["transactions"][0]["sender_id"], 2);

    let (status, body) = send(&app, get("/accounts/1/transactions?direction=up")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], error_codes::INVALID_PARAMETER);

    let (status, body) = send(&app, get("/accounts/1/transactions?limit=1000")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], error_codes::INVALID_PARAMETER);

    let (status, body) = send(&app, get("/accounts/1/transactions?limit=abc")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], error_codes::INVALID_PARAMETER);

    let (status, body) = send(&app, get("/accounts/77/transactions")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], error_codes::ACCOUNT_NOT_FOUND);
}

/// Shared buffer the JSON log layer writes into
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CapturedLogs {
    fn events(&self) -> Vec<Value> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

#[tokio::test]
async fn test_every_request_is_logged_with_status_and_latency() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_max_level(tracing::Level::INFO)
        .with_writer(move || writer.clone())
        .finish();
    // Current-thread runtime: the thread-local default sees every event
    let _guard = tracing::subscriber::set_default(subscriber);

    let (_store, app) = app();
    let mut req = post_transfer(json!({
        "sender_id": 1, "receiver_id": 2, "amount": "5", "idempotency_key": "logged"
    }));
    req.headers_mut()
        .insert("x-forwarded-for", "203.0.113.9, 10.0.0.2".parse().unwrap());
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let latency: f64 = response
        .headers()
        .get(RESPONSE_TIME_HEADER)
        .expect("latency header")
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(latency >= 0.0);

    let response = app.clone().oneshot(get("/accounts/404/balance")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.headers().contains_key(RESPONSE_TIME_HEADER));

    let requests: Vec<Value> = logs
        .events()
        .into_iter()
        .filter(|e| e["fields"]["message"] == "HTTP request")
        .map(|e| e["fields"].clone())
        .collect();
    assert_eq!(requests.len(), 2);

    assert_eq!(requests[0]["method"], "POST");
    assert_eq!(requests[0]["path"], "/transfer");
    assert_eq!(requests[0]["status"], 200);
    assert_eq!(requests[0]["client_ip"], "203.0.113.9");
    assert!(requests[0]["latency_ms"].as_f64().is_some());

    assert_eq!(requests[1]["method"], "GET");
    assert_eq!(requests[1]["path"], "/accounts/404/balance");
    assert_eq!(requests[1]["status"], 404);
    assert_eq!(requests[1]["client_ip"], "unknown");
}
