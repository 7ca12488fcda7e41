/// HTTP boundary tests: routing, actor headers, capability checks and error bodies
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::Router;
use quote_to_cash::config::{Config, StoreBackend};
use quote_to_cash::handlers::{self, AppState, ACTOR_ID_HEADER, ACTOR_ROLE_HEADER};
use quote_to_cash::memory_store::MemoryStore;
use quote_to_cash::notifications::LogDispatcher;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

fn test_config() -> Config {
    Config {
        store_backend: StoreBackend::Memory,
        database_url: None,
        port: 0,
        run_migrations: false,
        notify_webhook_url: None,
        notify_webhook_token: None,
        phone_default_region: "US".to_string(),
        portal_min_password_length: 8,
    }
}

fn app() -> Router {
    let state = AppState::new(
        Arc::new(MemoryStore::new()),
        test_config(),
        Arc::new(LogDispatcher),
    )
    .unwrap();

    Router::new()
        .route("/health", get(handlers::health))
        .merge(handlers::api_routes())
        .with_state(Arc::new(state))
}

fn request(method: &str, uri: &str, role: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(role) = role {
        builder = builder
            .header(ACTOR_ID_HEADER, Uuid::new_v4().to_string())
            .header(ACTOR_ROLE_HEADER, role);
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn lead_body() -> Value {
    json!({
        "first_name": "Dana",
        "last_name": "Reyes",
        "email": "dana@example.com",
        "phone": "650-253-0000"
    })
}

#[tokio::test]
async fn test_health_needs_no_actor() {
    let app = app();
    let (status, body) = send(&app, request("GET", "/health", None, None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_missing_actor_headers_are_unauthorized() {
    let app = app();
    let (status, body) = send(&app, request("GET", "/api/v1/leads", None, None)).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn test_unknown_role_is_unauthorized() {
    let app = app();
    let (status, _) = send(&app, request("GET", "/api/v1/leads", Some("intern"), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_viewer_cannot_create_leads() {
    let app = app();
    let (status, body) = send(
        &app,
        request("POST", "/api/v1/leads", Some("viewer"), Some(lead_body())),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
}

#[tokio::test]
async fn test_lead_lifecycle_over_http() {
    let app = app();

    let (status, lead) = send(
        &app,
        request("POST", "/api/v1/leads", Some("staff"), Some(lead_body())),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(lead["status"], "new");
    assert_eq!(lead["phone"], "+16502530000");
    let id = lead["id"].as_str().unwrap().to_string();

    let (status, leads) = send(
        &app,
        request("GET", "/api/v1/leads?status=new", Some("viewer"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(leads.as_array().unwrap().len(), 1);

    // Staff may not convert
    let convert_uri = format!("/api/v1/leads/{}/convert", id);
    let password = json!({"password": "correct-horse-battery"});
    let (status, _) = send(
        &app,
        request("POST", &convert_uri, Some("staff"), Some(password.clone())),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, converted) = send(
        &app,
        request("POST", &convert_uri, Some("manager"), Some(password)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let customer_id = converted["customer_id"].as_str().unwrap().to_string();

    let (status, detail) = send(
        &app,
        request("GET", &format!("/api/v1/leads/{}", id), Some("viewer"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["lead"]["status"], "won");

    // The stored hash never leaves the server
    let (status, customer) = send(
        &app,
        request("GET", &format!("/api/v1/customers/{}", customer_id), Some("viewer"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(customer["customer"]["email"], "dana@example.com");
    assert!(customer["customer"].get("password_hash").is_none());
}

#[tokio::test]
async fn test_won_status_edit_is_a_conflict() {
    let app = app();
    let (_, lead) = send(
        &app,
        request("POST", "/api/v1/leads", Some("staff"), Some(lead_body())),
    )
    .await;
    let uri = format!("/api/v1/leads/{}/status", lead["id"].as_str().unwrap());

    let (status, body) = send(
        &app,
        request("PUT", &uri, Some("staff"), Some(json!({"status": "won"}))),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn test_unknown_status_filter_is_a_validation_error() {
    let app = app();
    let (status, body) = send(
        &app,
        request("GET", "/api/v1/proposals?status=archived", Some("viewer"), None),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn test_missing_record_is_not_found() {
    let app = app();
    let uri = format!("/api/v1/invoices/{}", Uuid::new_v4());
    let (status, body) = send(&app, request("GET", &uri, Some("viewer"), None)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_proposal_totals_come_from_the_server() {
    let app = app();
    let (status, proposal) = send(
        &app,
        request(
            "POST",
            "/api/v1/proposals",
            Some("staff"),
            Some(json!({
                "customer": {"name": "Pat Lee"},
                "items": [{"description": "Tiling", "quantity": "10", "unit_price": "50"}],
                "tax_rate": "7",
                "total": "1.00"
            })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(proposal["status"], "draft");
    assert_eq!(proposal["total"], "535.00");
}

#[tokio::test]
async fn test_numeric_prices_keep_their_cents() {
    let app = app();
    let (status, proposal) = send(
        &app,
        request(
            "POST",
            "/api/v1/proposals",
            Some("staff"),
            Some(json!({
                "customer": {"name": "Pat Lee"},
                "items": [
                    {"service": "Paint", "quantity": 3, "price": 0.1},
                    {"service": "Trim", "quantity": 1, "price": 19.99}
                ],
                "tax_rate": 7
            })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(proposal["items"][0]["unit_price"], "0.1");
    assert_eq!(proposal["subtotal"], "20.29");
    assert_eq!(proposal["tax"], "1.42");
    assert_eq!(proposal["total"], "21.71");
}
