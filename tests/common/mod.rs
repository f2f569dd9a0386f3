//! Test utilities and fixtures for Launch Space integration tests

#![allow(dead_code)]

use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use serde_json::{Value, json};
use tower::ServiceExt;

// Re-export the main library crate
pub use launch_space::db::{AppState, DbPool, init_db, queries};
pub use launch_space::handlers;
pub use launch_space::models::*;
pub use launch_space::notifications::Notifier;
pub use launch_space::handlers::webhooks::stripe::parse_event;
pub use launch_space::payments::{StripeClient, StripeWebhookEvent};
pub use launch_space::reconcile::{
    PaymentEvent, PaymentEventHandler, ReconcileOutcome, Reconciler, event_type,
};

pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const ONE_DAY: i64 = 86400;

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Create an in-memory test database with schema initialized
pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    init_db(&conn).expect("Failed to initialize schema");
    conn
}

/// Single-connection pool over one in-memory database.
///
/// Every in-memory connection is its own database, so the pool must never
/// open a second one.
pub fn setup_test_pool() -> DbPool {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder().max_size(1).build(manager).unwrap();
    {
        let conn = pool.get().unwrap();
        init_db(&conn).unwrap();
    }
    pool
}

pub fn test_stripe_client() -> StripeClient {
    StripeClient::new("sk_test_xxx", TEST_WEBHOOK_SECRET, "price_premium_test")
}

/// Reconciler with notifications off and no retry sleep.
pub fn test_reconciler(pool: &DbPool) -> Reconciler {
    Reconciler::new(pool.clone(), Notifier::disabled(), Duration::ZERO)
}

pub fn create_test_app_state() -> AppState {
    AppState {
        db: setup_test_pool(),
        base_url: "http://localhost:3000".to_string(),
        stripe: Some(test_stripe_client()),
        notifier: Notifier::disabled(),
        reconcile_retry_delay: Duration::ZERO,
    }
}

pub fn test_app(state: AppState) -> Router {
    handlers::router().with_state(state)
}

// ============ Fixtures ============

/// A premium draft awaiting payment, as left by the checkout flow.
pub fn create_premium_draft(
    conn: &Connection,
    id: &str,
    user_id: &str,
    checkout_session_id: Option<&str>,
) -> Project {
    queries::create_project(
        conn,
        &CreateProject {
            id: Some(id.to_string()),
            slug: id.to_string(),
            name: format!("Tool {}", id),
            submitted_by: user_id.to_string(),
            plan: Plan::Premium,
            is_draft: true,
            checkout_session_id: checkout_session_id.map(str::to_string),
            payment_initiated_at: Some(now()),
            ..Default::default()
        },
    )
    .expect("Failed to create premium draft")
}

/// A published standard project, optionally launching in a competition.
pub fn create_standard_project(
    conn: &Connection,
    id: &str,
    user_id: &str,
    competition: Option<&Competition>,
) -> Project {
    let launch = competition
        .map(|c| LaunchSlot {
            week: Some(c.competition_id.clone()),
            date: Some(c.start_date),
            weekly_competition_id: Some(c.id.clone()),
            month: Some("2030-01".to_string()),
        })
        .unwrap_or_default();
    queries::create_project(
        conn,
        &CreateProject {
            id: Some(id.to_string()),
            slug: id.to_string(),
            name: format!("Tool {}", id),
            submitted_by: user_id.to_string(),
            launch,
            ..Default::default()
        },
    )
    .expect("Failed to create standard project")
}

pub fn create_test_competition(conn: &Connection, key: &str, start_date: i64) -> Competition {
    queries::create_competition(
        conn,
        &CreateCompetition {
            competition_id: key.to_string(),
            kind: CompetitionKind::Weekly,
            start_date,
            end_date: start_date + 7 * ONE_DAY,
        },
    )
    .expect("Failed to create competition")
}

/// Put a premium draft into a competition so counter updates can be observed.
pub fn assign_competition(conn: &Connection, project_id: &str, competition: &Competition) {
    let update = ProjectUpdate {
        launch: Some(LaunchSlot {
            week: Some(competition.competition_id.clone()),
            date: Some(competition.start_date),
            weekly_competition_id: Some(competition.id.clone()),
            month: Some("2030-01".to_string()),
        }),
        ..Default::default()
    };
    queries::update_project(conn, project_id, &update).expect("Failed to assign competition");
}

pub fn get_project(conn: &Connection, id: &str) -> Project {
    queries::get_project_by_id(conn, id)
        .expect("Failed to load project")
        .expect("Project not found")
}

pub fn get_competition(conn: &Connection, id: &str) -> Competition {
    queries::get_competition_by_id(conn, id)
        .expect("Failed to load competition")
        .expect("Competition not found")
}

pub fn payments_for(conn: &Connection, reference: &str) -> Vec<Payment> {
    queries::list_payments_by_reference(conn, reference).expect("Failed to list payments")
}

// ============ Stripe payloads ============

pub fn metadata(user_id: &str, project_id: Option<&str>) -> Value {
    let mut meta = json!({ "userId": user_id, "planType": "premium" });
    if let Some(project_id) = project_id {
        meta["projectId"] = json!(project_id);
    }
    meta
}

pub fn checkout_session(session_id: &str, payment_intent: &str, metadata: Value) -> Value {
    json!({
        "id": session_id,
        "object": "checkout.session",
        "payment_status": "paid",
        "payment_intent": payment_intent,
        "amount_total": 1500,
        "currency": "usd",
        "customer_details": { "email": "buyer@example.com" },
        "metadata": metadata,
        "livemode": false
    })
}

pub fn payment_intent(id: &str, metadata: Value) -> Value {
    json!({
        "id": id,
        "object": "payment_intent",
        "amount": 1500,
        "currency": "usd",
        "created": now(),
        "receipt_email": "buyer@example.com",
        "metadata": metadata,
        "livemode": false
    })
}

pub fn charge(id: &str, payment_intent: Option<&str>) -> Value {
    json!({
        "id": id,
        "object": "charge",
        "payment_intent": payment_intent,
        "amount": 1500,
        "amount_refunded": 1500,
        "currency": "usd"
    })
}

pub fn dispute(id: &str, charge: &str, payment_intent: Option<&str>) -> Value {
    json!({
        "id": id,
        "object": "dispute",
        "charge": charge,
        "payment_intent": payment_intent,
        "amount": 1500,
        "currency": "usd",
        "reason": "fraudulent",
        "status": "needs_response"
    })
}

pub fn stripe_event(event_type: &str, object: Value) -> String {
    json!({
        "id": format!("evt_{}", uuid::Uuid::new_v4().simple()),
        "type": event_type,
        "livemode": false,
        "data": { "object": object }
    })
    .to_string()
}

pub fn compute_stripe_signature(payload: &[u8], secret: &str, timestamp: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(signed_payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// A valid `stripe-signature` header for `payload`, signed now.
pub fn sign(payload: &str) -> String {
    let timestamp = now().to_string();
    let signature = compute_stripe_signature(payload.as_bytes(), TEST_WEBHOOK_SECRET, &timestamp);
    format!("t={},v1={}", timestamp, signature)
}

/// Run one event through the real envelope mapping and the reconciler.
pub async fn deliver(reconciler: &Reconciler, event_type: &str, object: Value) -> ReconcileOutcome {
    let envelope: StripeWebhookEvent =
        serde_json::from_str(&stripe_event(event_type, object)).expect("valid envelope");
    let event = parse_event(&envelope)
        .map_err(|(status, _)| status)
        .expect("event should parse");
    event
        .dispatch(reconciler)
        .await
        .expect("reconciliation should succeed")
}

// ============ HTTP helpers ============

pub async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, json)
}

/// POST a signed delivery to the Stripe webhook route.
pub async fn post_webhook(app: Router, payload: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/webhook/stripe")
        .header("content-type", "application/json")
        .header("stripe-signature", sign(payload))
        .body(Body::from(payload.to_string()))
        .unwrap();
    send(app, request).await
}
