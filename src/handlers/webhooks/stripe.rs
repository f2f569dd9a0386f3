use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::db::{AppState, queries};
use crate::error::msg;
use crate::models::CreateWebhookLog;
use crate::payments::StripeWebhookEvent;
use crate::reconcile::{PaymentEvent, Reconciler, event_type};

/// Status and JSON body sent back to Stripe.
pub type WebhookReply = (StatusCode, Json<Value>);

const SOURCE: &str = "stripe";

fn reply(status: StatusCode, body: Value) -> WebhookReply {
    (status, Json(body))
}

fn bad_request(message: impl std::fmt::Display) -> WebhookReply {
    reply(
        StatusCode::BAD_REQUEST,
        json!({ "error": format!("Webhook Error: {}", message) }),
    )
}

fn extract_signature(headers: &HeaderMap) -> Result<String, WebhookReply> {
    let missing = || reply(StatusCode::BAD_REQUEST, json!({ "error": msg::MISSING_SIGNATURE }));
    let value = headers.get("stripe-signature").ok_or_else(missing)?;
    value.to_str().map(str::to_string).map_err(|e| {
        tracing::debug!("Invalid UTF-8 in Stripe signature header: {}", e);
        missing()
    })
}

fn parse_object<T: DeserializeOwned>(event: &StripeWebhookEvent) -> Result<T, WebhookReply> {
    serde_json::from_value(event.data.object.clone()).map_err(|e| {
        tracing::error!(
            "Failed to parse {} object of event {}: {}",
            event.event_type,
            event.id,
            e
        );
        bad_request(format!("Invalid {} payload", event.event_type))
    })
}

/// Map the envelope onto a typed event. Unknown types are ignored, a known type
/// with a malformed object is rejected.
pub fn parse_event(event: &StripeWebhookEvent) -> Result<PaymentEvent, WebhookReply> {
    let parsed = match event.event_type.as_str() {
        event_type::CHECKOUT_COMPLETED => PaymentEvent::CheckoutCompleted(parse_object(event)?),
        event_type::ASYNC_PAYMENT_SUCCEEDED => {
            PaymentEvent::AsyncPaymentSucceeded(parse_object(event)?)
        }
        event_type::ASYNC_PAYMENT_FAILED => PaymentEvent::AsyncPaymentFailed(parse_object(event)?),
        event_type::PAYMENT_INTENT_SUCCEEDED => {
            PaymentEvent::PaymentIntentSucceeded(parse_object(event)?)
        }
        event_type::PAYMENT_INTENT_FAILED => {
            PaymentEvent::PaymentIntentFailed(parse_object(event)?)
        }
        event_type::CHARGE_REFUNDED => PaymentEvent::ChargeRefunded(parse_object(event)?),
        event_type::DISPUTE_CREATED => PaymentEvent::DisputeCreated(parse_object(event)?),
        other => PaymentEvent::Ignored {
            event_type: other.to_string(),
        },
    };
    Ok(parsed)
}

/// Verify, log and reconcile one delivery.
pub async fn process_stripe_webhook(state: &AppState, headers: &HeaderMap, body: &Bytes) -> WebhookReply {
    let Some(stripe) = state.stripe.as_ref() else {
        tracing::error!("Stripe webhook received but Stripe is not configured");
        return reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": msg::STRIPE_NOT_CONFIGURED }),
        );
    };

    let signature = match extract_signature(headers) {
        Ok(s) => s,
        Err(e) => return e,
    };

    match stripe.verify_webhook_signature(body, &signature) {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!("Stripe webhook signature mismatch");
            return bad_request(msg::INVALID_SIGNATURE);
        }
        Err(e) => {
            tracing::warn!("Stripe webhook signature rejected: {}", e);
            return bad_request(e);
        }
    }

    let event: StripeWebhookEvent = match serde_json::from_slice(body) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!("Failed to parse Stripe webhook: {}", e);
            return bad_request("Invalid JSON");
        }
    };

    let raw_body = String::from_utf8_lossy(body);
    let log_id = {
        let logged = state.db.get().map_err(Into::into).and_then(|conn| {
            queries::create_webhook_log(
                &conn,
                &CreateWebhookLog {
                    source: SOURCE,
                    event_id: Some(&event.id),
                    event_type: Some(&event.event_type),
                    signature: Some(&signature),
                    body: &raw_body,
                },
            )
        });
        match logged {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!("Failed to record webhook log for event {}: {}", event.id, e);
                None
            }
        }
    };

    tracing::info!(
        "Stripe event {} ({}) received, livemode={}",
        event.id,
        event.event_type,
        event.livemode
    );

    let payment_event = match parse_event(&event) {
        Ok(e) => e,
        Err(e) => {
            finish_log(state, log_id.as_deref(), false, "invalid payload");
            return e;
        }
    };

    let reconciler = Reconciler::from_state(state);
    match payment_event.dispatch(&reconciler).await {
        Ok(outcome) => {
            tracing::info!("Stripe event {} processed: {}", event.id, outcome);
            finish_log(state, log_id.as_deref(), true, &outcome.to_string());
            reply(StatusCode::OK, json!({ "received": true }))
        }
        Err(e) => {
            tracing::error!("Stripe event {} failed: {}", event.id, e);
            finish_log(state, log_id.as_deref(), false, &e.to_string());
            reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": msg::WEBHOOK_PROCESSING_FAILED,
                    "message": e.to_string(),
                }),
            )
        }
    }
}

fn finish_log(state: &AppState, log_id: Option<&str>, processed: bool, result: &str) {
    let Some(log_id) = log_id else {
        return;
    };
    let finished = state
        .db
        .get()
        .map_err(Into::into)
        .and_then(|conn| queries::finish_webhook_log(&conn, log_id, processed, result));
    if let Err(e) = finished {
        tracing::warn!("Failed to finish webhook log {}: {}", log_id, e);
    }
}

/// Axum handler for Stripe webhooks.
pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    process_stripe_webhook(&state, &headers, &body).await
}

/// Liveness check for the webhook route.
pub async fn stripe_webhook_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "message": "Stripe webhook endpoint",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "ready": state.stripe.is_some(),
    }))
}
