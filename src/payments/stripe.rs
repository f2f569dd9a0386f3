use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result, msg};
use crate::models::Plan;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
struct CreateCheckoutSessionResponse {
    id: String,
    url: String,
}

/// What a premium checkout is for. Everything here ends up in session metadata
/// so the webhook can find the project again.
#[derive(Debug, Clone)]
pub struct CheckoutRequest<'a> {
    pub project_id: &'a str,
    pub project_slug: &'a str,
    pub user_id: &'a str,
    pub plan: Plan,
    pub success_url: &'a str,
    pub cancel_url: &'a str,
}

#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
    webhook_secret: String,
    premium_price_id: String,
}

impl StripeClient {
    pub fn new(secret_key: &str, webhook_secret: &str, premium_price_id: &str) -> Self {
        Self {
            client: Client::new(),
            secret_key: secret_key.to_string(),
            webhook_secret: webhook_secret.to_string(),
            premium_price_id: premium_price_id.to_string(),
        }
    }

    /// Create a one-off checkout session for the premium price.
    ///
    /// Returns `(session_id, hosted_url)`.
    pub async fn create_checkout_session(&self, req: &CheckoutRequest<'_>) -> Result<(String, String)> {
        let response = self
            .client
            .post("https://api.stripe.com/v1/checkout/sessions")
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&[
                ("mode", "payment"),
                ("success_url", req.success_url),
                ("cancel_url", req.cancel_url),
                ("line_items[0][price]", self.premium_price_id.as_str()),
                ("line_items[0][quantity]", "1"),
                ("metadata[projectId]", req.project_id),
                ("metadata[projectSlug]", req.project_slug),
                ("metadata[userId]", req.user_id),
                ("metadata[planType]", req.plan.as_ref()),
            ])
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Stripe API error: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Internal(format!(
                "Stripe API error: {}",
                error_text
            )));
        }

        let session: CreateCheckoutSessionResponse = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to parse Stripe response: {}", e)))?;

        Ok((session.id, session.url))
    }

    /// Maximum age of a webhook timestamp before it's rejected (in seconds).
    const WEBHOOK_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

    /// Allowed clock skew for timestamps from the future (in seconds).
    const WEBHOOK_FUTURE_SKEW_SECS: i64 = 60;

    /// Verify a `stripe-signature` header (`t=<unix>,v1=<hex>[,v1=<hex>...]`).
    ///
    /// A malformed header is an error; a well-formed header that does not
    /// match (or is stale) is `Ok(false)`.
    pub fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<bool> {
        let mut timestamp = None;
        let mut candidates = Vec::new();

        for part in signature.split(',') {
            let part = part.trim();
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = Some(t);
            } else if let Some(s) = part.strip_prefix("v1=") {
                candidates.push(s);
            }
        }

        let timestamp_str =
            timestamp.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;
        if candidates.is_empty() {
            return Err(AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()));
        }

        let timestamp: i64 = timestamp_str
            .parse()
            .map_err(|_| AppError::BadRequest(msg::INVALID_TIMESTAMP_IN_SIGNATURE.into()))?;

        let age = chrono::Utc::now().timestamp() - timestamp;
        if age > Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS {
            tracing::warn!(
                "Stripe webhook rejected: timestamp too old (age={}s, max={}s)",
                age,
                Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS
            );
            return Ok(false);
        }
        if age < -Self::WEBHOOK_FUTURE_SKEW_SECS {
            tracing::warn!(
                "Stripe webhook rejected: timestamp in the future (age={}s)",
                age
            );
            return Ok(false);
        }

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| AppError::Internal(msg::INVALID_WEBHOOK_SECRET.into()))?;
        mac.update(timestamp_str.as_bytes());
        mac.update(b".");
        mac.update(payload);
        let expected = hex::encode(mac.finalize().into_bytes());
        let expected_bytes = expected.as_bytes();

        // Signature length is not secret (always 64 hex chars), only the bytes are
        Ok(candidates.iter().any(|provided| {
            let provided_bytes = provided.as_bytes();
            provided_bytes.len() == expected_bytes.len()
                && bool::from(expected_bytes.ct_eq(provided_bytes))
        }))
    }
}

/// Event envelope. `data.object` is parsed according to `event_type`.
#[derive(Debug, Deserialize)]
pub struct StripeWebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub livemode: bool,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

/// Metadata we attach when creating checkout sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StripeMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_type: Option<String>,
}

// ============ checkout.session.* ============

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    /// "paid", "unpaid" or "no_payment_required"
    pub payment_status: String,
    pub payment_intent: Option<String>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    pub customer_email: Option<String>,
    pub customer_details: Option<CustomerDetails>,
    #[serde(default)]
    pub metadata: StripeMetadata,
    #[serde(default)]
    pub livemode: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomerDetails {
    pub email: Option<String>,
}

impl CheckoutSession {
    pub fn is_paid(&self) -> bool {
        self.payment_status == "paid"
    }

    pub fn buyer_email(&self) -> Option<&str> {
        self.customer_details
            .as_ref()
            .and_then(|d| d.email.as_deref())
            .or(self.customer_email.as_deref())
    }
}

// ============ payment_intent.* ============

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    /// Unix seconds
    pub created: i64,
    pub receipt_email: Option<String>,
    #[serde(default)]
    pub metadata: StripeMetadata,
    pub last_payment_error: Option<PaymentError>,
    #[serde(default)]
    pub livemode: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentError {
    pub message: Option<String>,
}

// ============ charge.refunded ============

#[derive(Debug, Clone, Deserialize)]
pub struct Charge {
    pub id: String,
    pub payment_intent: Option<String>,
    pub amount: i64,
    #[serde(default)]
    pub amount_refunded: i64,
    pub currency: String,
}

// ============ charge.dispute.created ============

#[derive(Debug, Clone, Deserialize)]
pub struct Dispute {
    pub id: String,
    pub charge: String,
    pub payment_intent: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub reason: Option<String>,
    pub status: Option<String>,
}
