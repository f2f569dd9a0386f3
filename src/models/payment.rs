use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use super::Plan;

/// Payment lifecycle. A payment only leaves `Completed` once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    Completed,
    Refunded,
    Disputed,
}

/// Provenance stored with each payment, used to link orphans later.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentMetadata {
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_intent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_slug: Option<String>,
    pub live_mode: bool,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub raw_metadata: serde_json::Value,
}

/// One processed gateway transaction (the `payments` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub user_id: Option<String>,
    /// None until the payment is linked to a project.
    pub app_id: Option<String>,
    pub plan: Plan,
    /// Smallest currency unit (cents).
    pub amount: i64,
    pub currency: String,
    /// Gateway payment reference, the idempotency key.
    pub payment_id: String,
    /// Checkout session id, when the payment came from a checkout.
    pub invoice_id: Option<String>,
    pub status: PaymentStatus,
    pub metadata: PaymentMetadata,
    pub paid_at: i64,
    pub refunded_at: Option<i64>,
    pub disputed_at: Option<i64>,
    pub dispute_id: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub user_id: Option<String>,
    pub app_id: Option<String>,
    pub plan: Plan,
    pub amount: i64,
    pub currency: String,
    pub payment_id: String,
    pub invoice_id: Option<String>,
    pub metadata: PaymentMetadata,
    pub paid_at: i64,
}
