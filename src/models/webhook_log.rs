use serde::{Deserialize, Serialize};

/// A verified inbound webhook delivery and what became of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookLog {
    pub id: String,
    pub source: String,
    pub event_id: Option<String>,
    pub event_type: Option<String>,
    #[serde(skip_serializing)]
    pub signature: Option<String>,
    pub body: String,
    pub received_at: i64,
    pub processed: bool,
    pub result: Option<String>,
    pub processed_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct CreateWebhookLog<'a> {
    pub source: &'a str,
    pub event_id: Option<&'a str>,
    pub event_type: Option<&'a str>,
    pub signature: Option<&'a str>,
    pub body: &'a str,
}
