use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries};
use crate::error::Result;
use crate::extractors::{CallerId, Json, Query};
use crate::models::WebhookLog;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 100;

#[derive(Debug, Default, Deserialize)]
pub struct WebhookLogQuery {
    /// Filter by source (e.g. `stripe`)
    pub source: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl WebhookLogQuery {
    /// Requested page size, 1..=100, 50 when absent.
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// One page of deliveries, newest first.
#[derive(Debug, Serialize)]
pub struct WebhookLogPage {
    pub items: Vec<WebhookLog>,
    /// Deliveries matching the filter across all pages
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// List received webhook deliveries. Bodies hold buyer details, so an
/// authenticated caller is required.
pub async fn list_webhook_logs(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Query(query): Query<WebhookLogQuery>,
) -> Result<Json<WebhookLogPage>> {
    let conn = state.db.get()?;
    let (limit, offset) = (query.limit(), query.offset());
    let (items, total) =
        queries::list_webhook_logs_paginated(&conn, query.source.as_deref(), limit, offset)?;
    tracing::debug!(
        "Webhook logs listed by {} (source={:?}, {} of {})",
        user_id,
        query.source,
        items.len(),
        total
    );
    Ok(Json(WebhookLogPage {
        items,
        total,
        limit,
        offset,
    }))
}
