use chrono::Utc;
use rusqlite::{Connection, params, types::Value};

use crate::error::Result;
use crate::id::EntityType;
use crate::models::*;

use super::from_row::{
    COMPETITION_COLS, PAYMENT_COLS, PROJECT_COLS, WEBHOOK_LOG_COLS, query_all, query_one,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

/// Builder for dynamic UPDATE statements with optional fields.
/// Combines multiple field updates into a single statement, so each logical
/// update of a record is atomic.
struct UpdateBuilder {
    table: &'static str,
    id: String,
    fields: Vec<(&'static str, Value)>,
    track_updated_at: bool,
}

impl UpdateBuilder {
    fn new(table: &'static str, id: &str) -> Self {
        Self {
            table,
            id: id.to_string(),
            fields: Vec::new(),
            track_updated_at: false,
        }
    }

    fn with_updated_at(mut self) -> Self {
        self.track_updated_at = true;
        self
    }

    fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.fields.push((column, value.into()));
        self
    }

    fn set_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    /// Set a column to an explicit value (including NULL).
    /// Use this for Option<T> where Some(v) = set to v, None = set to NULL.
    fn set_nullable<V: Into<Value>>(mut self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.fields.push((column, v.into())),
            None => self.fields.push((column, Value::Null)),
        }
        self
    }

    /// `None` keeps the column, `Some(None)` clears it, `Some(Some(v))` sets it.
    fn patch<V: Into<Value>>(self, column: &'static str, value: Option<Option<V>>) -> Self {
        match value {
            Some(v) => self.set_nullable(column, v),
            None => self,
        }
    }

    fn column_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(|(col, _)| *col).collect()
    }

    fn execute(mut self, conn: &Connection) -> Result<bool> {
        if self.fields.is_empty() {
            return Ok(false);
        }
        if self.track_updated_at {
            self.fields.push(("updated_at", now().into()));
        }
        let sets: Vec<String> = self
            .fields
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        let mut values: Vec<Value> = self.fields.into_iter().map(|(_, v)| v).collect();
        values.push(self.id.into());
        let sql = format!("UPDATE {} SET {} WHERE id = ?", self.table, sets.join(", "));
        let affected = conn.execute(&sql, rusqlite::params_from_iter(values))?;
        Ok(affected > 0)
    }
}

// ============ Projects ============

pub fn create_project(conn: &Connection, input: &CreateProject) -> Result<Project> {
    let id = input
        .id
        .clone()
        .unwrap_or_else(|| EntityType::Project.gen_id());
    let now = now();
    let pending = input.pending_launch.clone().unwrap_or_default();
    let original = input.original_launch.clone().unwrap_or_default();

    conn.execute(
        "INSERT INTO apps (id, slug, name, submitted_by, plan, is_draft, payment_status,
            checkout_session_id, payment_initiated_at,
            launch_week, launch_date, weekly_competition_id, launch_month,
            pending_launch_week, pending_launch_date, pending_weekly_competition_id, pending_launch_month,
            original_launch_week, original_launch_date, original_weekly_competition_id, original_launch_month,
            created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?22)",
        params![
            &id,
            &input.slug,
            &input.name,
            &input.submitted_by,
            input.plan.as_ref(),
            input.is_draft,
            input.payment_status,
            &input.checkout_session_id,
            input.payment_initiated_at,
            &input.launch.week,
            input.launch.date,
            &input.launch.weekly_competition_id,
            &input.launch.month,
            &pending.week,
            pending.date,
            &pending.weekly_competition_id,
            &pending.month,
            &original.week,
            original.date,
            &original.weekly_competition_id,
            &original.month,
            now,
        ],
    )?;

    get_project_by_id(conn, &id)?
        .ok_or_else(|| crate::error::AppError::Internal("Project vanished after insert".into()))
}

pub fn get_project_by_id(conn: &Connection, id: &str) -> Result<Option<Project>> {
    query_one(
        conn,
        &format!("SELECT {} FROM apps WHERE id = ?1", PROJECT_COLS),
        &[&id],
    )
}

/// Slug lookup scoped to the owner, so slugs reused by different users never collide.
pub fn get_project_by_slug_for_owner(
    conn: &Connection,
    slug: &str,
    user_id: &str,
) -> Result<Option<Project>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM apps WHERE slug = ?1 AND submitted_by = ?2",
            PROJECT_COLS
        ),
        &[&slug, &user_id],
    )
}

pub fn get_project_by_checkout_session(
    conn: &Connection,
    session_id: &str,
    user_id: Option<&str>,
) -> Result<Option<Project>> {
    match user_id {
        Some(user_id) => query_one(
            conn,
            &format!(
                "SELECT {} FROM apps WHERE checkout_session_id = ?1 AND submitted_by = ?2
                 ORDER BY created_at DESC LIMIT 1",
                PROJECT_COLS
            ),
            &[&session_id, &user_id],
        ),
        None => query_one(
            conn,
            &format!(
                "SELECT {} FROM apps WHERE checkout_session_id = ?1
                 ORDER BY created_at DESC LIMIT 1",
                PROJECT_COLS
            ),
            &[&session_id],
        ),
    }
}

pub fn get_project_by_order_id(conn: &Connection, order_id: &str) -> Result<Option<Project>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM apps WHERE order_id = ?1 ORDER BY updated_at DESC LIMIT 1",
            PROJECT_COLS
        ),
        &[&order_id],
    )
}

/// Unpaid premium projects of a user, drafts first, most recently initiated first.
pub fn list_unpaid_premium_projects(
    conn: &Connection,
    user_id: &str,
    limit: i64,
) -> Result<Vec<Project>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM apps
             WHERE submitted_by = ?1 AND plan = 'premium' AND payment_status = 0
             ORDER BY is_draft DESC, COALESCE(payment_initiated_at, 0) DESC, created_at DESC
             LIMIT ?2",
            PROJECT_COLS
        ),
        &[&user_id, &limit],
    )
}

/// Apply a typed partial update as one statement. Returns the names of the
/// columns written (empty when nothing matched or nothing was set).
pub fn update_project(
    conn: &Connection,
    id: &str,
    update: &ProjectUpdate,
) -> Result<Vec<&'static str>> {
    let mut builder = UpdateBuilder::new("apps", id)
        .with_updated_at()
        .set_opt("plan", update.plan.map(|p| p.as_ref().to_string()))
        .patch("plan_price", update.plan_price)
        .set_opt("is_draft", update.is_draft)
        .set_opt("payment_status", update.payment_status)
        .set_opt("order_id", update.order_id.clone())
        .set_opt("payment_date", update.payment_date)
        .set_opt("checkout_session_id", update.checkout_session_id.clone())
        .patch("payment_initiated_at", update.payment_initiated_at)
        .set_opt("scheduled_launch", update.scheduled_launch)
        .set_opt("status", update.status.clone())
        .patch("premium_badge", update.premium_badge)
        .patch("skip_queue", update.skip_queue)
        .patch("social_promotion", update.social_promotion)
        .patch("guaranteed_backlinks", update.guaranteed_backlinks)
        .patch("homepage_duration", update.homepage_duration)
        .set_opt("link_type", update.link_type.map(|l| l.as_ref().to_string()))
        .set_opt("dofollow_status", update.dofollow_status)
        .patch("dofollow_reason", update.dofollow_reason.clone())
        .patch("dofollow_awarded_at", update.dofollow_awarded_at);

    if let Some(ref slot) = update.launch {
        builder = builder
            .set_nullable("launch_week", slot.week.clone())
            .set_nullable("launch_date", slot.date)
            .set_nullable("weekly_competition_id", slot.weekly_competition_id.clone())
            .set_nullable("launch_month", slot.month.clone());
    }

    if let Some(ref pending) = update.pending_launch {
        let slot = pending.clone().unwrap_or_default();
        builder = builder
            .set_nullable("pending_launch_week", slot.week)
            .set_nullable("pending_launch_date", slot.date)
            .set_nullable("pending_weekly_competition_id", slot.weekly_competition_id)
            .set_nullable("pending_launch_month", slot.month);
    }

    if let Some(ref original) = update.original_launch {
        let slot = original.clone().unwrap_or_default();
        builder = builder
            .set_nullable("original_launch_week", slot.week)
            .set_nullable("original_launch_date", slot.date)
            .set_nullable("original_weekly_competition_id", slot.weekly_competition_id)
            .set_nullable("original_launch_month", slot.month);
    }

    if let Some(ref chargeback) = update.chargeback {
        builder = builder
            .set("chargeback_dispute_id", chargeback.dispute_id.clone())
            .set_nullable("chargeback_reason", chargeback.reason.clone())
            .set("chargeback_created_at", chargeback.created_at);
    }

    if let Some(ref failure) = update.payment_failure {
        builder = builder
            .set("payment_failed_at", failure.failed_at)
            .set("payment_failure_reason", failure.reason.clone());
    }

    let columns = builder.column_names();
    if builder.execute(conn)? {
        Ok(columns)
    } else {
        Ok(Vec::new())
    }
}

// ============ Payments ============

/// The completed payment for a gateway reference, if any.
pub fn get_completed_payment(conn: &Connection, payment_id: &str) -> Result<Option<Payment>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM payments WHERE payment_id = ?1 AND status = 'completed'",
            PAYMENT_COLS
        ),
        &[&payment_id],
    )
}

pub fn list_payments_by_reference(conn: &Connection, payment_id: &str) -> Result<Vec<Payment>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM payments WHERE payment_id = ?1 ORDER BY created_at",
            PAYMENT_COLS
        ),
        &[&payment_id],
    )
}

/// Insert a completed payment. Returns `None` when a completed payment for the
/// same gateway reference already exists (the unique partial index rejects it).
pub fn create_payment(conn: &Connection, input: &CreatePayment) -> Result<Option<Payment>> {
    let id = EntityType::Payment.gen_id();
    let metadata = serde_json::to_string(&input.metadata)?;

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO payments
            (id, user_id, app_id, plan, amount, currency, payment_id, invoice_id, status, metadata, paid_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'completed', ?9, ?10, ?11)",
        params![
            &id,
            &input.user_id,
            &input.app_id,
            input.plan.as_ref(),
            input.amount,
            &input.currency,
            &input.payment_id,
            &input.invoice_id,
            &metadata,
            input.paid_at,
            now(),
        ],
    )?;
    if inserted == 0 {
        return Ok(None);
    }

    query_one(
        conn,
        &format!("SELECT {} FROM payments WHERE id = ?1", PAYMENT_COLS),
        &[&id],
    )
}

/// Attach an orphan payment to its project. Never re-links an already linked payment.
pub fn link_payment_to_project(conn: &Connection, id: &str, app_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE payments SET app_id = ?1 WHERE id = ?2 AND app_id IS NULL",
        params![app_id, id],
    )?;
    Ok(affected > 0)
}

/// Completed payments of a user that are not linked to any project yet.
pub fn list_orphan_payments(conn: &Connection, user_id: &str) -> Result<Vec<Payment>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM payments
             WHERE user_id = ?1 AND app_id IS NULL AND status = 'completed'
             ORDER BY paid_at",
            PAYMENT_COLS
        ),
        &[&user_id],
    )
}

/// Move the completed payment for a reference to `refunded`.
pub fn mark_payment_refunded(conn: &Connection, payment_id: &str, at: i64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE payments SET status = 'refunded', refunded_at = ?1
         WHERE payment_id = ?2 AND status = 'completed'",
        params![at, payment_id],
    )?;
    Ok(affected > 0)
}

/// Move a completed payment (by row id) to `disputed`.
pub fn mark_payment_disputed(
    conn: &Connection,
    id: &str,
    dispute_id: &str,
    at: i64,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE payments SET status = 'disputed', disputed_at = ?1, dispute_id = ?2
         WHERE id = ?3 AND status = 'completed'",
        params![at, dispute_id, id],
    )?;
    Ok(affected > 0)
}

// ============ Competitions ============

pub fn create_competition(conn: &Connection, input: &CreateCompetition) -> Result<Competition> {
    let id = EntityType::Competition.gen_id();
    let now = now();
    conn.execute(
        "INSERT INTO competitions (id, competition_id, kind, start_date, end_date, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            &id,
            &input.competition_id,
            input.kind.as_ref(),
            input.start_date,
            input.end_date,
            now,
        ],
    )?;
    Ok(Competition {
        id,
        competition_id: input.competition_id.clone(),
        kind: input.kind,
        start_date: input.start_date,
        end_date: input.end_date,
        total_submissions: 0,
        premium_submissions: 0,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_competition_by_id(conn: &Connection, id: &str) -> Result<Option<Competition>> {
    query_one(
        conn,
        &format!("SELECT {} FROM competitions WHERE id = ?1", COMPETITION_COLS),
        &[&id],
    )
}

pub fn get_competition_by_key(
    conn: &Connection,
    competition_id: &str,
    kind: CompetitionKind,
) -> Result<Option<Competition>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM competitions WHERE competition_id = ?1 AND kind = ?2",
            COMPETITION_COLS
        ),
        &[&competition_id, &kind.as_ref()],
    )
}

/// Count one more premium submission. Not idempotent by nature.
pub fn increment_premium_submissions(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE competitions
         SET total_submissions = total_submissions + 1,
             premium_submissions = premium_submissions + 1,
             updated_at = ?1
         WHERE id = ?2",
        params![now(), id],
    )?;
    Ok(affected > 0)
}

// ============ Webhook logs ============

pub fn create_webhook_log(conn: &Connection, input: &CreateWebhookLog) -> Result<String> {
    let id = EntityType::WebhookLog.gen_id();
    conn.execute(
        "INSERT INTO webhook_logs (id, source, event_id, event_type, signature, body, received_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            &id,
            input.source,
            input.event_id,
            input.event_type,
            input.signature,
            input.body,
            now(),
        ],
    )?;
    Ok(id)
}

pub fn finish_webhook_log(
    conn: &Connection,
    id: &str,
    processed: bool,
    result: &str,
) -> Result<bool> {
    UpdateBuilder::new("webhook_logs", id)
        .set("processed", processed)
        .set("result", result.to_string())
        .set("processed_at", now())
        .execute(conn)
}

/// Newest first. Returns the page and the total count for the filter.
pub fn list_webhook_logs_paginated(
    conn: &Connection,
    source: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<WebhookLog>, i64)> {
    match source {
        Some(source) => {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM webhook_logs WHERE source = ?1",
                params![source],
                |row| row.get(0),
            )?;
            let items = query_all(
                conn,
                &format!(
                    "SELECT {} FROM webhook_logs WHERE source = ?1
                     ORDER BY received_at DESC, rowid DESC LIMIT ?2 OFFSET ?3",
                    WEBHOOK_LOG_COLS
                ),
                &[&source, &limit, &offset],
            )?;
            Ok((items, total))
        }
        None => {
            let total: i64 =
                conn.query_row("SELECT COUNT(*) FROM webhook_logs", [], |row| row.get(0))?;
            let items = query_all(
                conn,
                &format!(
                    "SELECT {} FROM webhook_logs
                     ORDER BY received_at DESC, rowid DESC LIMIT ?1 OFFSET ?2",
                    WEBHOOK_LOG_COLS
                ),
                &[&limit, &offset],
            )?;
            Ok((items, total))
        }
    }
}
