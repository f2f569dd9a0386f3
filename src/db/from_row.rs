//! Row mapping trait and helpers for reducing boilerplate in queries.
//!
//! Models implement `FromRow` to define how they are built from a row selected
//! with the matching `*_COLS` constant.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to rusqlite errors.
///
/// Invalid enum text surfaces as a query error instead of a panic.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const PROJECT_COLS: &str = "id, slug, name, submitted_by, plan, plan_price, is_draft, payment_status, order_id, payment_date, checkout_session_id, payment_initiated_at, premium_badge, skip_queue, social_promotion, guaranteed_backlinks, homepage_duration, link_type, dofollow_status, dofollow_reason, dofollow_awarded_at, launch_week, launch_date, weekly_competition_id, launch_month, pending_launch_week, pending_launch_date, pending_weekly_competition_id, pending_launch_month, original_launch_week, original_launch_date, original_weekly_competition_id, original_launch_month, scheduled_launch, status, chargeback_dispute_id, chargeback_reason, chargeback_created_at, payment_failed_at, payment_failure_reason, created_at, updated_at";

pub const PAYMENT_COLS: &str = "id, user_id, app_id, plan, amount, currency, payment_id, invoice_id, status, metadata, paid_at, refunded_at, disputed_at, dispute_id, created_at";

pub const COMPETITION_COLS: &str = "id, competition_id, kind, start_date, end_date, total_submissions, premium_submissions, created_at, updated_at";

pub const WEBHOOK_LOG_COLS: &str =
    "id, source, event_id, event_type, signature, body, received_at, processed, result, processed_at";

// ============ FromRow Implementations ============

impl FromRow for Project {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Project {
            id: row.get(0)?,
            slug: row.get(1)?,
            name: row.get(2)?,
            submitted_by: row.get(3)?,
            plan: parse_enum(row, 4, "plan")?,
            plan_price: row.get(5)?,
            is_draft: row.get::<_, i32>(6)? != 0,
            payment_status: row.get::<_, i32>(7)? != 0,
            order_id: row.get(8)?,
            payment_date: row.get(9)?,
            checkout_session_id: row.get(10)?,
            payment_initiated_at: row.get(11)?,
            premium_badge: row.get(12)?,
            skip_queue: row.get(13)?,
            social_promotion: row.get(14)?,
            guaranteed_backlinks: row.get(15)?,
            homepage_duration: row.get(16)?,
            link_type: parse_enum(row, 17, "link_type")?,
            dofollow_status: row.get::<_, i32>(18)? != 0,
            dofollow_reason: row.get(19)?,
            dofollow_awarded_at: row.get(20)?,
            launch_week: row.get(21)?,
            launch_date: row.get(22)?,
            weekly_competition_id: row.get(23)?,
            launch_month: row.get(24)?,
            pending_launch_week: row.get(25)?,
            pending_launch_date: row.get(26)?,
            pending_weekly_competition_id: row.get(27)?,
            pending_launch_month: row.get(28)?,
            original_launch_week: row.get(29)?,
            original_launch_date: row.get(30)?,
            original_weekly_competition_id: row.get(31)?,
            original_launch_month: row.get(32)?,
            scheduled_launch: row.get::<_, i32>(33)? != 0,
            status: row.get(34)?,
            chargeback_dispute_id: row.get(35)?,
            chargeback_reason: row.get(36)?,
            chargeback_created_at: row.get(37)?,
            payment_failed_at: row.get(38)?,
            payment_failure_reason: row.get(39)?,
            created_at: row.get(40)?,
            updated_at: row.get(41)?,
        })
    }
}

impl FromRow for Payment {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let metadata_str: String = row.get(9)?;
        let metadata = serde_json::from_str(&metadata_str).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(Payment {
            id: row.get(0)?,
            user_id: row.get(1)?,
            app_id: row.get(2)?,
            plan: parse_enum(row, 3, "plan")?,
            amount: row.get(4)?,
            currency: row.get(5)?,
            payment_id: row.get(6)?,
            invoice_id: row.get(7)?,
            status: parse_enum(row, 8, "status")?,
            metadata,
            paid_at: row.get(10)?,
            refunded_at: row.get(11)?,
            disputed_at: row.get(12)?,
            dispute_id: row.get(13)?,
            created_at: row.get(14)?,
        })
    }
}

impl FromRow for Competition {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Competition {
            id: row.get(0)?,
            competition_id: row.get(1)?,
            kind: parse_enum(row, 2, "kind")?,
            start_date: row.get(3)?,
            end_date: row.get(4)?,
            total_submissions: row.get(5)?,
            premium_submissions: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}

impl FromRow for WebhookLog {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(WebhookLog {
            id: row.get(0)?,
            source: row.get(1)?,
            event_id: row.get(2)?,
            event_type: row.get(3)?,
            signature: row.get(4)?,
            body: row.get(5)?,
            received_at: row.get(6)?,
            processed: row.get::<_, i32>(7)? != 0,
            result: row.get(8)?,
            processed_at: row.get(9)?,
        })
    }
}
