//! Premium upgrade of an existing standard listing.
//!
//! Starting an upgrade writes the premium fields and a shadow launch slot for
//! the chosen week, keeps the current slot in the `original_*` fields and
//! leaves the project an unpaid draft. The webhook promotes the shadow slot
//! once payment lands; cancelling puts the original slot back.

use chrono::DateTime;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::error::{AppError, OptionExt, Result, msg};
use crate::models::{CompetitionKind, LaunchSlot, Plan, Project, ProjectUpdate};

#[derive(Debug, Deserialize)]
pub struct UpgradeRequest {
    /// Week key of the target weekly competition, e.g. `2025-W10`.
    pub launch_week: String,
}

#[derive(Debug, Serialize)]
pub struct UpgradeCheckout {
    pub checkout_url: String,
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub success: bool,
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<Project>,
}

impl From<Option<Project>> for CancelResponse {
    fn from(project: Option<Project>) -> Self {
        let message = match project {
            Some(_) => msg::ORIGINAL_SCHEDULE_RESTORED,
            None => msg::NO_PENDING_UPGRADE,
        };
        Self {
            success: true,
            message,
            project,
        }
    }
}

fn month_of(timestamp: i64) -> Option<String> {
    DateTime::from_timestamp(timestamp, 0).map(|d| d.format("%Y-%m").to_string())
}

/// Validate the upgrade and write the premium draft state. The checkout
/// session is created by the caller afterwards.
pub fn prepare_upgrade(
    conn: &Connection,
    user_id: &str,
    slug: &str,
    launch_week: &str,
    now: i64,
) -> Result<Project> {
    let project = queries::get_project_by_slug_for_owner(conn, slug, user_id)?
        .or_not_found(msg::PROJECT_NOT_FOUND)?;

    if project.plan.is_premium() || project.payment_status {
        return Err(AppError::BadRequest(msg::ALREADY_PREMIUM.into()));
    }

    if let Some(ref current_id) = project.weekly_competition_id {
        if let Some(current) = queries::get_competition_by_id(conn, current_id)? {
            if current.has_started(now) {
                return Err(AppError::Forbidden(msg::UPGRADE_NOT_ALLOWED.into()));
            }
        }
    }

    let target = queries::get_competition_by_key(conn, launch_week, CompetitionKind::Weekly)?
        .ok_or_else(|| AppError::BadRequest(msg::INVALID_WEEK.into()))?;
    if target.has_started(now) {
        return Err(AppError::BadRequest(msg::WEEK_STARTED.into()));
    }
    if target.is_full() {
        return Err(AppError::BadRequest(msg::WEEK_FULL.into()));
    }

    let premium = Plan::Premium.details();

    let update = ProjectUpdate {
        plan: Some(Plan::Premium),
        plan_price: Some(Some(premium.price)),
        premium_badge: Some(Some(true)),
        skip_queue: Some(Some(true)),
        social_promotion: Some(Some(true)),
        guaranteed_backlinks: Some(Some(premium.guaranteed_backlinks)),
        homepage_duration: Some(Some(premium.homepage_duration)),
        pending_launch: Some(Some(LaunchSlot {
            week: Some(target.competition_id.clone()),
            date: Some(target.start_date),
            weekly_competition_id: Some(target.id.clone()),
            month: month_of(target.start_date),
        })),
        original_launch: Some(Some(project.launch_slot())),
        is_draft: Some(true),
        payment_status: Some(false),
        scheduled_launch: Some(false),
        payment_initiated_at: Some(Some(now)),
        ..Default::default()
    };
    queries::update_project(conn, &project.id, &update)?;

    tracing::info!(
        "Upgrade to premium started for project {} (week {})",
        project.id,
        launch_week
    );

    queries::get_project_by_id(conn, &project.id)?.or_not_found(msg::PROJECT_NOT_FOUND)
}

/// Remember the checkout session so the webhook can find the project by it.
pub fn record_checkout_session(conn: &Connection, project_id: &str, session_id: &str) -> Result<()> {
    let update = ProjectUpdate {
        checkout_session_id: Some(session_id.to_string()),
        ..Default::default()
    };
    queries::update_project(conn, project_id, &update)?;
    Ok(())
}

/// Abandon a pending upgrade and restore the original launch slot.
///
/// Returns `None` when there is nothing to restore. That is not an error: the
/// dashboard calls this whenever a checkout is abandoned.
pub fn cancel_upgrade(conn: &Connection, user_id: &str, slug: &str) -> Result<Option<Project>> {
    let project = queries::get_project_by_slug_for_owner(conn, slug, user_id)?
        .or_not_found(msg::PROJECT_NOT_FOUND)?;

    if !project.has_pending_upgrade() || project.original_launch_week.is_none() {
        tracing::debug!("No pending upgrade to cancel on project {}", project.id);
        return Ok(None);
    }

    let update = ProjectUpdate {
        launch: Some(project.original_launch_slot()),
        pending_launch: Some(None),
        original_launch: Some(None),
        plan: Some(Plan::Standard),
        plan_price: Some(None),
        premium_badge: Some(None),
        skip_queue: Some(None),
        social_promotion: Some(None),
        guaranteed_backlinks: Some(None),
        homepage_duration: Some(None),
        payment_initiated_at: Some(None),
        is_draft: Some(false),
        payment_status: Some(false),
        ..Default::default()
    };
    queries::update_project(conn, &project.id, &update)?;

    tracing::info!("Upgrade cancelled for project {}", project.id);

    queries::get_project_by_id(conn, &project.id)
}
