use axum::extract::State;
use chrono::Utc;
use serde::Serialize;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result, msg};
use crate::extractors::{CallerId, Json, Path};
use crate::models::Project;
use crate::payments::CheckoutRequest;
use crate::reconcile::Reconciler;
use crate::upgrade::{self, CancelResponse, UpgradeCheckout, UpgradeRequest};

#[derive(Debug, Serialize)]
pub struct ReconcileResponse {
    pub linked: usize,
}

/// Start a premium upgrade and hand back the hosted checkout.
pub async fn start_upgrade(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(slug): Path<String>,
    Json(input): Json<UpgradeRequest>,
) -> Result<Json<UpgradeCheckout>> {
    let stripe = state
        .stripe
        .as_ref()
        .ok_or_else(|| AppError::Internal(msg::STRIPE_NOT_CONFIGURED.into()))?;

    let project = {
        let conn = state.db.get()?;
        upgrade::prepare_upgrade(&conn, &user_id, &slug, &input.launch_week, Utc::now().timestamp())?
    };

    let success_url = format!(
        "{}/dashboard?payment=success&projectId={}&session_id={{CHECKOUT_SESSION_ID}}",
        state.base_url, project.id
    );
    let cancel_url = format!(
        "{}/dashboard?payment=cancelled&projectId={}",
        state.base_url, project.id
    );

    let (session_id, checkout_url) = stripe
        .create_checkout_session(&CheckoutRequest {
            project_id: &project.id,
            project_slug: &project.slug,
            user_id: &user_id,
            plan: project.plan,
            success_url: &success_url,
            cancel_url: &cancel_url,
        })
        .await?;

    let conn = state.db.get()?;
    upgrade::record_checkout_session(&conn, &project.id, &session_id)?;

    tracing::info!(
        "Checkout session {} created for project {}",
        session_id,
        project.id
    );

    Ok(Json(UpgradeCheckout {
        checkout_url,
        session_id,
    }))
}

pub async fn cancel_upgrade(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(slug): Path<String>,
) -> Result<Json<CancelResponse>> {
    let conn = state.db.get()?;
    let restored = upgrade::cancel_upgrade(&conn, &user_id, &slug)?;
    Ok(Json(restored.into()))
}

/// Link the caller's orphan payments to projects that exist now.
pub async fn reconcile_payments(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
) -> Result<Json<ReconcileResponse>> {
    let linked = Reconciler::from_state(&state)
        .link_orphan_payments(&user_id)
        .await?;
    Ok(Json(ReconcileResponse { linked }))
}

/// Owner view of a project, mostly so the dashboard can poll payment state.
pub async fn get_project(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(slug): Path<String>,
) -> Result<Json<Project>> {
    let conn = state.db.get()?;
    let project = queries::get_project_by_slug_for_owner(&conn, &slug, &user_id)?
        .ok_or_else(|| AppError::NotFound(msg::PROJECT_NOT_FOUND.into()))?;
    Ok(Json(project))
}
