//! Finding the project a confirmed payment belongs to.

use rusqlite::Connection;

use crate::db::queries;
use crate::error::Result;
use crate::models::{Payment, Project};

use super::ConfirmedPayment;

/// How many unpaid premium projects the heuristic looks at.
const HEURISTIC_CANDIDATES: i64 = 5;

/// Which lookup found the project. Logged so low-confidence matches stand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedBy {
    ProjectId,
    OwnerSlug,
    CheckoutSession,
    LinkedPayment,
    RecentUnpaidPremium,
}

/// Run the lookups in order of confidence and return the first match.
pub fn resolve_project(
    conn: &Connection,
    payment: &ConfirmedPayment,
    existing: Option<&Payment>,
) -> Result<Option<(Project, ResolvedBy)>> {
    let meta = &payment.metadata;
    let user_id = meta.user_id.as_deref();

    if let Some(ref project_id) = meta.project_id {
        if let Some(project) = queries::get_project_by_id(conn, project_id)? {
            return Ok(Some((project, ResolvedBy::ProjectId)));
        }
    }

    if let (Some(slug), Some(user_id)) = (meta.project_slug.as_deref(), user_id) {
        if let Some(project) = queries::get_project_by_slug_for_owner(conn, slug, user_id)? {
            return Ok(Some((project, ResolvedBy::OwnerSlug)));
        }
    }

    if let Some(ref session_id) = payment.checkout_session_id {
        if let Some(user_id) = user_id {
            if let Some(project) =
                queries::get_project_by_checkout_session(conn, session_id, Some(user_id))?
            {
                return Ok(Some((project, ResolvedBy::CheckoutSession)));
            }
        }
        if let Some(project) = queries::get_project_by_checkout_session(conn, session_id, None)? {
            return Ok(Some((project, ResolvedBy::CheckoutSession)));
        }
    }

    // A payment we already recorded and linked names its project outright
    if let Some(app_id) = existing.and_then(|p| p.app_id.as_deref()) {
        if let Some(project) = queries::get_project_by_id(conn, app_id)? {
            return Ok(Some((project, ResolvedBy::LinkedPayment)));
        }
    }

    if let Some(user_id) = user_id {
        let candidates = queries::list_unpaid_premium_projects(conn, user_id, HEURISTIC_CANDIDATES)?;
        if let Some(project) = pick_candidate(candidates, payment) {
            tracing::warn!(
                "Resolved payment {} to project {} by recent unpaid premium heuristic (low confidence)",
                payment.reference,
                project.id
            );
            return Ok(Some((project, ResolvedBy::RecentUnpaidPremium)));
        }
    }

    Ok(None)
}

/// Exact session match, then payment intent stored as the session id, then the
/// most recent candidate.
fn pick_candidate(candidates: Vec<Project>, payment: &ConfirmedPayment) -> Option<Project> {
    let session_match = |p: &Project, id: Option<&str>| {
        id.is_some() && p.checkout_session_id.as_deref() == id
    };

    if let Some(pos) = candidates
        .iter()
        .position(|p| session_match(p, payment.checkout_session_id.as_deref()))
    {
        return candidates.into_iter().nth(pos);
    }
    if let Some(pos) = candidates
        .iter()
        .position(|p| session_match(p, payment.payment_intent_id.as_deref()))
    {
        return candidates.into_iter().nth(pos);
    }
    candidates.into_iter().next()
}
