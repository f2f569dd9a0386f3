//! Linking payments that arrived before their project.
//!
//! Payment confirmation and project creation may happen in either order. When
//! the payment wins, it is stored without a project. This pass completes the
//! join once the project exists.

use rusqlite::Connection;

use crate::db::queries;
use crate::error::Result;
use crate::models::{Payment, Project};
use crate::notifications::Notifier;
use crate::payments::StripeMetadata;

use super::{ConfirmedPayment, confirm};

/// Returns how many orphan payments of `user_id` were linked.
pub fn link_orphan_payments(conn: &Connection, user_id: &str, notifier: &Notifier) -> Result<usize> {
    let mut linked = 0;

    for payment in queries::list_orphan_payments(conn, user_id)? {
        let Some(project) = find_project(conn, &payment, user_id)? else {
            tracing::debug!("Orphan payment {} still has no project", payment.id);
            continue;
        };

        let confirmed = confirmed_from_record(&payment);
        let outcome =
            confirm::apply_confirmed_payment(conn, &project, &confirmed, Some(&payment), notifier)?;
        tracing::info!(
            "Orphan payment {} linked to project {} ({})",
            payment.id,
            project.id,
            outcome
        );
        linked += 1;
    }

    Ok(linked)
}

fn find_project(conn: &Connection, payment: &Payment, user_id: &str) -> Result<Option<Project>> {
    let meta = &payment.metadata;

    if let Some(ref project_id) = meta.project_id {
        if let Some(project) = queries::get_project_by_id(conn, project_id)? {
            if project.submitted_by == user_id {
                return Ok(Some(project));
            }
        }
    }
    if let Some(ref slug) = meta.project_slug {
        if let Some(project) = queries::get_project_by_slug_for_owner(conn, slug, user_id)? {
            return Ok(Some(project));
        }
    }
    if let Some(ref session_id) = payment.invoice_id {
        if let Some(project) =
            queries::get_project_by_checkout_session(conn, session_id, Some(user_id))?
        {
            return Ok(Some(project));
        }
    }
    Ok(None)
}

/// Rebuild the confirmed payment from what was stored with the orphan.
fn confirmed_from_record(payment: &Payment) -> ConfirmedPayment {
    let metadata: StripeMetadata =
        serde_json::from_value(payment.metadata.raw_metadata.clone()).unwrap_or_default();

    ConfirmedPayment {
        reference: payment.payment_id.clone(),
        checkout_session_id: payment.invoice_id.clone(),
        payment_intent_id: payment.metadata.payment_intent_id.clone(),
        plan: payment.plan,
        metadata,
        amount: payment.amount,
        currency: payment.currency.clone(),
        customer_email: payment.metadata.customer_email.clone(),
        live_mode: payment.metadata.live_mode,
        paid_at: payment.paid_at,
        source: "orphan_link",
    }
}
