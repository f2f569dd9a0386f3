//! Applying a confirmed payment to its project.

use chrono::Utc;
use rusqlite::Connection;

use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::{CreatePayment, Payment, PaymentMetadata, Plan, Project};
use crate::notifications::{Notifier, PremiumPurchase};
use crate::payments::{CheckoutSession, PaymentIntent, StripeMetadata};

use super::{ReconcileOutcome, entitlements};

/// A successful payment, whichever event reported it.
#[derive(Debug, Clone)]
pub struct ConfirmedPayment {
    /// Gateway payment reference. Idempotency key and the project's `order_id`.
    pub reference: String,
    pub checkout_session_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub plan: Plan,
    pub metadata: StripeMetadata,
    pub amount: i64,
    pub currency: String,
    pub customer_email: Option<String>,
    pub live_mode: bool,
    pub paid_at: i64,
    /// Event type that reported the payment.
    pub source: &'static str,
}

impl ConfirmedPayment {
    pub fn from_checkout(session: &CheckoutSession, source: &'static str, now: i64) -> Self {
        Self {
            reference: session
                .payment_intent
                .clone()
                .unwrap_or_else(|| session.id.clone()),
            checkout_session_id: Some(session.id.clone()),
            payment_intent_id: session.payment_intent.clone(),
            plan: plan_from_metadata(&session.metadata),
            metadata: session.metadata.clone(),
            amount: session.amount_total.unwrap_or(0),
            currency: session.currency.clone().unwrap_or_else(|| "usd".to_string()),
            customer_email: session.buyer_email().map(str::to_string),
            live_mode: session.livemode,
            paid_at: now,
            source,
        }
    }

    pub fn from_payment_intent(intent: &PaymentIntent, source: &'static str) -> Self {
        Self {
            reference: intent.id.clone(),
            checkout_session_id: None,
            payment_intent_id: Some(intent.id.clone()),
            plan: plan_from_metadata(&intent.metadata),
            metadata: intent.metadata.clone(),
            amount: intent.amount,
            currency: intent.currency.clone(),
            customer_email: intent.receipt_email.clone(),
            live_mode: intent.livemode,
            paid_at: intent.created,
            source,
        }
    }

    fn payment_metadata(&self, project: Option<&Project>) -> PaymentMetadata {
        PaymentMetadata {
            provider: "stripe".to_string(),
            processed_by: Some(self.source.to_string()),
            checkout_session_id: self.checkout_session_id.clone(),
            payment_intent_id: self.payment_intent_id.clone(),
            customer_email: self.customer_email.clone(),
            project_id: project
                .map(|p| p.id.clone())
                .or_else(|| self.metadata.project_id.clone()),
            project_slug: project
                .map(|p| p.slug.clone())
                .or_else(|| self.metadata.project_slug.clone()),
            live_mode: self.live_mode,
            raw_metadata: serde_json::to_value(&self.metadata).unwrap_or_default(),
        }
    }

    fn new_payment(&self, project: Option<&Project>) -> CreatePayment {
        CreatePayment {
            user_id: self
                .metadata
                .user_id
                .clone()
                .or_else(|| project.map(|p| p.submitted_by.clone())),
            app_id: project.map(|p| p.id.clone()),
            plan: self.plan,
            amount: self.amount,
            currency: self.currency.clone(),
            payment_id: self.reference.clone(),
            invoice_id: self.checkout_session_id.clone(),
            metadata: self.payment_metadata(project),
            paid_at: self.paid_at,
        }
    }
}

/// Checkouts are only ever created for premium, so an absent plan means premium.
fn plan_from_metadata(metadata: &StripeMetadata) -> Plan {
    match metadata.plan_type.as_deref() {
        None => Plan::Premium,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Unknown planType '{}' in payment metadata, treating as premium", raw);
            Plan::Premium
        }),
    }
}

/// Record a payment no project could be found for. A later linking pass picks it up.
pub fn record_orphan(
    conn: &Connection,
    payment: &ConfirmedPayment,
    existing: Option<&Payment>,
) -> Result<ReconcileOutcome> {
    if let Some(existing) = existing {
        tracing::info!(
            "Payment {} already recorded as orphan {}, nothing to do",
            payment.reference,
            existing.id
        );
        return Ok(ReconcileOutcome::Orphaned {
            payment_id: existing.id.clone(),
        });
    }

    tracing::warn!(
        "No project found for payment {} (user={:?}, project={:?}, session={:?}), storing orphan payment",
        payment.reference,
        payment.metadata.user_id,
        payment.metadata.project_id,
        payment.checkout_session_id
    );

    match queries::create_payment(conn, &payment.new_payment(None))? {
        Some(created) => Ok(ReconcileOutcome::Orphaned {
            payment_id: created.id,
        }),
        // Lost a race with a concurrent delivery of the same payment
        None => {
            let existing = queries::get_completed_payment(conn, &payment.reference)?
                .ok_or_else(|| AppError::Internal("Payment insert ignored but not found".into()))?;
            Ok(ReconcileOutcome::Orphaned {
                payment_id: existing.id,
            })
        }
    }
}

/// Bring `project` to the fully processed state for `payment` and make sure a
/// completed payment record exists and is linked to it.
pub fn apply_confirmed_payment(
    conn: &Connection,
    project: &Project,
    payment: &ConfirmedPayment,
    existing: Option<&Payment>,
    notifier: &Notifier,
) -> Result<ReconcileOutcome> {
    let reference = payment.reference.as_str();
    let already_paid = project.payment_status && project.order_id.as_deref() == Some(reference);

    if let Some(existing) = existing {
        let perks_intact = !(payment.plan.is_premium() && project.missing_premium_perks());
        if already_paid && project.is_fully_processed() && perks_intact {
            link_if_orphan(conn, existing, &project.id)?;
            tracing::info!(
                "Payment {} already applied to project {}, skipping",
                reference,
                project.id
            );
            return Ok(ReconcileOutcome::AlreadyProcessed {
                project_id: project.id.clone(),
            });
        }
        tracing::warn!(
            "Payment {} recorded but project {} not fully processed, re-applying",
            reference,
            project.id
        );
    }

    let now = Utc::now().timestamp();
    let update =
        entitlements::confirmed_payment_update(project, payment.plan, reference, payment.paid_at, now);
    if queries::update_project(conn, &project.id, &update)?.is_empty() {
        return Err(AppError::Internal(format!(
            "Project {} disappeared while applying payment {}",
            project.id, reference
        )));
    }

    let updated = queries::get_project_by_id(conn, &project.id)?.ok_or_else(|| {
        AppError::Internal(format!("Project {} disappeared after update", project.id))
    })?;

    if payment.plan.is_premium() && updated.missing_premium_perks() {
        tracing::warn!(
            "Premium perks missing on project {} after update, writing them again",
            updated.id
        );
        queries::update_project(
            conn,
            &updated.id,
            &entitlements::premium_perks_repair(&updated, now),
        )?;
    }

    let newly_confirmed = !already_paid;

    if payment.plan.is_premium() && newly_confirmed {
        if let Some(ref competition_id) = updated.weekly_competition_id {
            match queries::increment_premium_submissions(conn, competition_id) {
                Ok(true) => {}
                Ok(false) => tracing::warn!(
                    "Competition {} not found, submission counters not updated",
                    competition_id
                ),
                Err(e) => tracing::error!(
                    "Failed to update competition {} counters for payment {}: {}",
                    competition_id,
                    reference,
                    e
                ),
            }
        }
    }

    match existing {
        Some(existing) => link_if_orphan(conn, existing, &updated.id)?,
        None => {
            if queries::create_payment(conn, &payment.new_payment(Some(&updated)))?.is_none() {
                tracing::warn!(
                    "Completed payment {} was recorded concurrently, not inserting again",
                    reference
                );
            }
        }
    }

    if payment.plan.is_premium() && newly_confirmed {
        notifier.spawn_premium_purchase(PremiumPurchase {
            project_name: updated.name.clone(),
            customer_email: payment.customer_email.clone(),
            amount: payment.amount,
            currency: payment.currency.clone(),
        });
    }

    tracing::info!(
        "Payment {} applied to project {} (plan={}, source={})",
        reference,
        updated.id,
        payment.plan.as_ref(),
        payment.source
    );

    if existing.is_some() {
        Ok(ReconcileOutcome::Recovered {
            project_id: updated.id,
        })
    } else {
        Ok(ReconcileOutcome::Applied {
            project_id: updated.id,
        })
    }
}

fn link_if_orphan(conn: &Connection, payment: &Payment, project_id: &str) -> Result<()> {
    if payment.app_id.is_none() && queries::link_payment_to_project(conn, &payment.id, project_id)? {
        tracing::info!("Linked payment {} to project {}", payment.id, project_id);
    }
    Ok(())
}
