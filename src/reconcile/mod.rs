//! Payment reconciliation engine.
//!
//! Takes one verified gateway event at a time, finds the project it belongs
//! to and moves that project (and its payment record) to the matching state.
//! Every transition is safe to replay: gateway retries land on the same state.

mod confirm;
mod entitlements;
mod orphans;
mod resolve;

pub use confirm::ConfirmedPayment;
pub use resolve::ResolvedBy;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::db::{AppState, DbPool, queries};
use crate::error::Result;
use crate::notifications::Notifier;
use crate::payments::{Charge, CheckoutSession, Dispute, PaymentIntent};

/// Event types, as the gateway names them.
pub mod event_type {
    pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";
    pub const ASYNC_PAYMENT_SUCCEEDED: &str = "checkout.session.async_payment_succeeded";
    pub const ASYNC_PAYMENT_FAILED: &str = "checkout.session.async_payment_failed";
    pub const PAYMENT_INTENT_SUCCEEDED: &str = "payment_intent.succeeded";
    pub const PAYMENT_INTENT_FAILED: &str = "payment_intent.payment_failed";
    pub const CHARGE_REFUNDED: &str = "charge.refunded";
    pub const DISPUTE_CREATED: &str = "charge.dispute.created";
}

/// Reason recorded when a checkout's delayed payment method fails.
const ASYNC_FAILURE_REASON: &str = "Async payment failed";
/// Reason recorded when the gateway gives none.
const DEFAULT_FAILURE_REASON: &str = "Payment failed";

/// The payment events we act on. Anything else is `Ignored`.
#[derive(Debug, Clone)]
pub enum PaymentEvent {
    CheckoutCompleted(CheckoutSession),
    AsyncPaymentSucceeded(CheckoutSession),
    AsyncPaymentFailed(CheckoutSession),
    PaymentIntentSucceeded(PaymentIntent),
    PaymentIntentFailed(PaymentIntent),
    ChargeRefunded(Charge),
    DisputeCreated(Dispute),
    Ignored { event_type: String },
}

impl PaymentEvent {
    /// Route the event to the handler method for its kind.
    pub async fn dispatch<H: PaymentEventHandler + ?Sized>(
        self,
        handler: &H,
    ) -> Result<ReconcileOutcome> {
        match self {
            PaymentEvent::CheckoutCompleted(session) => handler.checkout_completed(session).await,
            PaymentEvent::AsyncPaymentSucceeded(session) => {
                handler.async_payment_succeeded(session).await
            }
            PaymentEvent::AsyncPaymentFailed(session) => handler.async_payment_failed(session).await,
            PaymentEvent::PaymentIntentSucceeded(intent) => {
                handler.payment_intent_succeeded(intent).await
            }
            PaymentEvent::PaymentIntentFailed(intent) => handler.payment_intent_failed(intent).await,
            PaymentEvent::ChargeRefunded(charge) => handler.charge_refunded(charge).await,
            PaymentEvent::DisputeCreated(dispute) => handler.dispute_created(dispute).await,
            PaymentEvent::Ignored { event_type } => {
                tracing::debug!("Ignoring Stripe event type {}", event_type);
                Ok(ReconcileOutcome::Ignored { event_type })
            }
        }
    }
}

/// One method per handled event kind.
#[async_trait]
pub trait PaymentEventHandler: Send + Sync {
    async fn checkout_completed(&self, session: CheckoutSession) -> Result<ReconcileOutcome>;
    async fn async_payment_succeeded(&self, session: CheckoutSession) -> Result<ReconcileOutcome>;
    async fn async_payment_failed(&self, session: CheckoutSession) -> Result<ReconcileOutcome>;
    async fn payment_intent_succeeded(&self, intent: PaymentIntent) -> Result<ReconcileOutcome>;
    async fn payment_intent_failed(&self, intent: PaymentIntent) -> Result<ReconcileOutcome>;
    async fn charge_refunded(&self, charge: Charge) -> Result<ReconcileOutcome>;
    async fn dispute_created(&self, dispute: Dispute) -> Result<ReconcileOutcome>;
}

/// What processing an event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Payment newly applied to the project.
    Applied { project_id: String },
    /// Payment was recorded before but the project was left half-updated.
    Recovered { project_id: String },
    /// Replay of a payment that is already fully applied.
    AlreadyProcessed { project_id: String },
    /// No project yet. The payment waits for a linking pass.
    Orphaned { payment_id: String },
    /// Checkout finished without being paid.
    NotPaid { session_id: String },
    /// Refund or dispute reverted the project's plan.
    Reverted { project_id: String },
    FailureRecorded { project_id: String },
    /// Nothing in our records matches the event.
    NotFound { reference: String },
    Ignored { event_type: String },
}

impl fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied { project_id } => write!(f, "applied:{}", project_id),
            Self::Recovered { project_id } => write!(f, "recovered:{}", project_id),
            Self::AlreadyProcessed { project_id } => write!(f, "already_processed:{}", project_id),
            Self::Orphaned { payment_id } => write!(f, "orphaned:{}", payment_id),
            Self::NotPaid { session_id } => write!(f, "not_paid:{}", session_id),
            Self::Reverted { project_id } => write!(f, "reverted:{}", project_id),
            Self::FailureRecorded { project_id } => write!(f, "failure_recorded:{}", project_id),
            Self::NotFound { reference } => write!(f, "not_found:{}", reference),
            Self::Ignored { event_type } => write!(f, "ignored:{}", event_type),
        }
    }
}

/// The engine. Built per request from injected dependencies.
#[derive(Clone)]
pub struct Reconciler {
    db: DbPool,
    notifier: Notifier,
    retry_delay: Duration,
}

impl Reconciler {
    pub fn new(db: DbPool, notifier: Notifier, retry_delay: Duration) -> Self {
        Self {
            db,
            notifier,
            retry_delay,
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(
            state.db.clone(),
            state.notifier.clone(),
            state.reconcile_retry_delay,
        )
    }

    /// Resolve, apply and record one confirmed payment.
    pub async fn confirm_payment(&self, payment: ConfirmedPayment) -> Result<ReconcileOutcome> {
        let (existing, resolved) = {
            let conn = self.db.get()?;
            let existing = queries::get_completed_payment(&conn, &payment.reference)?;
            let resolved = resolve::resolve_project(&conn, &payment, existing.as_ref())?;
            (existing, resolved)
        };

        let project = match resolved {
            Some((project, by)) => {
                tracing::debug!(
                    "Payment {} resolved to project {} via {:?}",
                    payment.reference,
                    project.id,
                    by
                );
                Some(project)
            }
            None => self.retry_project_lookup(&payment).await?,
        };

        let conn = self.db.get()?;
        match project {
            Some(project) => confirm::apply_confirmed_payment(
                &conn,
                &project,
                &payment,
                existing.as_ref(),
                &self.notifier,
            ),
            None => confirm::record_orphan(&conn, &payment, existing.as_ref()),
        }
    }

    /// The project row may still be in flight when the webhook arrives. Look
    /// again once, after a short delay, if the metadata named it.
    async fn retry_project_lookup(
        &self,
        payment: &ConfirmedPayment,
    ) -> Result<Option<crate::models::Project>> {
        let Some(project_id) = payment.metadata.project_id.as_deref() else {
            return Ok(None);
        };
        if self.retry_delay.is_zero() {
            return Ok(None);
        }
        tracing::info!(
            "Project {} not found for payment {}, retrying in {:?}",
            project_id,
            payment.reference,
            self.retry_delay
        );
        tokio::time::sleep(self.retry_delay).await;
        let conn = self.db.get()?;
        queries::get_project_by_id(&conn, project_id)
    }

    async fn confirm_checkout(
        &self,
        session: CheckoutSession,
        source: &'static str,
    ) -> Result<ReconcileOutcome> {
        if !session.is_paid() {
            tracing::info!(
                "Checkout session {} completed with payment_status={}, waiting for payment",
                session.id,
                session.payment_status
            );
            return Ok(ReconcileOutcome::NotPaid {
                session_id: session.id,
            });
        }
        let payment = ConfirmedPayment::from_checkout(&session, source, Utc::now().timestamp());
        self.confirm_payment(payment).await
    }

    /// Link a user's orphan payments to projects that exist now.
    pub async fn link_orphan_payments(&self, user_id: &str) -> Result<usize> {
        let conn = self.db.get()?;
        orphans::link_orphan_payments(&conn, user_id, &self.notifier)
    }
}

#[async_trait]
impl PaymentEventHandler for Reconciler {
    async fn checkout_completed(&self, session: CheckoutSession) -> Result<ReconcileOutcome> {
        self.confirm_checkout(session, event_type::CHECKOUT_COMPLETED)
            .await
    }

    async fn async_payment_succeeded(&self, session: CheckoutSession) -> Result<ReconcileOutcome> {
        self.confirm_checkout(session, event_type::ASYNC_PAYMENT_SUCCEEDED)
            .await
    }

    async fn async_payment_failed(&self, session: CheckoutSession) -> Result<ReconcileOutcome> {
        tracing::warn!("Async payment failed for checkout session {}", session.id);
        let conn = self.db.get()?;
        let project = match queries::get_project_by_checkout_session(&conn, &session.id, None)? {
            Some(project) => Some(project),
            None => match session.metadata.project_id.as_deref() {
                Some(project_id) => queries::get_project_by_id(&conn, project_id)?,
                None => None,
            },
        };
        let Some(project) = project else {
            return Ok(ReconcileOutcome::NotFound {
                reference: session.id,
            });
        };

        let update =
            entitlements::checkout_failure_update(ASYNC_FAILURE_REASON, Utc::now().timestamp());
        queries::update_project(&conn, &project.id, &update)?;
        tracing::info!("Recorded async payment failure on project {}", project.id);
        Ok(ReconcileOutcome::FailureRecorded {
            project_id: project.id,
        })
    }

    async fn payment_intent_succeeded(&self, intent: PaymentIntent) -> Result<ReconcileOutcome> {
        let payment =
            ConfirmedPayment::from_payment_intent(&intent, event_type::PAYMENT_INTENT_SUCCEEDED);
        self.confirm_payment(payment).await
    }

    async fn payment_intent_failed(&self, intent: PaymentIntent) -> Result<ReconcileOutcome> {
        let reason = intent
            .last_payment_error
            .as_ref()
            .and_then(|e| e.message.clone())
            .unwrap_or_else(|| DEFAULT_FAILURE_REASON.to_string());
        tracing::warn!("Payment intent {} failed: {}", intent.id, reason);

        let conn = self.db.get()?;
        let project = match queries::get_project_by_order_id(&conn, &intent.id)? {
            Some(project) => Some(project),
            None => queries::get_project_by_checkout_session(&conn, &intent.id, None)?,
        };
        let Some(project) = project else {
            return Ok(ReconcileOutcome::NotFound {
                reference: intent.id,
            });
        };

        let update = entitlements::payment_intent_failure_update(&reason, Utc::now().timestamp());
        queries::update_project(&conn, &project.id, &update)?;
        tracing::info!("Recorded payment failure on project {}", project.id);
        Ok(ReconcileOutcome::FailureRecorded {
            project_id: project.id,
        })
    }

    async fn charge_refunded(&self, charge: Charge) -> Result<ReconcileOutcome> {
        let conn = self.db.get()?;
        let now = Utc::now().timestamp();

        // Payments are keyed by intent, older ones by charge
        let mut references = Vec::with_capacity(2);
        if let Some(ref intent) = charge.payment_intent {
            references.push(intent.as_str());
        }
        references.push(charge.id.as_str());

        let mut marked = false;
        for reference in &references {
            if queries::mark_payment_refunded(&conn, reference, now)? {
                marked = true;
                break;
            }
        }

        let mut project = None;
        for reference in &references {
            project = queries::get_project_by_order_id(&conn, reference)?;
            if project.is_some() {
                break;
            }
        }

        let Some(project) = project else {
            tracing::warn!(
                "Refund for charge {} matches no project (payment marked: {})",
                charge.id,
                marked
            );
            return Ok(ReconcileOutcome::NotFound {
                reference: references[0].to_string(),
            });
        };

        queries::update_project(&conn, &project.id, &entitlements::refund_update())?;
        tracing::info!(
            "Refund for charge {} ({} of {} {} refunded) reverted project {} to standard",
            charge.id,
            charge.amount_refunded,
            charge.amount,
            charge.currency,
            project.id
        );
        Ok(ReconcileOutcome::Reverted {
            project_id: project.id,
        })
    }

    async fn dispute_created(&self, dispute: Dispute) -> Result<ReconcileOutcome> {
        let conn = self.db.get()?;
        let now = Utc::now().timestamp();

        let payment = match queries::get_completed_payment(&conn, &dispute.charge)? {
            Some(payment) => Some(payment),
            None => match dispute.payment_intent.as_deref() {
                Some(intent) => queries::get_completed_payment(&conn, intent)?,
                None => None,
            },
        };
        let Some(payment) = payment else {
            tracing::warn!(
                "Dispute {} on charge {} matches no completed payment",
                dispute.id,
                dispute.charge
            );
            return Ok(ReconcileOutcome::NotFound {
                reference: dispute.charge,
            });
        };

        let project = match payment.app_id.as_deref() {
            Some(app_id) => queries::get_project_by_id(&conn, app_id)?,
            None => None,
        };
        if let Some(ref project) = project {
            queries::update_project(&conn, &project.id, &entitlements::dispute_update(&dispute, now))?;
            tracing::warn!(
                "Dispute {} (reason={:?}, status={:?}, {} {}) reverted project {}",
                dispute.id,
                dispute.reason,
                dispute.status,
                dispute.amount,
                dispute.currency,
                project.id
            );
        }

        queries::mark_payment_disputed(&conn, &payment.id, &dispute.id, now)?;

        match project {
            Some(project) => Ok(ReconcileOutcome::Reverted {
                project_id: project.id,
            }),
            None => {
                tracing::warn!(
                    "Dispute {} marked payment {} but it has no project",
                    dispute.id,
                    payment.id
                );
                Ok(ReconcileOutcome::NotFound {
                    reference: payment.payment_id,
                })
            }
        }
    }
}
