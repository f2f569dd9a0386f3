//! Project updates for each payment transition.
//!
//! Every function here is pure: it looks at the current project and returns
//! the single `ProjectUpdate` that moves it to the next state.

use crate::models::{
    Chargeback, DOFOLLOW_REASON_PREMIUM, LinkType, PaymentFailure, Plan, Project, ProjectUpdate,
    STATUS_PENDING,
};
use crate::payments::Dispute;

/// Update applied when a payment for `plan` is confirmed.
///
/// Re-applying it is harmless: `payment_date` and `dofollow_awarded_at` keep
/// their first value, everything else converges to the same state.
pub fn confirmed_payment_update(
    project: &Project,
    plan: Plan,
    reference: &str,
    paid_at: i64,
    now: i64,
) -> ProjectUpdate {
    let mut update = ProjectUpdate {
        plan: Some(plan),
        payment_status: Some(true),
        order_id: Some(reference.to_string()),
        scheduled_launch: Some(true),
        status: Some(STATUS_PENDING.to_string()),
        is_draft: Some(false),
        payment_date: project.payment_date.is_none().then_some(paid_at),
        ..Default::default()
    };

    // A pending upgrade becomes the real launch slot and the shadow set goes away
    if let Some(slot) = project.pending_launch_slot() {
        update.launch = Some(slot);
        update.pending_launch = Some(None);
        update.original_launch = Some(None);
    }

    if plan.is_premium() {
        update.premium_badge = Some(Some(true));
        update.skip_queue = Some(Some(true));
        update.social_promotion = Some(Some(true));
        update.guaranteed_backlinks = Some(Some(
            project
                .guaranteed_backlinks
                .unwrap_or(Plan::Premium.details().guaranteed_backlinks),
        ));
        assert_dofollow(&mut update, project, now);
    }

    update
}

/// Corrective write for a premium project whose perks did not stick.
pub fn premium_perks_repair(project: &Project, now: i64) -> ProjectUpdate {
    let mut update = ProjectUpdate {
        premium_badge: Some(Some(true)),
        ..Default::default()
    };
    assert_dofollow(&mut update, project, now);
    update
}

fn assert_dofollow(update: &mut ProjectUpdate, project: &Project, now: i64) {
    update.link_type = Some(LinkType::Dofollow);
    update.dofollow_status = Some(true);
    update.dofollow_reason = Some(Some(DOFOLLOW_REASON_PREMIUM.to_string()));
    if project.dofollow_awarded_at.is_none() {
        update.dofollow_awarded_at = Some(Some(now));
    }
}

/// Refund: back to standard and unpaid. Link perks are left alone.
pub fn refund_update() -> ProjectUpdate {
    ProjectUpdate {
        plan: Some(Plan::Standard),
        payment_status: Some(false),
        premium_badge: Some(None),
        skip_queue: Some(None),
        ..Default::default()
    }
}

/// Dispute: full revert of the premium state plus chargeback markers.
pub fn dispute_update(dispute: &Dispute, now: i64) -> ProjectUpdate {
    ProjectUpdate {
        plan: Some(Plan::Standard),
        payment_status: Some(false),
        is_draft: Some(true),
        scheduled_launch: Some(false),
        link_type: Some(LinkType::Nofollow),
        dofollow_status: Some(false),
        premium_badge: Some(None),
        skip_queue: Some(None),
        social_promotion: Some(None),
        dofollow_reason: Some(None),
        dofollow_awarded_at: Some(None),
        chargeback: Some(Chargeback {
            dispute_id: dispute.id.clone(),
            reason: dispute.reason.clone(),
            created_at: now,
        }),
        ..Default::default()
    }
}

/// Failed checkout: only the failure markers. The pending upgrade stays so the
/// user can pay again.
pub fn checkout_failure_update(reason: &str, now: i64) -> ProjectUpdate {
    ProjectUpdate {
        payment_failure: Some(PaymentFailure {
            failed_at: now,
            reason: reason.to_string(),
        }),
        ..Default::default()
    }
}

/// Failed payment intent: failure markers and back to an unpaid draft.
pub fn payment_intent_failure_update(reason: &str, now: i64) -> ProjectUpdate {
    ProjectUpdate {
        payment_status: Some(false),
        is_draft: Some(true),
        scheduled_launch: Some(false),
        ..checkout_failure_update(reason, now)
    }
}
