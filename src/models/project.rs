use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

/// Listing plan. Only premium is paid.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Plan {
    #[default]
    Standard,
    Premium,
}

/// Static perks attached to each plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanDetails {
    pub price: i64,
    pub homepage_duration: i64,
    pub guaranteed_backlinks: i64,
}

impl Plan {
    pub fn details(&self) -> PlanDetails {
        match self {
            Plan::Standard => PlanDetails {
                price: 0,
                homepage_duration: 30,
                guaranteed_backlinks: 0,
            },
            Plan::Premium => PlanDetails {
                price: 15,
                homepage_duration: 7,
                guaranteed_backlinks: 3,
            },
        }
    }

    pub fn is_premium(&self) -> bool {
        matches!(self, Plan::Premium)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LinkType {
    Dofollow,
    #[default]
    Nofollow,
}

/// Reason recorded on projects whose dofollow link comes from a premium purchase.
pub const DOFOLLOW_REASON_PREMIUM: &str = "premium_plan";

/// Status given to a project once its payment has been confirmed.
pub const STATUS_PENDING: &str = "pending";

/// A submitted listing (the `apps` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub submitted_by: String,

    // Plan state
    pub plan: Plan,
    pub plan_price: Option<i64>,
    pub is_draft: bool,
    pub payment_status: bool,
    pub order_id: Option<String>,
    pub payment_date: Option<i64>,
    pub checkout_session_id: Option<String>,
    pub payment_initiated_at: Option<i64>,

    // Premium perks
    pub premium_badge: Option<bool>,
    pub skip_queue: Option<bool>,
    pub social_promotion: Option<bool>,
    pub guaranteed_backlinks: Option<i64>,
    pub homepage_duration: Option<i64>,
    pub link_type: LinkType,
    pub dofollow_status: bool,
    pub dofollow_reason: Option<String>,
    pub dofollow_awarded_at: Option<i64>,

    // Launch scheduling
    pub launch_week: Option<String>,
    pub launch_date: Option<i64>,
    pub weekly_competition_id: Option<String>,
    pub launch_month: Option<String>,

    // In-flight upgrade shadow set
    pub pending_launch_week: Option<String>,
    pub pending_launch_date: Option<i64>,
    pub pending_weekly_competition_id: Option<String>,
    pub pending_launch_month: Option<String>,
    pub original_launch_week: Option<String>,
    pub original_launch_date: Option<i64>,
    pub original_weekly_competition_id: Option<String>,
    pub original_launch_month: Option<String>,

    // Lifecycle
    pub scheduled_launch: bool,
    pub status: Option<String>,
    pub chargeback_dispute_id: Option<String>,
    pub chargeback_reason: Option<String>,
    pub chargeback_created_at: Option<i64>,
    pub payment_failed_at: Option<i64>,
    pub payment_failure_reason: Option<String>,

    pub created_at: i64,
    pub updated_at: i64,
}

impl Project {
    /// Whether the project has reached its terminal state for a confirmed payment.
    ///
    /// Premium projects additionally need the dofollow backlink in place.
    pub fn is_fully_processed(&self) -> bool {
        let base = self.payment_status && !self.is_draft;
        if !self.plan.is_premium() {
            return base;
        }
        base && self.link_type == LinkType::Dofollow && self.dofollow_status
    }

    /// Premium fields that a confirmed payment must have left in place.
    pub fn missing_premium_perks(&self) -> bool {
        self.link_type != LinkType::Dofollow
            || !self.dofollow_status
            || self.premium_badge != Some(true)
            || self.dofollow_reason.as_deref() != Some(DOFOLLOW_REASON_PREMIUM)
    }

    pub fn has_pending_upgrade(&self) -> bool {
        self.pending_launch_week.is_some()
    }

    pub fn launch_slot(&self) -> LaunchSlot {
        LaunchSlot {
            week: self.launch_week.clone(),
            date: self.launch_date,
            weekly_competition_id: self.weekly_competition_id.clone(),
            month: self.launch_month.clone(),
        }
    }

    pub fn pending_launch_slot(&self) -> Option<LaunchSlot> {
        self.pending_launch_week.as_ref().map(|week| LaunchSlot {
            week: Some(week.clone()),
            date: self.pending_launch_date,
            weekly_competition_id: self.pending_weekly_competition_id.clone(),
            month: self.pending_launch_month.clone(),
        })
    }

    pub fn original_launch_slot(&self) -> LaunchSlot {
        LaunchSlot {
            week: self.original_launch_week.clone(),
            date: self.original_launch_date,
            weekly_competition_id: self.original_weekly_competition_id.clone(),
            month: self.original_launch_month.clone(),
        }
    }
}

/// The four launch scheduling fields, written together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSlot {
    pub week: Option<String>,
    pub date: Option<i64>,
    pub weekly_competition_id: Option<String>,
    pub month: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chargeback {
    pub dispute_id: String,
    pub reason: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentFailure {
    pub failed_at: i64,
    pub reason: String,
}

/// Typed partial update of a project, applied as a single UPDATE statement.
///
/// `None` leaves a column untouched. For nullable columns `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct ProjectUpdate {
    pub plan: Option<Plan>,
    pub plan_price: Option<Option<i64>>,
    pub is_draft: Option<bool>,
    pub payment_status: Option<bool>,
    pub order_id: Option<String>,
    pub payment_date: Option<i64>,
    pub checkout_session_id: Option<String>,
    pub payment_initiated_at: Option<Option<i64>>,
    pub scheduled_launch: Option<bool>,
    pub status: Option<String>,

    pub premium_badge: Option<Option<bool>>,
    pub skip_queue: Option<Option<bool>>,
    pub social_promotion: Option<Option<bool>>,
    pub guaranteed_backlinks: Option<Option<i64>>,
    pub homepage_duration: Option<Option<i64>>,
    pub link_type: Option<LinkType>,
    pub dofollow_status: Option<bool>,
    pub dofollow_reason: Option<Option<String>>,
    pub dofollow_awarded_at: Option<Option<i64>>,

    pub launch: Option<LaunchSlot>,
    pub pending_launch: Option<Option<LaunchSlot>>,
    pub original_launch: Option<Option<LaunchSlot>>,

    pub chargeback: Option<Chargeback>,
    pub payment_failure: Option<PaymentFailure>,
}

/// Input for inserting a project. Submission itself happens elsewhere; this
/// covers seeding and fixtures.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateProject {
    pub id: Option<String>,
    pub slug: String,
    pub name: String,
    pub submitted_by: String,
    #[serde(default)]
    pub plan: Plan,
    #[serde(default)]
    pub is_draft: bool,
    #[serde(default)]
    pub payment_status: bool,
    pub checkout_session_id: Option<String>,
    pub payment_initiated_at: Option<i64>,
    #[serde(default)]
    pub launch: LaunchSlot,
    pub pending_launch: Option<LaunchSlot>,
    pub original_launch: Option<LaunchSlot>,
}
