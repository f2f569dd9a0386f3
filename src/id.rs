//! Prefixed ID generation for locally created records.
//!
//! Format: `ls_{entity}_{uuid_simple}` (32 hex chars, no hyphens). The `ls_`
//! brand keeps our ids visually distinct from Stripe's `cs_`, `pi_`, `ch_` ids
//! that are stored alongside them.

use uuid::Uuid;

/// Entity types that get prefixed IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityType {
    Project,
    Payment,
    Competition,
    WebhookLog,
}

impl EntityType {
    pub const ALL: [EntityType; 4] = [
        EntityType::Project,
        EntityType::Payment,
        EntityType::Competition,
        EntityType::WebhookLog,
    ];

    /// Returns the prefix for this entity type.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Project => "ls_app",
            Self::Payment => "ls_pay",
            Self::Competition => "ls_cmp",
            Self::WebhookLog => "ls_whl",
        }
    }

    /// Generates a new prefixed ID for this entity type.
    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}
