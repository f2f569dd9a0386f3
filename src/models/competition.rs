use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CompetitionKind {
    Weekly,
    Monthly,
}

/// Maximum submissions a weekly competition accepts before premium upgrades are refused.
pub const WEEKLY_CAPACITY: i64 = 25;

/// A weekly or monthly voting bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Competition {
    pub id: String,
    /// Human key, e.g. `2025-W10` or `2025-03`.
    pub competition_id: String,
    pub kind: CompetitionKind,
    pub start_date: i64,
    pub end_date: i64,
    pub total_submissions: i64,
    pub premium_submissions: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Competition {
    pub fn has_started(&self, now: i64) -> bool {
        now >= self.start_date
    }

    pub fn is_full(&self) -> bool {
        self.total_submissions >= WEEKLY_CAPACITY
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCompetition {
    pub competition_id: String,
    pub kind: CompetitionKind,
    pub start_date: i64,
    pub end_date: i64,
}
