use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// A launch as reported by the upstream feed.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Launch {
    pub id: String,
    pub name: String,
    pub provider_name: String,
    pub location_name: String,
    pub image_url: String,
    pub scheduled_time: DateTime<Utc>,
    pub upstream_last_modified: DateTime<Utc>,
}

impl Launch {
    /// Scheduled time at the precision the store keeps.
    pub fn scheduled_time_stored(&self) -> DateTime<Utc> {
        self.scheduled_time.trunc_subsecs(3)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LaunchStatus {
    Upcoming,
    Cancelled,
}

impl LaunchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upcoming => "upcoming",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for LaunchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LaunchStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upcoming" => Ok(Self::Upcoming),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown launch status: {other}")),
        }
    }
}

/// A row of the `launches` table.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StoredLaunch {
    #[serde(flatten)]
    pub launch: Launch,
    pub status: LaunchStatus,
    pub local_changed_at: DateTime<Utc>,
}

impl StoredLaunch {
    pub fn is_cancelled(&self) -> bool {
        self.status == LaunchStatus::Cancelled
    }
}

/// Counts produced by one reconciliation cycle.
#[derive(Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub pruned: usize,
    pub cancelled: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub stale: usize,
}

impl ReconcileSummary {
    /// True when the cycle wrote nothing besides pruning.
    pub fn is_noop(&self) -> bool {
        self.cancelled == 0 && self.inserted == 0 && self.updated == 0
    }
}
