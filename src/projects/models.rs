use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Project lifecycle states. Transitions are only valid along the edges
/// returned by [`ProjectStatus::can_transition_to`]; everything else is
/// rejected by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    New,
    ApprovedByArtist,
    RejectedByArtist,
    Open,
    RejectedByAdmin,
    SaleClosed,
    RefundRequested,
    Refunded,
    Completed,
}

impl ProjectStatus {
    /// String form pushed to the chain contract and stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::New => "new",
            ProjectStatus::ApprovedByArtist => "approved_by_artist",
            ProjectStatus::RejectedByArtist => "rejected_by_artist",
            ProjectStatus::Open => "open",
            ProjectStatus::RejectedByAdmin => "rejected_by_admin",
            ProjectStatus::SaleClosed => "sale_closed",
            ProjectStatus::RefundRequested => "refund_requested",
            ProjectStatus::Refunded => "refunded",
            ProjectStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProjectStatus::RejectedByArtist
                | ProjectStatus::RejectedByAdmin
                | ProjectStatus::Completed
                | ProjectStatus::Refunded
        )
    }

    /// The status graph. A refund or rejection is a terminal status,
    /// never a deletion.
    pub fn can_transition_to(&self, target: ProjectStatus) -> bool {
        use ProjectStatus::*;
        matches!(
            (self, target),
            (New, ApprovedByArtist)
                | (New, RejectedByArtist)
                | (ApprovedByArtist, Open)
                | (ApprovedByArtist, RejectedByAdmin)
                | (Open, SaleClosed)
                | (Open, RefundRequested)
                | (SaleClosed, Completed)
                | (SaleClosed, RefundRequested)
                | (RefundRequested, Refunded)
        )
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(ProjectStatus::New),
            "approved_by_artist" => Ok(ProjectStatus::ApprovedByArtist),
            "rejected_by_artist" => Ok(ProjectStatus::RejectedByArtist),
            "open" => Ok(ProjectStatus::Open),
            "rejected_by_admin" => Ok(ProjectStatus::RejectedByAdmin),
            "sale_closed" => Ok(ProjectStatus::SaleClosed),
            "refund_requested" => Ok(ProjectStatus::RefundRequested),
            "refunded" => Ok(ProjectStatus::Refunded),
            "completed" => Ok(ProjectStatus::Completed),
            other => Err(AppError::InvalidInput(format!("unknown status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub artist_wallet: String,
    /// Gallery wallet when the project was submitted on the artist's behalf.
    pub presenter_wallet: Option<String>,
    pub deadline: DateTime<Utc>,
    /// Price of one share in minor currency units.
    pub share_price: i64,
    pub min_shares: Option<i64>,
    pub max_shares: Option<i64>,
    pub royalty_pct: i16,
    pub status: ProjectStatus,
    pub created_on: DateTime<Utc>,
}

/// Input for creating a project row. Projects always start in `New`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewProject {
    pub title: String,
    pub description: String,
    pub artist_wallet: String,
    pub presenter_wallet: Option<String>,
    pub deadline: DateTime<Utc>,
    pub share_price: i64,
    pub min_shares: Option<i64>,
    pub max_shares: Option<i64>,
    #[serde(default)]
    pub royalty_pct: i16,
}

impl NewProject {
    pub fn validate(&self) -> AppResult<()> {
        if self.share_price <= 0 {
            return Err(AppError::InvalidInput("share_price must be positive".into()));
        }
        if !(0..=15).contains(&self.royalty_pct) {
            return Err(AppError::InvalidInput(
                "royalty_pct must be between 0 and 15".into(),
            ));
        }
        if let (Some(min), Some(max)) = (self.min_shares, self.max_shares) {
            if max < min {
                return Err(AppError::InvalidInput(
                    "max_shares must be greater than or equal to min_shares".into(),
                ));
            }
        }
        if self.min_shares.is_some_and(|m| m < 1) || self.max_shares.is_some_and(|m| m < 1) {
            return Err(AppError::InvalidInput("share bounds must be at least 1".into()));
        }
        Ok(())
    }
}

/// One confirmed on-chain purchase. `ophash` is the idempotence key:
/// at most one record exists per on-chain operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareRecord {
    pub id: i64,
    pub project_id: i64,
    pub patron_wallet: String,
    pub quantity: i64,
    pub purchased_on: DateTime<Utc>,
    pub ophash: String,
}

#[derive(Debug, Clone)]
pub struct NewShare {
    pub project_id: i64,
    pub patron_wallet: String,
    pub quantity: i64,
    pub ophash: String,
}

/// Append-only audit row, one per attempted (graph-valid) transition.
#[derive(Debug, Clone, Serialize)]
pub struct StatusHistory {
    pub id: i64,
    pub project_id: i64,
    pub status: ProjectStatus,
    pub acting_user: String,
    pub updated_on: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectUpdate {
    pub id: i64,
    pub project_id: i64,
    pub author_wallet: String,
    pub description: String,
    pub created_on: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_project() -> NewProject {
        NewProject {
            title: "Mural".into(),
            description: "A mural".into(),
            artist_wallet: "tz1artist".into(),
            presenter_wallet: None,
            deadline: Utc::now() + Duration::days(30),
            share_price: 5,
            min_shares: None,
            max_shares: None,
            royalty_pct: 0,
        }
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            ProjectStatus::New,
            ProjectStatus::ApprovedByArtist,
            ProjectStatus::RejectedByArtist,
            ProjectStatus::Open,
            ProjectStatus::RejectedByAdmin,
            ProjectStatus::SaleClosed,
            ProjectStatus::RefundRequested,
            ProjectStatus::Refunded,
            ProjectStatus::Completed,
        ] {
            assert_eq!(status.as_str().parse::<ProjectStatus>().unwrap(), status);
        }
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        use ProjectStatus::*;
        let all = [
            New,
            ApprovedByArtist,
            RejectedByArtist,
            Open,
            RejectedByAdmin,
            SaleClosed,
            RefundRequested,
            Refunded,
            Completed,
        ];
        for status in all {
            if status.is_terminal() {
                for target in all {
                    assert!(!status.can_transition_to(target));
                }
            }
        }
    }

    #[test]
    fn graph_rejects_skipping_states() {
        assert!(!ProjectStatus::New.can_transition_to(ProjectStatus::Completed));
        assert!(!ProjectStatus::New.can_transition_to(ProjectStatus::Open));
        assert!(!ProjectStatus::Open.can_transition_to(ProjectStatus::Refunded));
        assert!(ProjectStatus::Open.can_transition_to(ProjectStatus::SaleClosed));
        assert!(ProjectStatus::RefundRequested.can_transition_to(ProjectStatus::Refunded));
    }

    #[test]
    fn validates_share_price_and_bounds() {
        let mut p = new_project();
        p.share_price = 0;
        assert!(p.validate().is_err());

        let mut p = new_project();
        p.min_shares = Some(10);
        p.max_shares = Some(5);
        assert!(p.validate().is_err());

        let mut p = new_project();
        p.royalty_pct = 16;
        assert!(p.validate().is_err());

        assert!(new_project().validate().is_ok());
    }
}
