use serde::{Deserialize, Serialize};

use crate::projects::models::{Project, ProjectStatus, ProjectUpdate, ShareRecord};

/// Purchase receipt: the patron paid on chain and submits the
/// operation hash for settlement.
#[derive(Debug, Deserialize)]
pub struct BuySharesRequest {
    pub wallet: String,
    pub ophash: String,
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub status: ProjectStatus,
    pub acting_user: String,
}

#[derive(Debug, Deserialize)]
pub struct PostUpdateRequest {
    pub author_wallet: String,
    /// Signature over the description, proving control of the wallet.
    pub signature: String,
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct ProjectResponse {
    #[serde(flatten)]
    pub project: Project,
    pub shares_num: usize,
    pub total_shares: i64,
    pub gross_raised: i64,
    pub shares: Vec<ShareRecord>,
    pub updates: Vec<ProjectUpdate>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}
