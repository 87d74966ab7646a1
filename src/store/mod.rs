pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::error::AppResult;
use crate::projects::models::{
    NewProject, NewShare, Project, ProjectStatus, ProjectUpdate, ShareRecord, StatusHistory,
};

/// Persistence boundary for the lifecycle engine. The relational store
/// is the single source of truth; all mutation goes through the state
/// machine or the share ledger, never straight from request handlers.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Persist a new project in `New` status, crediting the initial
    /// status-history row to the presenter (gallery submissions) or
    /// the artist.
    async fn insert_project(&self, new: NewProject) -> AppResult<Project>;

    async fn get_project(&self, id: i64) -> AppResult<Option<Project>>;

    async fn set_status(&self, id: i64, status: ProjectStatus) -> AppResult<()>;

    /// Append-only audit log; one row per attempted transition.
    async fn append_status_history(
        &self,
        project_id: i64,
        status: ProjectStatus,
        acting_user: &str,
    ) -> AppResult<()>;

    async fn status_history(&self, project_id: i64) -> AppResult<Vec<StatusHistory>>;

    /// Insert a settled purchase. The ophash column carries a unique
    /// index; callers check for an existing record first.
    async fn insert_share(&self, share: NewShare) -> AppResult<ShareRecord>;

    async fn share_by_ophash(&self, ophash: &str) -> AppResult<Option<ShareRecord>>;

    async fn shares_for_project(&self, project_id: i64) -> AppResult<Vec<ShareRecord>>;

    /// Delete share records for the given wallets. Only invoked once a
    /// refund chunk covering them is confirmed.
    async fn delete_shares(&self, project_id: i64, wallets: &[String]) -> AppResult<u64>;

    /// All projects currently in `Open` status; the expiry scanner
    /// filters them by deadline and share cap.
    async fn open_projects(&self) -> AppResult<Vec<Project>>;

    async fn insert_update(
        &self,
        project_id: i64,
        author_wallet: &str,
        description: &str,
    ) -> AppResult<ProjectUpdate>;

    async fn updates_for_project(&self, project_id: i64) -> AppResult<Vec<ProjectUpdate>>;
}
