use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult, SettlementError, TransitionError};
use crate::ledger::LedgerClient;
use crate::projects::models::{Project, ProjectStatus};
use crate::settlement::{SettlementBatcher, SettlementMode, SettlementOutcome};
use crate::shares::ShareLedger;
use crate::store::ProjectStore;

/// Enforces the status graph and triggers the settlement action each
/// transition requires. Transitions on one project are serialized by a
/// per-project async lock; a settlement failure leaves the project in
/// its last valid status so the transition can be retried.
pub struct ProjectStateMachine {
    store: Arc<dyn ProjectStore>,
    ledger: Arc<dyn LedgerClient>,
    shares: Arc<ShareLedger>,
    batcher: Arc<SettlementBatcher>,
    public_base_url: String,
    locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl ProjectStateMachine {
    pub fn new(
        store: Arc<dyn ProjectStore>,
        ledger: Arc<dyn LedgerClient>,
        shares: Arc<ShareLedger>,
        batcher: Arc<SettlementBatcher>,
        public_base_url: String,
    ) -> Self {
        Self {
            store,
            ledger,
            shares,
            batcher,
            public_base_url,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, project_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.lock().entry(project_id).or_default().clone()
    }

    /// Metadata URI attached to the first minted token entry: the
    /// canonical token definition every fractional holder shares.
    fn metadata_uri(&self, project_id: i64) -> String {
        format!("{}/projects/{}/metadata", self.public_base_url, project_id)
    }

    pub async fn transition(
        &self,
        project_id: i64,
        target: ProjectStatus,
        acting_user: &str,
    ) -> AppResult<Project> {
        let lock = self.lock_for(project_id);
        let _guard = lock.lock().await;

        // Current status re-read under the lock: a concurrent request
        // may have moved the project since the caller looked at it.
        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("project {}", project_id)))?;

        if project.status == target {
            debug!(project_id, status = %target, "already in target status, nothing to do");
            return Ok(project);
        }
        if !project.status.can_transition_to(target) {
            return Err(TransitionError::InvalidTransition {
                from: project.status,
                to: target,
            }
            .into());
        }

        // The attempt is audited before any chain side effect runs, so
        // a pending settlement still shows who initiated it.
        self.store
            .append_status_history(project_id, target, acting_user)
            .await?;
        info!(project_id, from = %project.status, to = %target, acting_user, "transition requested");

        match target {
            ProjectStatus::Open => self.open_sale(&project).await?,
            ProjectStatus::Refunded => self.settle_refund(&project).await?,
            ProjectStatus::Completed => self.settle_mint(&project).await?,
            ProjectStatus::SaleClosed | ProjectStatus::RefundRequested => {
                // Plain on-chain status push, no batching involved.
                self.ledger.update_status(project_id, target).await?;
            }
            // Pre-registration states only exist off chain.
            ProjectStatus::New
            | ProjectStatus::ApprovedByArtist
            | ProjectStatus::RejectedByArtist
            | ProjectStatus::RejectedByAdmin => {}
        }

        self.store.set_status(project_id, target).await?;
        if target.is_terminal() {
            // No further transitions can arrive; waiters holding their
            // own Arc clone still drain safely against terminal status.
            self.locks.lock().remove(&project_id);
        }
        let mut updated = project;
        updated.status = target;
        Ok(updated)
    }

    /// Register the project on chain before opening the sale. Skips
    /// creation when the contract already knows the project and only
    /// pushes the status update.
    async fn open_sale(&self, project: &Project) -> AppResult<()> {
        if !self.ledger.project_exists(project.id).await? {
            self.ledger
                .register_project(project.id, project.share_price)
                .await?;
        } else {
            debug!(project_id = project.id, "project already registered on chain");
        }
        self.ledger
            .update_status(project.id, ProjectStatus::Open)
            .await?;
        Ok(())
    }

    /// Refund every holder. The persisted status flips only once the
    /// batcher confirms every chunk; otherwise the project stays in
    /// RefundRequested and the transition is retried later, re-batching
    /// only the holders still present in the share ledger.
    async fn settle_refund(&self, project: &Project) -> AppResult<()> {
        let holders = self.shares.holders_of(project.id).await?;
        let outcome = self
            .batcher
            .run(project, holders, SettlementMode::Refund)
            .await?;
        self.require_complete(project, outcome)
    }

    async fn settle_mint(&self, project: &Project) -> AppResult<()> {
        let holders = self.shares.holders_of(project.id).await?;
        let mode = SettlementMode::Mint {
            metadata_uri: self.metadata_uri(project.id),
        };
        let outcome = self.batcher.run(project, holders, mode).await?;
        self.require_complete(project, outcome)
    }

    fn require_complete(&self, project: &Project, outcome: SettlementOutcome) -> AppResult<()> {
        if outcome.is_complete() {
            return Ok(());
        }
        warn!(
            project_id = project.id,
            status = %project.status,
            run_id = %outcome.run_id,
            cursor = outcome.cursor(),
            total = outcome.chunks_total,
            "settlement incomplete, project stays in current status"
        );
        Err(match outcome.failure {
            Some(failure) => failure.into(),
            None => SettlementError::Incomplete {
                confirmed: outcome.chunks_confirmed,
                total: outcome.chunks_total,
            }
            .into(),
        })
    }
}
