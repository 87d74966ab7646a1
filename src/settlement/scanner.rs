use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{error, info};

use crate::error::{AppError, AppResult};
use crate::projects::models::ProjectStatus;
use crate::projects::state_machine::ProjectStateMachine;
use crate::shares::ShareLedger;
use crate::store::ProjectStore;

/// Acting user credited on scanner-driven transitions.
pub const SYSTEM_USER: &str = "system";

#[derive(Debug, Default)]
pub struct ScanReport {
    pub scanned: usize,
    pub closed: Vec<i64>,
    pub failures: Vec<(i64, AppError)>,
}

/// Periodic sweep closing every OPEN project whose deadline passed or
/// whose share cap is reached. Each project is processed independently:
/// one settlement failure never blocks the rest of the sweep.
pub struct ExpiryScanner {
    store: Arc<dyn ProjectStore>,
    shares: Arc<ShareLedger>,
    machine: Arc<ProjectStateMachine>,
    scan_interval: Duration,
}

impl ExpiryScanner {
    pub fn new(
        store: Arc<dyn ProjectStore>,
        shares: Arc<ShareLedger>,
        machine: Arc<ProjectStateMachine>,
        scan_interval: Duration,
    ) -> Self {
        Self {
            store,
            shares,
            machine,
            scan_interval,
        }
    }

    /// Run the sweep loop in the background.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.scan_interval);
            loop {
                ticker.tick().await;
                match self.scan().await {
                    Ok(report) if report.closed.is_empty() && report.failures.is_empty() => {
                        info!(scanned = report.scanned, "expiry sweep found nothing to close");
                    }
                    Ok(report) => {
                        info!(
                            scanned = report.scanned,
                            closed = report.closed.len(),
                            failures = report.failures.len(),
                            "expiry sweep completed"
                        );
                    }
                    Err(err) => error!(%err, "expiry sweep aborted"),
                }
            }
        })
    }

    /// One sweep. Failures are collected into the report, not raised.
    pub async fn scan(&self) -> AppResult<ScanReport> {
        let now = Utc::now();
        let open = self.store.open_projects().await?;
        let mut report = ScanReport {
            scanned: open.len(),
            ..Default::default()
        };

        for project in open {
            let expired = project.deadline < now;
            let full = match project.max_shares {
                Some(max) => self.shares.total_shares(project.id).await? >= max,
                None => false,
            };
            if !expired && !full {
                continue;
            }

            info!(project_id = project.id, expired, full, "closing sale");
            match self
                .machine
                .transition(project.id, ProjectStatus::SaleClosed, SYSTEM_USER)
                .await
            {
                Ok(_) => report.closed.push(project.id),
                Err(err) => {
                    error!(project_id = project.id, %err, "failed to close expired project");
                    report.failures.push((project.id, err));
                }
            }
        }

        Ok(report)
    }
}
