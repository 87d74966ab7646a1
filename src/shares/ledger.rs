use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::{AppError, AppResult, PurchaseError};
use crate::ledger::{LedgerClient, LedgerError, PurchaseOp};
use crate::projects::models::{NewShare, Project, ProjectStatus, ShareRecord};
use crate::store::ProjectStore;

/// Authoritative off-chain view of who holds how many shares in a
/// project, and the linkage between share records and on-chain
/// operations. A ShareRecord exists only for a purchase that was
/// located and validated on chain.
pub struct ShareLedger {
    store: Arc<dyn ProjectStore>,
    ledger: Arc<dyn LedgerClient>,
    lookup_attempts: u32,
    lookup_delay: Duration,
    locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl ShareLedger {
    pub fn new(store: Arc<dyn ProjectStore>, ledger: Arc<dyn LedgerClient>) -> Self {
        Self::with_retry(store, ledger, 3, Duration::from_secs(2))
    }

    pub fn with_retry(
        store: Arc<dyn ProjectStore>,
        ledger: Arc<dyn LedgerClient>,
        lookup_attempts: u32,
        lookup_delay: Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            lookup_attempts,
            lookup_delay,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, project_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.lock().entry(project_id).or_default().clone()
    }

    /// Settle a purchase receipt against the chain. Idempotent on
    /// `ophash`: a duplicate submission returns the existing record so
    /// client retries are harmless.
    pub async fn record_purchase(
        &self,
        project_id: i64,
        patron_wallet: &str,
        ophash: &str,
    ) -> AppResult<ShareRecord> {
        if let Some(existing) = self.store.share_by_ophash(ophash).await? {
            info!(ophash, "purchase already settled, returning existing record");
            return Ok(existing);
        }

        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("project {}", project_id)))?;
        if project.status != ProjectStatus::Open {
            return Err(PurchaseError::ProjectNotOpen(project.status).into());
        }

        let op = self.lookup_with_retry(ophash).await?;

        if op.project_id != project_id {
            return Err(AppError::InvalidInput(format!(
                "operation {} targets project {}, not {}",
                ophash, op.project_id, project_id
            )));
        }
        if op.source_wallet != patron_wallet {
            warn!(ophash, patron_wallet, onchain = %op.source_wallet, "wallet mismatch");
            return Err(PurchaseError::WalletMismatch {
                patron: patron_wallet.to_string(),
                onchain: op.source_wallet,
            }
            .into());
        }

        // Cap check and insert run under a per-project lock so two
        // in-flight purchases cannot both observe the old total.
        let lock = self.lock_for(project_id);
        let _guard = lock.lock().await;

        if let Some(existing) = self.store.share_by_ophash(ophash).await? {
            info!(ophash, "purchase settled concurrently, returning existing record");
            return Ok(existing);
        }

        if let Some(max) = project.max_shares {
            let total = self.total_shares(project_id).await?;
            if total + op.quantity > max {
                return Err(PurchaseError::MaxSharesExceeded {
                    requested: op.quantity,
                    available: max - total,
                }
                .into());
            }
        }

        let inserted = self
            .store
            .insert_share(NewShare {
                project_id,
                patron_wallet: patron_wallet.to_string(),
                quantity: op.quantity,
                ophash: ophash.to_string(),
            })
            .await;
        match inserted {
            Ok(record) => {
                info!(
                    project_id,
                    patron_wallet,
                    quantity = record.quantity,
                    ophash,
                    "purchase settled"
                );
                Ok(record)
            }
            // Another process instance may have settled the same
            // receipt; the unique ophash index rejects the insert.
            Err(err) => match self.store.share_by_ophash(ophash).await? {
                Some(existing) => Ok(existing),
                None => Err(err),
            },
        }
    }

    async fn lookup_with_retry(&self, ophash: &str) -> AppResult<PurchaseOp> {
        for attempt in 1..=self.lookup_attempts {
            match self.ledger.lookup_operation(ophash).await {
                Ok(op) => return Ok(op),
                Err(LedgerError::OperationNotFound) if attempt < self.lookup_attempts => {
                    info!(ophash, attempt, "operation not indexed yet, retrying");
                    tokio::time::sleep(self.lookup_delay).await;
                }
                Err(LedgerError::OperationNotFound) => {
                    return Err(PurchaseError::OperationNotFound(ophash.to_string()).into());
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(PurchaseError::OperationNotFound(ophash.to_string()).into())
    }

    /// Sum of quantities across all records for a project.
    pub async fn total_shares(&self, project_id: i64) -> AppResult<i64> {
        let shares = self.store.shares_for_project(project_id).await?;
        Ok(shares.iter().map(|s| s.quantity).sum())
    }

    /// Aggregate holdings per wallet, in deterministic (sorted) order.
    /// A patron may hold several purchase records.
    pub async fn holders_of(&self, project_id: i64) -> AppResult<BTreeMap<String, i64>> {
        let shares = self.store.shares_for_project(project_id).await?;
        let mut holders = BTreeMap::new();
        for share in shares {
            *holders.entry(share.patron_wallet).or_insert(0) += share.quantity;
        }
        Ok(holders)
    }

    /// Gross amount raised in minor currency units.
    pub async fn gross_raised(&self, project: &Project) -> AppResult<i64> {
        Ok(self.total_shares(project.id).await? * project.share_price)
    }

    /// Drop records for the given wallets. Called only once a refund
    /// chunk covering them is confirmed on chain.
    pub async fn remove(&self, project_id: i64, wallets: &[String]) -> AppResult<u64> {
        self.store.delete_shares(project_id, wallets).await
    }
}
