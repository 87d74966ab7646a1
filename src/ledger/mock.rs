//! Scripted in-memory ledger used by unit tests.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{BatchOperation, LedgerClient, LedgerError, LedgerResult, OpRef, PurchaseOp};
use crate::projects::models::ProjectStatus;

#[derive(Debug, Clone)]
pub struct Submission {
    pub operations: Vec<BatchOperation>,
    pub min_confirmations: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailKind {
    Reject,
    Timeout,
}

#[derive(Default)]
struct Inner {
    /// ophash -> (operation, lookups needed before it becomes visible)
    operations: HashMap<String, (PurchaseOp, usize)>,
    lookup_counts: HashMap<String, usize>,
    onchain_projects: HashSet<i64>,
    next_token_id: u64,
    token_id_queries: usize,
    /// attempt index -> forced failure
    fail_attempts: HashMap<usize, FailKind>,
    attempts: usize,
    submissions: Vec<Submission>,
}

#[derive(Default)]
pub struct ScriptedLedger {
    inner: Mutex<Inner>,
}

impl ScriptedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an operation immediately visible to lookups.
    pub fn stage_operation(&self, ophash: &str, op: PurchaseOp) {
        self.stage_operation_after(ophash, op, 0);
    }

    /// Make an operation visible only after `not_found_lookups` misses,
    /// emulating explorer indexing lag.
    pub fn stage_operation_after(&self, ophash: &str, op: PurchaseOp, not_found_lookups: usize) {
        self.inner
            .lock()
            .operations
            .insert(ophash.to_string(), (op, not_found_lookups));
    }

    pub fn add_onchain_project(&self, project_id: i64) {
        self.inner.lock().onchain_projects.insert(project_id);
    }

    pub fn set_next_token_id(&self, token_id: u64) {
        self.inner.lock().next_token_id = token_id;
    }

    /// Force the nth submission attempt (0-based, counting failures) to fail.
    pub fn fail_attempt(&self, attempt: usize, kind: FailKind) {
        self.inner.lock().fail_attempts.insert(attempt, kind);
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.inner.lock().submissions.clone()
    }

    pub fn token_id_queries(&self) -> usize {
        self.inner.lock().token_id_queries
    }

    pub fn lookups_for(&self, ophash: &str) -> usize {
        self.inner
            .lock()
            .lookup_counts
            .get(ophash)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl LedgerClient for ScriptedLedger {
    async fn project_exists(&self, project_id: i64) -> LedgerResult<bool> {
        Ok(self.inner.lock().onchain_projects.contains(&project_id))
    }

    async fn register_project(&self, project_id: i64, share_price: i64) -> LedgerResult<OpRef> {
        let op = BatchOperation::CreateProject {
            project_id,
            share_price,
        };
        let opref = self.submit_batch(vec![op], 0).await?;
        self.inner.lock().onchain_projects.insert(project_id);
        Ok(opref)
    }

    async fn update_status(&self, project_id: i64, status: ProjectStatus) -> LedgerResult<OpRef> {
        self.submit_batch(vec![BatchOperation::UpdateStatus { project_id, status }], 0)
            .await
    }

    async fn submit_batch(
        &self,
        operations: Vec<BatchOperation>,
        min_confirmations: u32,
    ) -> LedgerResult<OpRef> {
        let mut inner = self.inner.lock();
        let attempt = inner.attempts;
        inner.attempts += 1;
        match inner.fail_attempts.get(&attempt) {
            Some(FailKind::Reject) => return Err(LedgerError::Rejected("scripted".into())),
            Some(FailKind::Timeout) => return Err(LedgerError::Timeout),
            None => {}
        }
        inner.submissions.push(Submission {
            operations,
            min_confirmations,
        });
        Ok(OpRef(format!("op{}", attempt)))
    }

    async fn lookup_operation(&self, ophash: &str) -> LedgerResult<PurchaseOp> {
        let mut inner = self.inner.lock();
        let seen = inner.lookup_counts.entry(ophash.to_string()).or_insert(0);
        *seen += 1;
        let seen = *seen;
        match inner.operations.get(ophash) {
            Some((op, visible_after)) if seen > *visible_after => Ok(op.clone()),
            _ => Err(LedgerError::OperationNotFound),
        }
    }

    async fn verify_signature(
        &self,
        _wallet: &str,
        _signature: &str,
        _message: &str,
    ) -> LedgerResult<bool> {
        Ok(true)
    }

    async fn query_next_token_id(&self) -> LedgerResult<u64> {
        let mut inner = self.inner.lock();
        inner.token_id_queries += 1;
        Ok(inner.next_token_id)
    }
}
