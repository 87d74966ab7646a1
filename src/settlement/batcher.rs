use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::error::{AppResult, SettlementError};
use crate::ledger::{BatchOperation, LedgerClient, LedgerError, MintEntry, TokenRef};
use crate::projects::models::{Project, ProjectStatus};
use crate::shares::ShareLedger;

/// Maximum recipients per ledger batch operation. Matches the chain
/// contract's operation-size limit.
pub const BATCH_LIMIT: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementMode {
    Refund,
    Mint { metadata_uri: String },
}

impl SettlementMode {
    fn name(&self) -> &'static str {
        match self {
            SettlementMode::Refund => "refund",
            SettlementMode::Mint { .. } => "mint",
        }
    }
}

/// Result of one settlement run. `chunks_confirmed` is the cursor: it
/// only moves forward, and a chunk is never skipped without a confirmed
/// submission.
#[derive(Debug)]
pub struct SettlementOutcome {
    pub run_id: uuid::Uuid,
    pub chunks_total: usize,
    pub chunks_confirmed: usize,
    pub holders_settled: usize,
    pub failure: Option<SettlementError>,
}

impl SettlementOutcome {
    pub fn is_complete(&self) -> bool {
        self.chunks_confirmed == self.chunks_total
    }

    pub fn cursor(&self) -> usize {
        self.chunks_confirmed
    }
}

/// Transient per-project state of an in-flight mint settlement. Not
/// persisted: a process restart re-queries the token id, and the
/// contract's fixed token allocation keeps the retry idempotent.
struct MintRun {
    token_id: u64,
    new_token_minted: bool,
    withdrawn: bool,
    settled: BTreeSet<String>,
}

/// Converts a holder mapping into ledger-sized batches and drives them
/// to completion. Submissions are fire-and-forget
/// (`min_confirmations = 0`); a confirmed submission is provisional
/// until out-of-band reconciliation.
pub struct SettlementBatcher {
    ledger: Arc<dyn LedgerClient>,
    shares: Arc<ShareLedger>,
    chunk_size: usize,
    mint_runs: Mutex<HashMap<i64, MintRun>>,
}

impl SettlementBatcher {
    pub fn new(ledger: Arc<dyn LedgerClient>, shares: Arc<ShareLedger>) -> Self {
        Self::with_chunk_size(ledger, shares, BATCH_LIMIT)
    }

    pub fn with_chunk_size(
        ledger: Arc<dyn LedgerClient>,
        shares: Arc<ShareLedger>,
        chunk_size: usize,
    ) -> Self {
        assert!(chunk_size > 0);
        Self {
            ledger,
            shares,
            chunk_size,
            mint_runs: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run(
        &self,
        project: &Project,
        holders: BTreeMap<String, i64>,
        mode: SettlementMode,
    ) -> AppResult<SettlementOutcome> {
        let run_id = uuid::Uuid::new_v4();
        info!(
            project_id = project.id,
            %run_id,
            mode = mode.name(),
            holders = holders.len(),
            "starting settlement run"
        );
        let outcome = match &mode {
            SettlementMode::Refund => self.run_refund(run_id, project, holders).await?,
            SettlementMode::Mint { metadata_uri } => {
                self.run_mint(run_id, project, holders, metadata_uri).await?
            }
        };
        if outcome.is_complete() {
            info!(
                project_id = project.id,
                %run_id,
                chunks = outcome.chunks_total,
                holders = outcome.holders_settled,
                "settlement run complete"
            );
        } else {
            warn!(
                project_id = project.id,
                %run_id,
                cursor = outcome.cursor(),
                total = outcome.chunks_total,
                "settlement run stopped at unconfirmed chunk"
            );
        }
        Ok(outcome)
    }

    /// Refund every holder. Confirmed wallets are removed from the
    /// share ledger immediately so a retried run never double-refunds.
    async fn run_refund(
        &self,
        run_id: uuid::Uuid,
        project: &Project,
        holders: BTreeMap<String, i64>,
    ) -> AppResult<SettlementOutcome> {
        let wallets: Vec<String> = holders.into_keys().collect();

        if wallets.is_empty() {
            // Nothing to pay out; just flip the on-chain status.
            return self
                .submit_bare_status(run_id, project, ProjectStatus::Refunded)
                .await;
        }

        let chunks: Vec<&[String]> = wallets.chunks(self.chunk_size).collect();
        let chunks_total = chunks.len();
        let mut confirmed = 0;
        let mut settled = 0;

        for (index, chunk) in chunks.iter().enumerate() {
            let mut ops = vec![BatchOperation::Refund {
                project_id: project.id,
                wallets: chunk.to_vec(),
            }];
            if index + 1 == chunks_total {
                ops.push(BatchOperation::UpdateStatus {
                    project_id: project.id,
                    status: ProjectStatus::Refunded,
                });
            }

            match self.ledger.submit_batch(ops, 0).await {
                Ok(opref) => {
                    // Confirmed submission: forget these holders now.
                    // A timeout above would have left them in place.
                    self.shares.remove(project.id, chunk).await?;
                    confirmed += 1;
                    settled += chunk.len();
                    info!(project_id = project.id, %run_id, chunk = index, op = %opref.0, "refund chunk submitted");
                }
                Err(err) => {
                    return Ok(self.stopped(run_id, chunks_total, confirmed, settled, err));
                }
            }
        }

        Ok(SettlementOutcome {
            run_id,
            chunks_total,
            chunks_confirmed: confirmed,
            holders_settled: settled,
            failure: None,
        })
    }

    /// Withdraw the accumulated funds to the artist and distribute one
    /// token proportionally to every holder. The token id is allocated
    /// once per completion; the metadata URI rides on the very first
    /// minted entry and every later entry references the same id.
    async fn run_mint(
        &self,
        run_id: uuid::Uuid,
        project: &Project,
        holders: BTreeMap<String, i64>,
        metadata_uri: &str,
    ) -> AppResult<SettlementOutcome> {
        if holders.is_empty() {
            return self
                .submit_bare_status(run_id, project, ProjectStatus::Completed)
                .await;
        }

        let token_id = self.allocate_token_id(project.id).await?;
        let gross: i64 = holders.values().sum::<i64>() * project.share_price;

        let (already_settled, withdrawn_before) = {
            let runs = self.mint_runs.lock();
            let run = &runs[&project.id];
            (run.settled.clone(), run.withdrawn)
        };
        let pending: Vec<(String, i64)> = holders
            .into_iter()
            .filter(|(wallet, _)| !already_settled.contains(wallet))
            .collect();

        let chunks: Vec<&[(String, i64)]> = pending.chunks(self.chunk_size).collect();
        let chunks_total = chunks.len();
        let mut confirmed = 0;
        let mut settled = 0;
        let mut withdrawn = withdrawn_before;

        for (index, chunk) in chunks.iter().enumerate() {
            let entries = self.mint_entries(project.id, token_id, chunk, metadata_uri);
            let carries_new = entries
                .iter()
                .any(|e| matches!(e.token, TokenRef::New { .. }));

            let mut ops = Vec::new();
            if !withdrawn {
                ops.push(BatchOperation::Withdraw {
                    amount: gross,
                    to: project.artist_wallet.clone(),
                });
            }
            ops.push(BatchOperation::Mint { entries });
            if index + 1 == chunks_total {
                ops.push(BatchOperation::UpdateStatus {
                    project_id: project.id,
                    status: ProjectStatus::Completed,
                });
            }

            match self.ledger.submit_batch(ops, 0).await {
                Ok(opref) => {
                    withdrawn = true;
                    confirmed += 1;
                    settled += chunk.len();
                    let mut runs = self.mint_runs.lock();
                    if let Some(run) = runs.get_mut(&project.id) {
                        run.withdrawn = true;
                        if carries_new {
                            run.new_token_minted = true;
                        }
                        run.settled
                            .extend(chunk.iter().map(|(wallet, _)| wallet.clone()));
                    }
                    info!(project_id = project.id, %run_id, chunk = index, op = %opref.0, "mint chunk submitted");
                }
                Err(err) => {
                    return Ok(self.stopped(run_id, chunks_total, confirmed, settled, err));
                }
            }
        }

        // Fully distributed; the in-flight state is no longer needed.
        self.mint_runs.lock().remove(&project.id);

        Ok(SettlementOutcome {
            run_id,
            chunks_total,
            chunks_confirmed: confirmed,
            holders_settled: settled,
            failure: None,
        })
    }

    fn mint_entries(
        &self,
        project_id: i64,
        token_id: u64,
        chunk: &[(String, i64)],
        metadata_uri: &str,
    ) -> Vec<MintEntry> {
        let new_token_minted = self
            .mint_runs
            .lock()
            .get(&project_id)
            .map(|run| run.new_token_minted)
            .unwrap_or(false);
        chunk
            .iter()
            .enumerate()
            .map(|(i, (wallet, quantity))| MintEntry {
                token: if i == 0 && !new_token_minted {
                    TokenRef::New {
                        metadata_uri: metadata_uri.to_string(),
                    }
                } else {
                    TokenRef::Existing { token_id }
                },
                amount: *quantity,
                to: wallet.clone(),
            })
            .collect()
    }

    /// Fix the token id for this completion, querying the contract only
    /// on the first call.
    async fn allocate_token_id(&self, project_id: i64) -> AppResult<u64> {
        if let Some(run) = self.mint_runs.lock().get(&project_id) {
            return Ok(run.token_id);
        }
        let token_id = self.ledger.query_next_token_id().await?;
        let mut runs = self.mint_runs.lock();
        let run = runs.entry(project_id).or_insert(MintRun {
            token_id,
            new_token_minted: false,
            withdrawn: false,
            settled: BTreeSet::new(),
        });
        Ok(run.token_id)
    }

    async fn submit_bare_status(
        &self,
        run_id: uuid::Uuid,
        project: &Project,
        status: ProjectStatus,
    ) -> AppResult<SettlementOutcome> {
        let ops = vec![BatchOperation::UpdateStatus {
            project_id: project.id,
            status,
        }];
        match self.ledger.submit_batch(ops, 0).await {
            Ok(_) => Ok(SettlementOutcome {
                run_id,
                chunks_total: 1,
                chunks_confirmed: 1,
                holders_settled: 0,
                failure: None,
            }),
            Err(err) => Ok(self.stopped(run_id, 1, 0, 0, err)),
        }
    }

    fn stopped(
        &self,
        run_id: uuid::Uuid,
        chunks_total: usize,
        confirmed: usize,
        settled: usize,
        err: LedgerError,
    ) -> SettlementOutcome {
        let failure = match err {
            LedgerError::Timeout => SettlementError::SubmissionTimeout,
            LedgerError::Rejected(msg) => SettlementError::SubmissionFailed(msg),
            other => SettlementError::SubmissionFailed(other.to_string()),
        };
        error!(%run_id, confirmed, chunks_total, %failure, "chunk submission failed");
        SettlementOutcome {
            run_id,
            chunks_total,
            chunks_confirmed: confirmed,
            holders_settled: settled,
            failure: Some(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::mock::{FailKind, ScriptedLedger, Submission};
    use crate::projects::models::NewProject;
    use crate::store::{memory::MemoryStore, ProjectStore};
    use chrono::{Duration, Utc};
    use std::time::Duration as StdDuration;

    struct Fixture {
        store: Arc<MemoryStore>,
        ledger: Arc<ScriptedLedger>,
        shares: Arc<ShareLedger>,
        batcher: SettlementBatcher,
    }

    fn fixture(chunk_size: usize) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(ScriptedLedger::new());
        let shares = Arc::new(ShareLedger::with_retry(
            store.clone(),
            ledger.clone(),
            1,
            StdDuration::from_millis(1),
        ));
        let batcher = SettlementBatcher::with_chunk_size(ledger.clone(), shares.clone(), chunk_size);
        Fixture {
            store,
            ledger,
            shares,
            batcher,
        }
    }

    async fn seeded_project(fx: &Fixture, wallets: &[(&str, i64)]) -> Project {
        let project = fx
            .store
            .insert_project(NewProject {
                title: "Mural".into(),
                description: "A mural".into(),
                artist_wallet: "tz1artist".into(),
                presenter_wallet: None,
                deadline: Utc::now() + Duration::days(30),
                share_price: 5,
                min_shares: None,
                max_shares: None,
                royalty_pct: 0,
            })
            .await
            .unwrap();
        for (i, (wallet, quantity)) in wallets.iter().enumerate() {
            fx.store
                .insert_share(crate::projects::models::NewShare {
                    project_id: project.id,
                    patron_wallet: wallet.to_string(),
                    quantity: *quantity,
                    ophash: format!("oo{}", i),
                })
                .await
                .unwrap();
        }
        project
    }

    fn refund_wallets(submission: &Submission) -> Vec<String> {
        submission
            .operations
            .iter()
            .filter_map(|op| match op {
                BatchOperation::Refund { wallets, .. } => Some(wallets.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn mint_entries(submission: &Submission) -> Vec<MintEntry> {
        submission
            .operations
            .iter()
            .filter_map(|op| match op {
                BatchOperation::Mint { entries } => Some(entries.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[tokio::test]
    async fn partitions_holders_into_bounded_chunks() {
        let fx = fixture(500);
        let holders: BTreeMap<String, i64> =
            (0..1200).map(|i| (format!("tz1w{:04}", i), 1)).collect();
        let project = seeded_project(&fx, &[]).await;

        let outcome = fx
            .batcher
            .run(&project, holders.clone(), SettlementMode::Refund)
            .await
            .unwrap();

        assert!(outcome.is_complete());
        assert_eq!(outcome.chunks_total, 3); // ceil(1200 / 500)

        let submissions = fx.ledger.submissions();
        assert_eq!(submissions.len(), 3);
        let mut seen: Vec<String> = submissions.iter().flat_map(|s| refund_wallets(s)).collect();
        assert!(submissions
            .iter()
            .all(|s| refund_wallets(s).len() <= 500));
        seen.sort();
        let mut expected: Vec<String> = holders.into_keys().collect();
        expected.sort();
        assert_eq!(seen, expected); // every holder exactly once
    }

    #[tokio::test]
    async fn refund_appends_status_update_to_final_chunk_only() {
        let fx = fixture(2);
        let project = seeded_project(&fx, &[("tz1a", 1), ("tz1b", 2), ("tz1c", 3)]).await;
        let holders = fx.shares.holders_of(project.id).await.unwrap();

        let outcome = fx
            .batcher
            .run(&project, holders, SettlementMode::Refund)
            .await
            .unwrap();
        assert!(outcome.is_complete());
        assert_eq!(outcome.chunks_total, 2);

        let submissions = fx.ledger.submissions();
        assert_eq!(submissions.len(), 2);
        assert_eq!(refund_wallets(&submissions[0]).len(), 2);
        assert!(!submissions[0]
            .operations
            .iter()
            .any(|op| matches!(op, BatchOperation::UpdateStatus { .. })));
        assert_eq!(refund_wallets(&submissions[1]).len(), 1);
        assert!(matches!(
            submissions[1].operations.last(),
            Some(BatchOperation::UpdateStatus {
                status: ProjectStatus::Refunded,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn refund_retry_skips_already_refunded_holders() {
        let fx = fixture(2);
        let project = seeded_project(&fx, &[("tz1a", 1), ("tz1b", 2), ("tz1c", 3)]).await;
        // first chunk lands, second is rejected
        fx.ledger.fail_attempt(1, FailKind::Reject);

        let holders = fx.shares.holders_of(project.id).await.unwrap();
        let outcome = fx
            .batcher
            .run(&project, holders, SettlementMode::Refund)
            .await
            .unwrap();
        assert!(!outcome.is_complete());
        assert_eq!(outcome.cursor(), 1);
        assert!(matches!(
            outcome.failure,
            Some(SettlementError::SubmissionFailed(_))
        ));

        // confirmed holders are gone from the share ledger
        let remaining = fx.shares.holders_of(project.id).await.unwrap();
        assert_eq!(remaining.keys().collect::<Vec<_>>(), vec!["tz1c"]);

        // retry only re-batches the unconfirmed remainder
        let outcome = fx
            .batcher
            .run(&project, remaining, SettlementMode::Refund)
            .await
            .unwrap();
        assert!(outcome.is_complete());

        let all_refunds: Vec<String> = fx
            .ledger
            .submissions()
            .iter()
            .flat_map(refund_wallets)
            .collect();
        // nobody refunded twice
        assert_eq!(all_refunds.len(), 3);
        assert_eq!(fx.shares.total_shares(project.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn timeout_leaves_unconfirmed_holders_in_place() {
        let fx = fixture(500);
        let project = seeded_project(&fx, &[("tz1a", 1), ("tz1b", 2)]).await;
        fx.ledger.fail_attempt(0, FailKind::Timeout);

        let holders = fx.shares.holders_of(project.id).await.unwrap();
        let outcome = fx
            .batcher
            .run(&project, holders, SettlementMode::Refund)
            .await
            .unwrap();
        assert_eq!(outcome.cursor(), 0);
        assert!(matches!(
            outcome.failure,
            Some(SettlementError::SubmissionTimeout)
        ));
        // unknown outcome: no local deletion happened
        assert_eq!(fx.shares.total_shares(project.id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn mint_carries_one_new_token_and_a_single_withdraw() {
        let fx = fixture(2);
        let project = seeded_project(&fx, &[("tz1a", 2), ("tz1b", 3), ("tz1c", 1)]).await;
        fx.ledger.set_next_token_id(42);

        let holders = fx.shares.holders_of(project.id).await.unwrap();
        let outcome = fx
            .batcher
            .run(
                &project,
                holders,
                SettlementMode::Mint {
                    metadata_uri: "https://artcrowd.example/projects/1/metadata".into(),
                },
            )
            .await
            .unwrap();
        assert!(outcome.is_complete());
        assert_eq!(outcome.holders_settled, 3);

        let submissions = fx.ledger.submissions();
        assert_eq!(submissions.len(), 2);

        // withdraw of gross raised (6 shares * 5) rides the first chunk only
        let withdraws: Vec<_> = submissions
            .iter()
            .flat_map(|s| s.operations.iter())
            .filter(|op| matches!(op, BatchOperation::Withdraw { .. }))
            .collect();
        assert_eq!(withdraws.len(), 1);
        assert!(matches!(
            withdraws[0],
            BatchOperation::Withdraw { amount: 30, to } if to.as_str() == "tz1artist"
        ));

        // exactly one entry across all chunks carries the new-token marker
        let entries: Vec<MintEntry> = submissions.iter().flat_map(mint_entries).collect();
        assert_eq!(entries.len(), 3);
        let new_tokens: Vec<_> = entries
            .iter()
            .filter(|e| matches!(e.token, TokenRef::New { .. }))
            .collect();
        assert_eq!(new_tokens.len(), 1);
        assert!(entries
            .iter()
            .filter(|e| !matches!(e.token, TokenRef::New { .. }))
            .all(|e| matches!(e.token, TokenRef::Existing { token_id: 42 })));

        // final chunk closes with the status update
        assert!(matches!(
            submissions[1].operations.last(),
            Some(BatchOperation::UpdateStatus {
                status: ProjectStatus::Completed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn mint_retry_reuses_token_id_and_skips_settled_holders() {
        let fx = fixture(2);
        let project = seeded_project(&fx, &[("tz1a", 2), ("tz1b", 3), ("tz1c", 1)]).await;
        fx.ledger.set_next_token_id(7);
        fx.ledger.fail_attempt(1, FailKind::Reject);

        let holders = fx.shares.holders_of(project.id).await.unwrap();
        let uri = "https://artcrowd.example/projects/1/metadata".to_string();
        let outcome = fx
            .batcher
            .run(
                &project,
                holders.clone(),
                SettlementMode::Mint {
                    metadata_uri: uri.clone(),
                },
            )
            .await
            .unwrap();
        assert!(!outcome.is_complete());
        assert_eq!(outcome.cursor(), 1);

        // the full holder mapping is passed again on retry; already
        // settled wallets are filtered internally
        let outcome = fx
            .batcher
            .run(&project, holders, SettlementMode::Mint { metadata_uri: uri })
            .await
            .unwrap();
        assert!(outcome.is_complete());

        assert_eq!(fx.ledger.token_id_queries(), 1);

        let entries: Vec<MintEntry> = fx
            .ledger
            .submissions()
            .iter()
            .flat_map(mint_entries)
            .collect();
        // three holders, each minted exactly once
        assert_eq!(entries.len(), 3);
        let mut wallets: Vec<&str> = entries.iter().map(|e| e.to.as_str()).collect();
        wallets.sort();
        assert_eq!(wallets, vec!["tz1a", "tz1b", "tz1c"]);
        // token definition created exactly once, id 7 reused
        assert_eq!(
            entries
                .iter()
                .filter(|e| matches!(e.token, TokenRef::New { .. }))
                .count(),
            1
        );
        // withdraw not duplicated on retry
        let withdraws = fx
            .ledger
            .submissions()
            .iter()
            .flat_map(|s| s.operations.clone())
            .filter(|op| matches!(op, BatchOperation::Withdraw { .. }))
            .count();
        assert_eq!(withdraws, 1);
    }

    #[tokio::test]
    async fn empty_holder_set_still_updates_status() {
        let fx = fixture(500);
        let project = seeded_project(&fx, &[]).await;

        let outcome = fx
            .batcher
            .run(&project, BTreeMap::new(), SettlementMode::Refund)
            .await
            .unwrap();
        assert!(outcome.is_complete());
        assert_eq!(outcome.holders_settled, 0);

        let submissions = fx.ledger.submissions();
        assert_eq!(submissions.len(), 1);
        assert!(matches!(
            submissions[0].operations.as_slice(),
            [BatchOperation::UpdateStatus {
                status: ProjectStatus::Refunded,
                ..
            }]
        ));
    }
}
