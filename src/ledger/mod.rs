pub mod node;

#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::projects::models::ProjectStatus;

/// Reference to a submitted chain operation (its hash).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpRef(pub String);

/// Decoded `buy_shares` operation recovered from the explorer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOp {
    pub project_id: i64,
    pub quantity: i64,
    pub source_wallet: String,
}

/// Token parameter of a mint entry. Exactly one entry per completed
/// project carries `New`; every other entry references the id that was
/// allocated for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenRef {
    New { metadata_uri: String },
    Existing { token_id: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintEntry {
    pub token: TokenRef,
    pub amount: i64,
    pub to: String,
}

/// One contract call inside a bulk submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchOperation {
    CreateProject {
        project_id: i64,
        share_price: i64,
    },
    UpdateStatus {
        project_id: i64,
        status: ProjectStatus,
    },
    Refund {
        project_id: i64,
        wallets: Vec<String>,
    },
    Withdraw {
        amount: i64,
        to: String,
    },
    Mint {
        entries: Vec<MintEntry>,
    },
}

/// Errors from the chain boundary. `Timeout` means the outcome is
/// unknown: the submission may still land, so callers must not treat it
/// as a clean failure.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("operation not found")]
    OperationNotFound,

    #[error("malformed chain response: {0}")]
    Malformed(String),

    #[error("submission rejected: {0}")]
    Rejected(String),

    #[error("request timed out, outcome unknown")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for LedgerError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            LedgerError::Timeout
        } else {
            LedgerError::Transport(error.to_string())
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Abstract boundary to the blockchain: an opaque, slow, eventually
/// consistent collaborator. All methods may suspend on network I/O.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Whether the crowdfunding contract already knows this project.
    async fn project_exists(&self, project_id: i64) -> LedgerResult<bool>;

    /// Register the project on chain. Callers check `project_exists`
    /// first; registering twice is a contract-level error.
    async fn register_project(&self, project_id: i64, share_price: i64) -> LedgerResult<OpRef>;

    /// Push a plain status update, no batching involved.
    async fn update_status(&self, project_id: i64, status: ProjectStatus) -> LedgerResult<OpRef>;

    /// Submit one bulk of contract calls. `min_confirmations = 0` is
    /// fire-and-forget: the returned OpRef is provisional.
    async fn submit_batch(
        &self,
        operations: Vec<BatchOperation>,
        min_confirmations: u32,
    ) -> LedgerResult<OpRef>;

    /// Look up a purchase operation by hash. The explorer indexes
    /// operations asynchronously, so a fresh hash may legitimately
    /// return `OperationNotFound` for a while.
    async fn lookup_operation(&self, ophash: &str) -> LedgerResult<PurchaseOp>;

    /// Verify a wallet's signature over a message.
    async fn verify_signature(
        &self,
        wallet: &str,
        signature: &str,
        message: &str,
    ) -> LedgerResult<bool>;

    /// Next token id the gallery contract would allocate. Queried once
    /// per project completion; the allocated id is then fixed.
    async fn query_next_token_id(&self) -> LedgerResult<u64>;
}
