use std::time::Duration;

use async_trait::async_trait;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use reqwest::StatusCode;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::{BatchOperation, LedgerClient, LedgerError, LedgerResult, OpRef, PurchaseOp};
use crate::projects::models::ProjectStatus;

/// Connection settings for the chain node, the indexer API and the
/// operator's signing injector.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub rpc_url: String,
    pub explorer_url: String,
    pub injector_url: String,
    pub projects_contract: String,
    pub gallery_contract: String,
    pub request_timeout: Duration,
}

/// HTTP implementation of [`LedgerClient`]: storage and operation
/// queries go to the node/explorer, submissions go to the injector
/// sidecar holding the platform key.
pub struct NodeLedgerClient {
    config: NodeConfig,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct ExplorerTx {
    sender: ExplorerAddress,
    parameter: Option<ExplorerParameter>,
}

#[derive(Deserialize)]
struct ExplorerAddress {
    address: String,
}

#[derive(Deserialize)]
struct ExplorerParameter {
    entrypoint: String,
    value: serde_json::Value,
}

#[derive(Deserialize)]
struct InjectResponse {
    op_hash: String,
}

impl NodeLedgerClient {
    pub fn new(config: NodeConfig) -> LedgerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(LedgerError::from)?;
        Ok(Self { config, http })
    }

    async fn inject(
        &self,
        operations: Vec<BatchOperation>,
        min_confirmations: u32,
    ) -> LedgerResult<OpRef> {
        let url = format!("{}/bulk", self.config.injector_url);
        let body = serde_json::json!({
            "operations": operations,
            "min_confirmations": min_confirmations,
        });

        let response = self.http.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LedgerError::Rejected(detail));
        }
        let injected: InjectResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::Malformed(e.to_string()))?;
        debug!(op_hash = %injected.op_hash, "bulk injected");
        Ok(OpRef(injected.op_hash))
    }
}

/// The explorer renders contract nats as decimal strings.
fn nat_field(value: &serde_json::Value, key: &str) -> LedgerResult<i64> {
    let field = value
        .get(key)
        .ok_or_else(|| LedgerError::Malformed(format!("missing field {}", key)))?;
    match field {
        serde_json::Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| LedgerError::Malformed(format!("non-integer {}", key))),
        serde_json::Value::String(s) => s
            .parse::<i64>()
            .map_err(|_| LedgerError::Malformed(format!("non-numeric {}", key))),
        _ => Err(LedgerError::Malformed(format!("unexpected type for {}", key))),
    }
}

/// Nats are non-negative; a negative value means the storage shape is
/// not what this client expects.
fn nat_field_u64(value: &serde_json::Value, key: &str) -> LedgerResult<u64> {
    let raw = nat_field(value, key)?;
    u64::try_from(raw).map_err(|_| LedgerError::Malformed(format!("negative {}", key)))
}

/// Ed25519 check over the SHA-256 digest of the signed message.
/// Key and signature travel hex-encoded.
pub fn verify_ed25519(public_key_hex: &str, signature_hex: &str, message: &str) -> bool {
    let Ok(pk_bytes) = hex::decode(public_key_hex) else {
        return false;
    };
    let Ok(pk_arr) = <[u8; 32]>::try_from(pk_bytes.as_slice()) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&pk_arr) else {
        return false;
    };

    let Ok(sig_bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(sig_arr) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
        return false;
    };
    let signature = Signature::from_bytes(&sig_arr);

    let digest = Sha256::digest(message.as_bytes());
    verifying_key.verify(digest.as_slice(), &signature).is_ok()
}

#[async_trait]
impl LedgerClient for NodeLedgerClient {
    async fn project_exists(&self, project_id: i64) -> LedgerResult<bool> {
        let url = format!(
            "{}/v1/contracts/{}/bigmaps/projects/keys/{}",
            self.config.explorer_url, self.config.projects_contract, project_id
        );
        let response = self.http.get(&url).send().await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(false),
            status => Err(LedgerError::Transport(format!(
                "unexpected status {} from explorer",
                status
            ))),
        }
    }

    async fn register_project(&self, project_id: i64, share_price: i64) -> LedgerResult<OpRef> {
        self.inject(
            vec![BatchOperation::CreateProject {
                project_id,
                share_price,
            }],
            0,
        )
        .await
    }

    async fn update_status(&self, project_id: i64, status: ProjectStatus) -> LedgerResult<OpRef> {
        self.inject(vec![BatchOperation::UpdateStatus { project_id, status }], 0)
            .await
    }

    async fn submit_batch(
        &self,
        operations: Vec<BatchOperation>,
        min_confirmations: u32,
    ) -> LedgerResult<OpRef> {
        self.inject(operations, min_confirmations).await
    }

    async fn lookup_operation(&self, ophash: &str) -> LedgerResult<PurchaseOp> {
        let url = format!(
            "{}/v1/operations/transactions/{}",
            self.config.explorer_url, ophash
        );
        let response = self.http.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(LedgerError::OperationNotFound);
        }
        let transactions: Vec<ExplorerTx> = response
            .json()
            .await
            .map_err(|e| LedgerError::Malformed(e.to_string()))?;

        // A bulk may carry several transactions under one hash; the
        // purchase is the buy_shares call.
        let purchase = transactions
            .iter()
            .find(|tx| {
                tx.parameter
                    .as_ref()
                    .is_some_and(|p| p.entrypoint == "buy_shares")
            })
            .ok_or(LedgerError::OperationNotFound)?;

        let parameter = purchase
            .parameter
            .as_ref()
            .ok_or_else(|| LedgerError::Malformed("buy_shares without parameter".into()))?;

        Ok(PurchaseOp {
            project_id: nat_field(&parameter.value, "project_id")?,
            quantity: nat_field(&parameter.value, "shares")?,
            source_wallet: purchase.sender.address.clone(),
        })
    }

    async fn verify_signature(
        &self,
        wallet: &str,
        signature: &str,
        message: &str,
    ) -> LedgerResult<bool> {
        let url = format!(
            "{}/chains/main/blocks/head/context/contracts/{}/manager_key",
            self.config.rpc_url, wallet
        );
        let response = self.http.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let manager_key: Option<String> = response
            .json()
            .await
            .map_err(|e| LedgerError::Malformed(e.to_string()))?;
        let Some(public_key) = manager_key else {
            warn!(wallet, "wallet has no revealed public key");
            return Ok(false);
        };
        Ok(verify_ed25519(&public_key, signature, message))
    }

    async fn query_next_token_id(&self) -> LedgerResult<u64> {
        let url = format!(
            "{}/v1/contracts/{}/storage",
            self.config.explorer_url, self.config.gallery_contract
        );
        let storage: serde_json::Value = self
            .http
            .get(&url)
            .send()
            .await?
            .json()
            .await
            .map_err(|e| LedgerError::Malformed(e.to_string()))?;
        nat_field_u64(&storage, "next_token_id")
    }
}
