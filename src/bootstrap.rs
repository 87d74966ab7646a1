use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::api::handlers::AppState;
use crate::config::Config;
use crate::error::AppResult;
use crate::ledger::node::{NodeConfig, NodeLedgerClient};
use crate::projects::state_machine::ProjectStateMachine;
use crate::settlement::{ExpiryScanner, SettlementBatcher};
use crate::shares::ShareLedger;
use crate::store::postgres::PgStore;
use crate::store::ProjectStore;

pub async fn initialize_app_state(config: &Config) -> AppResult<(AppState, Arc<ExpiryScanner>)> {
    info!("Initializing application components ...");

    let store: Arc<dyn ProjectStore> = Arc::new(PgStore::connect(&config.database_url).await?);
    info!("✅ Database connected and migrated");

    let ledger = Arc::new(NodeLedgerClient::new(NodeConfig {
        rpc_url: config.rpc_url.clone(),
        explorer_url: config.explorer_url.clone(),
        injector_url: config.injector_url.clone(),
        projects_contract: config.projects_contract.clone(),
        gallery_contract: config.gallery_contract.clone(),
        request_timeout: Duration::from_secs(config.ledger_timeout_secs),
    })?);
    info!("✅ Ledger client ready (contract: {})", config.projects_contract);

    let shares = Arc::new(ShareLedger::new(store.clone(), ledger.clone()));
    let batcher = Arc::new(SettlementBatcher::new(ledger.clone(), shares.clone()));
    let machine = Arc::new(ProjectStateMachine::new(
        store.clone(),
        ledger.clone(),
        shares.clone(),
        batcher,
        config.public_base_url.clone(),
    ));
    let scanner = Arc::new(ExpiryScanner::new(
        store.clone(),
        shares.clone(),
        machine.clone(),
        Duration::from_secs(config.scan_interval_secs),
    ));

    let state = AppState {
        store,
        shares,
        machine,
        ledger,
        minter_wallet: config.minter_wallet.clone(),
    };
    Ok((state, scanner))
}
