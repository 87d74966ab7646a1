use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub rpc_url: String,
    pub explorer_url: String,
    pub injector_url: String,
    pub projects_contract: String,
    pub gallery_contract: String,
    pub public_base_url: String,
    pub minter_wallet: String,
    pub scan_interval_secs: u64,
    pub ledger_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/artcrowd".to_string()),
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            rpc_url: std::env::var("CHAIN_RPC_URL")
                .unwrap_or_else(|_| "https://rpc.ghostnet.teztnets.com".to_string()),
            explorer_url: std::env::var("CHAIN_EXPLORER_URL")
                .unwrap_or_else(|_| "https://api.ghostnet.tzkt.io".to_string()),
            injector_url: std::env::var("CHAIN_INJECTOR_URL")
                .unwrap_or_else(|_| "http://localhost:8732".to_string()),
            projects_contract: std::env::var("PROJECTS_CONTRACT").unwrap_or_default(),
            gallery_contract: std::env::var("GALLERY_CONTRACT").unwrap_or_default(),
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            minter_wallet: std::env::var("MINTER_WALLET").unwrap_or_default(),
            scan_interval_secs: env_u64("SCAN_INTERVAL_SECS", 300),
            ledger_timeout_secs: env_u64("LEDGER_TIMEOUT_SECS", 30),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
