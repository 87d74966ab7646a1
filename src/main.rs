mod api;
mod bootstrap;
mod config;
mod error;
mod ledger;
mod projects;
mod server;
mod settlement;
mod shares;
mod store;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug,server=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("🚀 Starting Artcrowd Settlement Backend");

    dotenv::dotenv().ok();
    let config = config::Config::from_env();

    let (state, scanner) = bootstrap::initialize_app_state(&config)
        .await
        .map_err(|e| anyhow::anyhow!("bootstrap failed: {}", e))?;

    // Background sweep closing expired or fully-subscribed sales
    scanner.start();
    info!("⏰ Expiry scanner running every {}s", config.scan_interval_secs);

    let app = server::create_app(state);
    server::run_server(app, &config.bind_address).await?;

    Ok(())
}
