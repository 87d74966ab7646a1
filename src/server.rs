use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::handlers::{
    buy_shares, get_project, health_check, post_update, project_metadata, transition_status,
    AppState,
};

pub fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    Router::new()
        .route("/health", get(health_check))
        .route("/projects/:id", get(get_project))
        .route("/projects/:id/buy", post(buy_shares))
        .route("/projects/:id/status", post(transition_status))
        .route("/projects/:id/metadata", get(project_metadata))
        .route("/projects/:id/updates", post(post_update))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(app: Router, bind_address: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Listening on {}", bind_address);
    axum::serve(listener, app).await?;
    Ok(())
}
