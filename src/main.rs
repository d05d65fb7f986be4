use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use claude_proxy::backend::claude::ClaudeCliRunner;
use claude_proxy::backend::BackendRunner;
use claude_proxy::{config, metrics, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "claude_proxy=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Load configuration (.env)
    let env_path = Path::new(".env");
    if env_path.exists() {
        match dotenvy::from_path(env_path) {
            Ok(_) => tracing::info!("Loaded .env file successfully"),
            Err(e) => tracing::error!("Failed to load .env file: {}", e),
        }
    }

    let config = Arc::new(config::AppConfig::from_env()?);
    let server_port = config.server_port;
    tracing::info!("Configuration loaded successfully");

    // 3. Install the Prometheus recorder
    let prometheus = metrics::install()?;
    tracing::info!("Metrics recorder installed");

    // 4. Initialize the CLI backend
    let backend: Arc<dyn BackendRunner> = Arc::new(ClaudeCliRunner::new(&config));
    if backend.is_available().await {
        tracing::info!("claude CLI is available ({})", config.claude_bin);
    } else {
        tracing::warn!(
            "claude CLI is not available ({}); requests will fail until it is",
            config.claude_bin
        );
    }

    // 5. Build routes and start the server
    let app = routes::build_router(config, backend, prometheus);

    let addr = SocketAddr::from(([0, 0, 0, 0], server_port));
    tracing::info!("Server listening on http://{}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
