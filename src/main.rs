use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{fmt, EnvFilter};

use blockstory::generation::GenerationClient;
use blockstory::routes::{app, AppState};
use blockstory::store::{FileStore, MemoryStore, ProjectStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let webhook_url = std::env::var("GENERATION_WEBHOOK_URL").ok();
    let api_key = std::env::var("GENERATION_API_KEY").ok();
    let timeout: u64 = std::env::var("GENERATION_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(120);
    match &webhook_url {
        Some(url) => tracing::info!(%url, "using generation provider webhook"),
        None => tracing::info!("GENERATION_WEBHOOK_URL not set, running in demo mode"),
    }

    let store: Arc<dyn ProjectStore> = match std::env::var("STORE").as_deref() {
        Ok("memory") => {
            tracing::info!("using in-memory project store");
            Arc::new(MemoryStore::default())
        }
        _ => {
            let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "data".into());
            tracing::info!(%data_dir, "using file-backed project store");
            Arc::new(FileStore::new(data_dir))
        }
    };

    let state = AppState {
        store,
        generator: Arc::new(GenerationClient::new(
            webhook_url,
            api_key,
            Duration::from_secs(timeout),
        )?),
    };

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}
