//! Application entrypoint and state wiring.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ledger_indexer::config::Config;
use ledger_indexer::indexer::Indexer;
use ledger_indexer::storage::LedgerStore;
use ledger_indexer::{routes, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();

    // 1) store
    let store = LedgerStore::open(&config.database, config.busy_timeout())?;
    tracing::info!(path = %config.database.display(), "opened ledger store");

    // 2) shared state
    let indexer = Indexer::new(store);
    let height = indexer.current_height().await?;
    tracing::info!(height, "indexed chain loaded");
    let state = AppState::new(indexer);

    // 3) serve
    let app = routes::router(state);
    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    tracing::info!("listening on http://{}", config.listen);
    axum::serve(listener, app).await?;
    Ok(())
}
