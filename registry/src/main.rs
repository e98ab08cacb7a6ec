mod handlers;
mod state;

use crate::state::AppState;
use std::env;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// - En Docker: REGISTRY_BIND=0.0.0.0:8080
/// - Local: mismo default
fn bind_address() -> String {
    env::var("REGISTRY_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("registry=debug,tower_http=info,axum=info")),
        )
        .init();

    let state = AppState::new();
    let app = handlers::build_router(state);

    let listener = TcpListener::bind(bind_address()).await?;
    info!("registry escuchando en {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
