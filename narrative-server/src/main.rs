//! Narrative server - HTTP front end for the narrative engine.

mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use clap::Parser;
use narrative_core::{EngineConfig, SessionRegistry};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "narrative-server")]
#[command(about = "HTTP server for the turn-based narrative engine")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "5000")]
    port: u16,

    /// Run event prediction every N turns (0 disables it)
    #[arg(long, default_value = "5")]
    prediction_interval: u32,

    /// Background predictions allowed in flight per session
    #[arg(long, default_value = "1")]
    max_background_predictions: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("narrative_server=info".parse()?)
                .add_directive("narrative_core=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let config = EngineConfig::new()
        .with_prediction_interval(args.prediction_interval)
        .with_max_background_predictions(args.max_background_predictions);
    let registry = SessionRegistry::from_env(config)?;
    let state = AppState::new(registry);
    let registry = Arc::clone(&state.registry);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .nest("/api", routes::api_router())
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("waiting for background predictions");
    registry.settle_all().await;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
    }
}
