use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use tower_http::cors::CorsLayer;

use in3_server::{
    context::{ChainConfig, HandlerContext},
    handler::EthHandler,
    nodelist::NodeListSynchronizer,
    routes,
    state::AppState,
};

#[derive(Debug, Parser)]
#[command(name = "in3-server")]
#[command(about = "INCUBED node: proven JSON-RPC responses and the registry node list")]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value = "8500")]
    port: u16,

    /// Ethereum JSON-RPC URL of the chain node this server fronts.
    #[arg(long, env = "RPC_URL")]
    rpc_url: String,

    /// Node registry contract address.
    #[arg(long, env = "REGISTRY_ADDRESS")]
    registry: String,

    /// Chain id served, as hex.
    #[arg(long, env = "CHAIN_ID", default_value = "0x1")]
    chain_id: String,

    /// Registry proofs are anchored at least this close to the tip.
    #[arg(long, default_value = "6")]
    min_block_height: u64,

    /// Re-read the node list every N seconds (0 disables refreshing).
    #[arg(long, default_value = "0")]
    nodelist_refresh_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "in3_server=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();

    tracing::info!(chain_id = %cli.chain_id, registry = %cli.registry, "starting in3-server");
    tracing::info!(rpc_url = %cli.rpc_url, "RPC endpoint configured");

    let config = ChainConfig {
        chain_id: cli.chain_id,
        registry: cli.registry,
        rpc_url: cli.rpc_url,
        min_block_height: cli.min_block_height,
    };
    let ctx = Arc::new(HandlerContext::connect(config));

    if let Err(e) = NodeListSynchronizer::new(&ctx).sync(None).await {
        tracing::warn!(error = %e, "initial node list sync failed; will retry on demand");
    }
    if cli.nodelist_refresh_secs > 0 {
        spawn_refresh(ctx.clone(), Duration::from_secs(cli.nodelist_refresh_secs));
    }

    let state = Arc::new(AppState {
        handler: EthHandler::new(ctx),
    });
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    tracing::info!(%addr, "server listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .await
        .context("server error")?;

    Ok(())
}

fn spawn_refresh(ctx: Arc<HandlerContext>, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // the first tick completes immediately and startup already synced
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = NodeListSynchronizer::new(&ctx).sync(None).await {
                tracing::warn!(error = %e, "node list refresh failed");
            }
        }
    });
}

fn build_router(state: Arc<AppState>) -> Router {
    // CORS for browser clients
    let cors = CorsLayer::very_permissive();

    routes::router(state).layer(cors)
}
