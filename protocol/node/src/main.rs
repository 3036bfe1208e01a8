mod config;
mod node;
mod rpc;

use clap::Parser;
use runtime::{from_genesis, load_genesis_from_file, GenesisConfig};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::{Cli, NodeConfig};
use crate::node::{spawn_block_production, Node};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = NodeConfig::load(&cli)?;
    tracing_subscriber::fmt()
        .with_env_filter(config.log_filter.as_str())
        .init();

    let ctx = match &config.genesis {
        Some(path) => {
            info!("loading genesis from {}", path.display());
            load_genesis_from_file(path)?
        }
        None => {
            warn!("no genesis file given, starting devnet genesis");
            from_genesis(GenesisConfig::devnet()?)?
        }
    };
    info!(
        chain_id = %ctx.chain_id,
        state_root = %hex::encode(ctx.state_root()),
        "lumera node starting"
    );

    let addr = config.listen;
    let node = Node::new(ctx, config);
    let producer = spawn_block_production(node.clone());
    let app = rpc::router(node);

    info!("RPC listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    let server = axum::serve(listener, app.into_make_service());

    tokio::select! {
        _ = producer => {
            warn!("block production stopped");
        }
        res = server => {
            if let Err(err) = res {
                warn!("server error: {err}");
            }
        }
    }
    Ok(())
}
