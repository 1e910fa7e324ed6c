//! tallyd: the tally indexer daemon.
//!
//! Opens every chain store in the data directory and serves the read-only
//! JSON-RPC surface over a Unix socket. Syncing against an upstream node
//! is driven through the `tally-state` library by an external
//! orchestrator; this process owns the stores and answers queries.

mod config;
mod rpc;

use std::sync::Arc;

use tracing::{error, info};

use crate::config::DaemonConfig;
use crate::rpc::RpcServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = DaemonConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("tally={}", config.advanced.log_level).parse()?),
        )
        .init();

    info!("tally daemon starting");

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    let runtime = Arc::new(tally_runtime::Runtime::new()?);
    let client = Arc::new(tally_state::OfflineClient);

    let chains = tally_state::sync::open_all(&data_dir, client, runtime)?;
    info!(chains = chains.len(), "chain stores opened");

    let registry = Arc::new(tally_state::Registry::new());
    for chain in &chains {
        registry.insert(chain.handle());
    }

    let socket_path = data_dir.join("tallyd.sock");
    let rpc_server = RpcServer::new(Arc::clone(&registry), socket_path.clone());

    tokio::select! {
        result = rpc_server.run() => {
            if let Err(e) = result {
                error!("RPC server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, shutting down");
        }
    }

    // Drop the read handles before the writers so each store's WAL and SHM
    // files are reclaimed on close.
    drop(rpc_server);
    drop(registry);
    for chain in chains {
        chain.close();
    }
    let _ = std::fs::remove_file(&socket_path);

    info!("daemon stopped");
    Ok(())
}
