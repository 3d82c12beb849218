// RAIDA-style coin authentication node daemon.
//
// Startup order follows spec.md §9: config -> log -> cache+bitmap (via
// CoinStore::open) -> ticket pool -> indices -> dispatcher -> accept loop.
// Shutdown runs the same order in reverse: accept loop stops first, then
// the flusher drains its last pass.

use raida_node::protocol::dispatch::{DispatchTable, HandlerContext};
use raida_node::server::{new_shutdown_flag, request_shutdown, Server};
use raida_node::store::{CoinStore, Flusher};
use raida_node::ticket::TicketPool;
use raida_node::{
    locker::{LockerIndex, TradeLockerIndex},
    oracle::UnconfiguredPaymentOracle,
};
use raida_node::{NodeConfig, NodeError, Result, VERSION};
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    print_banner();

    match run().await {
        Ok(()) => {
            info!("node shut down cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "node init failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "node.json".to_string());

    let config = match NodeConfig::load(&config_path) {
        Ok(cfg) => {
            info!(path = %config_path, "loaded configuration");
            cfg
        }
        Err(e) => {
            warn!(path = %config_path, error = %e, "no usable config file, falling back to defaults");
            NodeConfig::default()
        }
    };

    info!(
        node_id = config.node_id,
        coin_id = config.coin_id,
        root = %config.root.display(),
        listen = %config.listen_address,
        "starting node"
    );

    let store = Arc::new(CoinStore::open(
        config.data_dir(),
        &config.admin_key,
        config.max_cached_pages,
    )?);
    info!("page store ready: cache and free-slot bitmap initialized");

    let tickets = Arc::new(TicketPool::new(config.ticket_ttl));
    let lockers = Arc::new(LockerIndex::new());
    let trade_lockers = Arc::new(TradeLockerIndex::new());
    let config = Arc::new(config);

    let ctx = Arc::new(HandlerContext {
        store: store.clone(),
        tickets,
        lockers,
        trade_lockers,
        config: config.clone(),
        payment_oracle: Arc::new(UnconfiguredPaymentOracle),
    });
    let dispatch = Arc::new(DispatchTable::build());

    let flusher = Arc::new(Flusher::new(store.cache.clone(), store.disk.clone(), config.flush_interval));
    let flusher_finish = flusher.finish_flag();
    let flusher_handle = tokio::spawn(flusher.run());

    let server = Server::bind(&config.listen_address, ctx, dispatch)
        .await
        .map_err(|e| NodeError::Configuration(format!("bind {}: {}", config.listen_address, e)))?;
    let local_addr = server
        .local_addr()
        .map_err(|e| NodeError::Configuration(e.to_string()))?;
    info!(addr = %local_addr, "accepting connections");

    let shutdown_flag = new_shutdown_flag();
    let shutdown_notify = Arc::new(tokio::sync::Notify::new());
    let accept_notify = shutdown_notify.clone();
    let accept_handle = tokio::spawn(server.run(accept_notify));

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| NodeError::Internal(e.to_string()))?;
    info!("received shutdown signal, draining");
    request_shutdown(&shutdown_flag, &shutdown_notify);

    let _ = accept_handle.await;
    flusher_finish.store(true, Ordering::SeqCst);
    let _ = flusher_handle.await;

    Ok(())
}

fn print_banner() {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              RAIDA-style coin authentication node             ║");
    println!("║                        v{:<38}║", VERSION);
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();
}
