// Shared fixtures for the black-box integration tests in this directory.
// Only the crate's public API is used here, the same surface an external
// caller would see.

use raida_node::locker::{LockerIndex, TradeLockerIndex};
use raida_node::oracle::PaymentOracle;
use raida_node::protocol::dispatch::HandlerContext;
use raida_node::store::CoinStore;
use raida_node::ticket::TicketPool;
use raida_node::NodeConfig;
use std::sync::Arc;

/// Builds a `HandlerContext` over a store with only a couple of pages per
/// denomination pre-initialized, instead of all `PAGES_PER_DENOMINATION`,
/// so tests don't write and hash every page file on every run.
pub fn build_context(config: NodeConfig, payment_oracle: Arc<dyn PaymentOracle>) -> Arc<HandlerContext> {
    let store = CoinStore::open_range(config.root.clone(), &config.admin_key, config.max_cached_pages, 0..2).unwrap();
    Arc::new(HandlerContext {
        store: Arc::new(store),
        tickets: Arc::new(TicketPool::new(config.ticket_ttl)),
        lockers: Arc::new(LockerIndex::new()),
        trade_lockers: Arc::new(TradeLockerIndex::new()),
        config: Arc::new(config),
        payment_oracle,
    })
}

/// A default config rooted at a fresh temp directory, with a small page
/// cache so tests don't pay for all fifteen denominations' full ranges.
pub fn scratch_config() -> NodeConfig {
    let dir = tempfile::tempdir().unwrap();
    NodeConfig {
        root: dir.keep(),
        max_cached_pages: 64,
        reservation_ttl: std::time::Duration::from_secs(60),
        ..Default::default()
    }
}
