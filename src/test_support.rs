// Shared test fixtures for handler unit tests. Not part of the public
// API; only compiled under `#[cfg(test)]`.

use crate::config::NodeConfig;
use crate::locker::{LockerIndex, TradeLockerIndex};
use crate::oracle::{PaymentOracle, UnconfiguredPaymentOracle};
use crate::protocol::dispatch::HandlerContext;
use crate::store::CoinStore;
use crate::ticket::TicketPool;
use std::sync::Arc;

/// A `HandlerContext` backed by a throwaway temp directory, with a small
/// page range pre-initialized so tests don't pay for all fifteen
/// denominations' full page ranges.
pub fn test_context() -> HandlerContext {
    test_context_with_admin_key([0u8; 16])
}

pub fn test_context_with_admin_key(admin_key: [u8; 16]) -> HandlerContext {
    test_context_with(admin_key, Arc::new(UnconfiguredPaymentOracle))
}

/// Same as [`test_context_with_admin_key`] but with a caller-supplied
/// payment oracle, for tests that drive the marketplace `buy` flow.
pub fn test_context_with(admin_key: [u8; 16], payment_oracle: Arc<dyn PaymentOracle>) -> HandlerContext {
    let dir = tempfile::tempdir().unwrap();
    // Leak the tempdir so it outlives the returned context; test
    // processes are short-lived and the OS reclaims it on exit.
    let path = dir.keep();
    let store = CoinStore::open_range(path, b"test-seed", 64, 0..2).unwrap();

    let mut config = NodeConfig::default();
    config.admin_key = admin_key;
    config.reservation_ttl = std::time::Duration::from_secs(60);

    HandlerContext {
        store: Arc::new(store),
        tickets: Arc::new(TicketPool::new(config.ticket_ttl)),
        lockers: Arc::new(LockerIndex::new()),
        trade_lockers: Arc::new(TradeLockerIndex::new()),
        config: Arc::new(config),
        payment_oracle,
    }
}
