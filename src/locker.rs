// Locker and trade-locker indices (spec §4.K). Both map a locker key to the
// coins currently stored in it; the trade variant additionally keeps a
// secondary `coin_type -> keys` index for marketplace listing. Index
// mutations always happen *after* the database change that created or
// removed the locker, never before.

use crate::denomination::{Denomination, Sn};
use parking_lot::Mutex;
use std::collections::HashMap;

pub type LockerKey = [u8; 16];
pub type Coin = (Denomination, Sn);

#[derive(Default)]
struct LockerMap {
    coins: HashMap<LockerKey, Vec<Coin>>,
}

/// `key -> coins` index shared by `store_sum`/`remove`/`peek`/`put_for_sale`.
pub struct LockerIndex {
    inner: Mutex<LockerMap>,
}

impl LockerIndex {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LockerMap::default()),
        }
    }

    pub fn add(&self, key: LockerKey, coins: Vec<Coin>) {
        self.inner.lock().coins.entry(key).or_default().extend(coins);
    }

    pub fn remove(&self, key: &LockerKey) -> Option<Vec<Coin>> {
        self.inner.lock().coins.remove(key)
    }

    pub fn peek(&self, key: &LockerKey) -> Option<Vec<Coin>> {
        self.inner.lock().coins.get(key).cloned()
    }

    pub fn contains(&self, key: &LockerKey) -> bool {
        self.inner.lock().coins.contains_key(key)
    }

    /// First key whose leading bytes match `prefix` (spec §4.F type-2 key
    /// derivation looks up a locker by a locator prefix, not a full key).
    pub fn find_by_prefix(&self, prefix: &[u8]) -> Option<LockerKey> {
        self.inner
            .lock()
            .coins
            .keys()
            .find(|k| k.starts_with(prefix))
            .copied()
    }
}

impl Default for LockerIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct TradeMap {
    coins: HashMap<LockerKey, Vec<Coin>>,
    /// listing key -> (coin type, asking price); price is the amount the
    /// payment oracle must confirm before `buy` transfers the coins.
    for_sale: HashMap<LockerKey, (u8, u32)>,
    by_coin_type: HashMap<u8, Vec<LockerKey>>,
}

/// `key -> coins` plus `coin_type -> keys` for listing lockers for sale.
pub struct TradeLockerIndex {
    inner: Mutex<TradeMap>,
}

impl TradeLockerIndex {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TradeMap::default()),
        }
    }

    pub fn add(&self, key: LockerKey, coins: Vec<Coin>) {
        self.inner.lock().coins.entry(key).or_default().extend(coins);
    }

    pub fn remove(&self, key: &LockerKey) -> Option<Vec<Coin>> {
        let mut guard = self.inner.lock();
        if let Some((coin_type, _)) = guard.for_sale.remove(key) {
            if let Some(keys) = guard.by_coin_type.get_mut(&coin_type) {
                keys.retain(|k| k != key);
            }
        }
        guard.coins.remove(key)
    }

    pub fn peek(&self, key: &LockerKey) -> Option<Vec<Coin>> {
        self.inner.lock().coins.get(key).cloned()
    }

    pub fn put_for_sale(&self, key: LockerKey, coin_type: u8, price: u32) {
        let mut guard = self.inner.lock();
        guard.for_sale.insert(key, (coin_type, price));
        guard.by_coin_type.entry(coin_type).or_default().push(key);
    }

    /// Asking price for a listed trade locker, if it is currently for sale.
    pub fn price_of(&self, key: &LockerKey) -> Option<u32> {
        self.inner.lock().for_sale.get(key).map(|(_, price)| *price)
    }

    pub fn list_for_sale(&self, coin_type: u8) -> Vec<LockerKey> {
        self.inner
            .lock()
            .by_coin_type
            .get(&coin_type)
            .cloned()
            .unwrap_or_default()
    }

    fn take_coins_locked(guard: &mut TradeMap, key: &LockerKey) -> Option<Vec<Coin>> {
        if let Some((coin_type, _)) = guard.for_sale.remove(key) {
            if let Some(keys) = guard.by_coin_type.get_mut(&coin_type) {
                keys.retain(|k| k != key);
            }
        }
        guard.coins.remove(key)
    }

    /// Move a trade locker's coins into a buyer's locker. Lock order:
    /// trade index first, then the destination locker index (spec §4.K).
    pub fn buy(&self, trade_key: &LockerKey, dest: &LockerIndex, dest_key: LockerKey) -> Option<Vec<Coin>> {
        let mut trade_guard = self.inner.lock();
        let coins = Self::take_coins_locked(&mut trade_guard, trade_key)?;
        drop(trade_guard);
        dest.add(dest_key, coins.clone());
        Some(coins)
    }
}

impl Default for TradeLockerIndex {
    fn default() -> Self {
        Self::new()
    }
}
