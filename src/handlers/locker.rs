// Locker and trade-locker handlers (spec §4.H, §4.K). Every mutation
// follows the rule "database update first, then index update": the coin
// store is always the source of truth, the indices are a derived view.

use crate::denomination::{An, Denomination, Sn};
use crate::error::NodeError;
use crate::handlers::{current_mfs, pack_bits, put_coin, Cursor};
use crate::locker::Coin;
use crate::protocol::dispatch::HandlerContext;
use crate::status::Status;
use crate::store::Record;
use futures::future::BoxFuture;
use std::sync::Arc;

const LOCKER_SUFFIX: [u8; 4] = [0xff, 0xff, 0xff, 0xff];
const TRADE_SUFFIX: [u8; 2] = [0xee, 0xee];

enum Kind {
    Locker,
    Trade,
}

fn classify(locker_an: &An) -> Option<Kind> {
    if locker_an[12..16] == LOCKER_SUFFIX {
        Some(Kind::Locker)
    } else if locker_an[14..16] == TRADE_SUFFIX {
        Some(Kind::Trade)
    } else {
        None
    }
}

fn xor_coins(ctx: &HandlerContext, coins: &[Coin]) -> Result<An, NodeError> {
    let mut acc = [0u8; 16];
    for (den, sn) in coins {
        let record = ctx.store.read_record(*den, *sn)?;
        for i in 0..16 {
            acc[i] ^= record.an[i];
        }
    }
    Ok(acc)
}

fn store_into(ctx: &HandlerContext, coins: &[Coin], locker_an: An) -> Result<(), NodeError> {
    for (den, sn) in coins {
        ctx.store.write_record(
            *den,
            *sn,
            Record {
                an: locker_an,
                mfs: current_mfs(),
            },
        )?;
    }
    match classify(&locker_an) {
        Some(Kind::Locker) => ctx.lockers.add(locker_an, coins.to_vec()),
        Some(Kind::Trade) => ctx.trade_lockers.add(locker_an, coins.to_vec()),
        None => return Err(NodeError::InvalidPan),
    }
    Ok(())
}

/// Request: `sum: An`, `locker_an: An`, `count: u16`, then `count`
/// times `(den, sn)`. XOR-accumulates the coins' currently stored ANs;
/// on a match with `sum`, overwrites each coin's AN with `locker_an`
/// and adds the locker (or trade locker, by `locker_an`'s suffix
/// pattern) to its index (spec §4.H, §8 round-trip property).
pub fn store_sum(ctx: Arc<HandlerContext>, payload: Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)> {
    Box::pin(async move {
        let mut cur = Cursor::new(&payload);
        let parsed = (|| -> Result<_, NodeError> {
            let sum = cur.an()?;
            let locker_an = cur.an()?;
            let count = cur.u16()?;
            let mut coins = Vec::with_capacity(count as usize);
            for _ in 0..count {
                coins.push(cur.coin()?);
            }
            Ok((sum, locker_an, coins))
        })();
        let (sum, locker_an, coins) = match parsed {
            Ok(v) => v,
            Err(e) => return (e.status(), Vec::new()),
        };

        let acc = match xor_coins(&ctx, &coins) {
            Ok(a) => a,
            Err(e) => return (e.status(), Vec::new()),
        };
        if acc != sum {
            return (Status::AmountMismatch, Vec::new());
        }
        match store_into(&ctx, &coins, locker_an) {
            Ok(()) => (Status::Success, Vec::new()),
            Err(e) => (e.status(), Vec::new()),
        }
    })
}

/// Request: `count: u16` groups, each `(sum: An, locker_an: An,
/// coin_count: u16, coins...)`. Applies [`store_sum`]'s rule per group
/// independently. Response: one bit per group.
pub fn store_multiple_sum(ctx: Arc<HandlerContext>, payload: Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)> {
    Box::pin(async move {
        let mut cur = Cursor::new(&payload);
        let group_count = match cur.u16() {
            Ok(c) => c,
            Err(e) => return (e.status(), Vec::new()),
        };
        let mut bits = Vec::with_capacity(group_count as usize);
        for _ in 0..group_count {
            let parsed = (|| -> Result<_, NodeError> {
                let sum = cur.an()?;
                let locker_an = cur.an()?;
                let coin_count = cur.u16()?;
                let mut coins = Vec::with_capacity(coin_count as usize);
                for _ in 0..coin_count {
                    coins.push(cur.coin()?);
                }
                Ok((sum, locker_an, coins))
            })();
            let (sum, locker_an, coins) = match parsed {
                Ok(v) => v,
                Err(e) => return (e.status(), Vec::new()),
            };
            let ok = match xor_coins(&ctx, &coins) {
                Ok(acc) if acc == sum => store_into(&ctx, &coins, locker_an).is_ok(),
                _ => false,
            };
            bits.push(ok);
        }
        (crate::handlers::all_pass_status(&bits), pack_bits(&bits))
    })
}

/// Request: `key: An`. Frees every coin currently in the locker (MFS =
/// 0) before removing the key from the index (spec §4.K's
/// database-then-index ordering). Response: `count: u16` then the
/// removed `(den, sn)` pairs; `BadCoins` if the key is unknown.
pub fn remove(ctx: Arc<HandlerContext>, payload: Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)> {
    Box::pin(async move {
        let mut cur = Cursor::new(&payload);
        let key = match cur.an() {
            Ok(k) => k,
            Err(e) => return (e.status(), Vec::new()),
        };
        let Some(coins) = ctx.lockers.peek(&key) else {
            return (Status::BadCoins, Vec::new());
        };
        for (den, sn) in &coins {
            if let Ok(record) = ctx.store.read_record(*den, *sn) {
                let _ = ctx.store.write_record(*den, *sn, Record { an: record.an, mfs: 0 });
            }
        }
        ctx.lockers.remove(&key);

        let mut out = (coins.len() as u16).to_be_bytes().to_vec();
        for (den, sn) in coins {
            put_coin(&mut out, den, sn);
        }
        (Status::Success, out)
    })
}

/// Request: `key: An`. Read-only lookup into the locker index.
/// Response: `count: u16` then `(den, sn)` pairs; `BadCoins` if absent.
pub fn peek(ctx: Arc<HandlerContext>, payload: Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)> {
    Box::pin(async move {
        let mut cur = Cursor::new(&payload);
        let key = match cur.an() {
            Ok(k) => k,
            Err(e) => return (e.status(), Vec::new()),
        };
        match ctx.lockers.peek(&key) {
            Some(coins) => {
                let mut out = (coins.len() as u16).to_be_bytes().to_vec();
                for (den, sn) in coins {
                    put_coin(&mut out, den, sn);
                }
                (Status::Success, out)
            }
            None => (Status::BadCoins, Vec::new()),
        }
    })
}

/// Request: `key: An`, `coin_type: u8`, `price: u32`. Lists an existing
/// trade locker for sale under `coin_type` at `price` (spec §1/§6: the
/// amount the payment oracle must later confirm before `buy` succeeds).
pub fn put_for_sale(ctx: Arc<HandlerContext>, payload: Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)> {
    Box::pin(async move {
        let mut cur = Cursor::new(&payload);
        let parsed = (|| -> Result<_, NodeError> {
            let key = cur.an()?;
            let coin_type = cur.u8()?;
            let price = cur.u32()?;
            Ok((key, coin_type, price))
        })();
        let (key, coin_type, price) = match parsed {
            Ok(v) => v,
            Err(e) => return (e.status(), Vec::new()),
        };
        if ctx.trade_lockers.peek(&key).is_none() {
            return (Status::BadCoins, Vec::new());
        }
        ctx.trade_lockers.put_for_sale(key, coin_type, price);
        (Status::Success, Vec::new())
    })
}

/// Request: `coin_type: u8`. Response: `count: u16` then the listed
/// trade locker keys (16 bytes each).
pub fn list_lockers_for_sale(ctx: Arc<HandlerContext>, payload: Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)> {
    Box::pin(async move {
        let mut cur = Cursor::new(&payload);
        let coin_type = match cur.u8() {
            Ok(c) => c,
            Err(e) => return (e.status(), Vec::new()),
        };
        let keys = ctx.trade_lockers.list_for_sale(coin_type);
        let mut out = (keys.len() as u16).to_be_bytes().to_vec();
        for key in keys {
            out.extend_from_slice(&key);
        }
        (Status::Success, out)
    })
}

/// Request: `trade_key: An`, `dest_key: An`, `currency_type: u8`,
/// `receipt: var_bytes`, `seller_address: string`, `tx_id: string`.
/// Looks up the listing's asking price, asks the payment oracle to
/// confirm the buyer paid it, and only then moves the trade locker's
/// coins into the buyer's locker (trade-index removal before
/// destination-locker addition, spec §4.K). `BadCoins` if `trade_key`
/// is not for sale or the oracle does not report success.
pub fn buy(ctx: Arc<HandlerContext>, payload: Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)> {
    Box::pin(async move {
        let mut cur = Cursor::new(&payload);
        let parsed = (|| -> Result<_, NodeError> {
            let trade_key = cur.an()?;
            let dest_key = cur.an()?;
            let currency_type = cur.u8()?;
            let receipt = cur.var_bytes()?.to_vec();
            let seller_address = cur.string()?;
            let tx_id = cur.string()?;
            Ok((trade_key, dest_key, currency_type, receipt, seller_address, tx_id))
        })();
        let (trade_key, dest_key, currency_type, receipt, seller_address, tx_id) = match parsed {
            Ok(v) => v,
            Err(e) => return (e.status(), Vec::new()),
        };

        let Some(price) = ctx.trade_lockers.price_of(&trade_key) else {
            return (Status::BadCoins, Vec::new());
        };

        let outcome = ctx
            .payment_oracle
            .check_payment(crate::oracle::PaymentRequest {
                currency_type,
                receipt,
                server_private_key: ctx.config.payment_private_key,
                price,
                seller_address,
                tx_id,
            })
            .await;
        if outcome != crate::oracle::PaymentOutcome::Success {
            return (Status::BadCoins, Vec::new());
        }

        match ctx.trade_lockers.buy(&trade_key, &ctx.lockers, dest_key) {
            Some(coins) => {
                let mut out = (coins.len() as u16).to_be_bytes().to_vec();
                for (den, sn) in coins {
                    put_coin(&mut out, den, sn);
                }
                (Status::Success, out)
            }
            None => (Status::BadCoins, Vec::new()),
        }
    })
}

/// Request: `key: An`. Same as [`remove`] but against the trade locker
/// index.
pub fn remove_trade_locker(ctx: Arc<HandlerContext>, payload: Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)> {
    Box::pin(async move {
        let mut cur = Cursor::new(&payload);
        let key = match cur.an() {
            Ok(k) => k,
            Err(e) => return (e.status(), Vec::new()),
        };
        let Some(coins) = ctx.trade_lockers.peek(&key) else {
            return (Status::BadCoins, Vec::new());
        };
        for (den, sn) in &coins {
            if let Ok(record) = ctx.store.read_record(*den, *sn) {
                let _ = ctx.store.write_record(*den, *sn, Record { an: record.an, mfs: 0 });
            }
        }
        ctx.trade_lockers.remove(&key);

        let mut out = (coins.len() as u16).to_be_bytes().to_vec();
        for (den, sn) in coins {
            put_coin(&mut out, den, sn);
        }
        (Status::Success, out)
    })
}

/// Request: `key: An`. Read-only lookup into the trade locker index.
pub fn peek_trade_locker(ctx: Arc<HandlerContext>, payload: Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)> {
    Box::pin(async move {
        let mut cur = Cursor::new(&payload);
        let key = match cur.an() {
            Ok(k) => k,
            Err(e) => return (e.status(), Vec::new()),
        };
        match ctx.trade_lockers.peek(&key) {
            Some(coins) => {
                let mut out = (coins.len() as u16).to_be_bytes().to_vec();
                for (den, sn) in coins {
                    put_coin(&mut out, den, sn);
                }
                (Status::Success, out)
            }
            None => (Status::BadCoins, Vec::new()),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{AlwaysSucceedsPaymentOracle, UnconfiguredPaymentOracle};
    use crate::test_support::{test_context, test_context_with};

    fn den0() -> Denomination {
        Denomination::new(0).unwrap()
    }

    fn empty_payment_proof(buy_req: &mut Vec<u8>) {
        buy_req.push(0); // currency_type
        buy_req.extend_from_slice(&0u16.to_be_bytes()); // receipt len
        buy_req.extend_from_slice(&0u16.to_be_bytes()); // seller_address len
        buy_req.extend_from_slice(&0u16.to_be_bytes()); // tx_id len
    }

    #[tokio::test]
    async fn store_sum_then_remove_round_trips() {
        let ctx = Arc::new(test_context());
        let coins = [(den0(), Sn(10)), (den0(), Sn(11))];
        let mut acc = [0u8; 16];
        for (den, sn) in coins {
            let r = ctx.store.read_record(den, sn).unwrap();
            for i in 0..16 {
                acc[i] ^= r.an[i];
            }
        }
        let mut locker_an = [0x7au8; 16];
        locker_an[12..16].copy_from_slice(&LOCKER_SUFFIX);

        let mut req = acc.to_vec();
        req.extend_from_slice(&locker_an);
        req.extend_from_slice(&2u16.to_be_bytes());
        for (den, sn) in coins {
            put_coin(&mut req, den, sn);
        }
        let (status, _) = store_sum(ctx.clone(), req).await;
        assert_eq!(status, Status::Success);

        let mut peek_req = locker_an.to_vec();
        let (status, body) = peek(ctx.clone(), peek_req.clone()).await;
        assert_eq!(status, Status::Success);
        assert_eq!(u16::from_be_bytes([body[0], body[1]]), 2);

        let (status, _) = remove(ctx.clone(), peek_req.split_off(0)).await;
        assert_eq!(status, Status::Success);
        for (den, sn) in coins {
            assert!(!ctx.store.read_record(den, sn).unwrap().is_owned());
        }
        let (status, _) = peek(ctx, locker_an.to_vec()).await;
        assert_eq!(status, Status::BadCoins);
    }

    #[tokio::test]
    async fn buy_moves_trade_locker_into_destination() {
        let ctx = Arc::new(test_context_with([0u8; 16], Arc::new(AlwaysSucceedsPaymentOracle)));
        let coin = (den0(), Sn(20));
        let r = ctx.store.read_record(coin.0, coin.1).unwrap();
        let mut trade_an = [0x5bu8; 16];
        trade_an[14..16].copy_from_slice(&TRADE_SUFFIX);

        let mut req = r.an.to_vec();
        req.extend_from_slice(&trade_an);
        req.extend_from_slice(&1u16.to_be_bytes());
        put_coin(&mut req, coin.0, coin.1);
        let (status, _) = store_sum(ctx.clone(), req).await;
        assert_eq!(status, Status::Success);

        let mut for_sale_req = trade_an.to_vec();
        for_sale_req.push(3); // coin_type
        for_sale_req.extend_from_slice(&2500u32.to_be_bytes()); // price
        let (status, _) = put_for_sale(ctx.clone(), for_sale_req).await;
        assert_eq!(status, Status::Success);

        let dest_key = [0x99u8; 16];
        let mut buy_req = trade_an.to_vec();
        buy_req.extend_from_slice(&dest_key);
        empty_payment_proof(&mut buy_req);
        let (status, body) = buy(ctx.clone(), buy_req).await;
        assert_eq!(status, Status::Success);
        assert_eq!(u16::from_be_bytes([body[0], body[1]]), 1);

        let (status, body) = peek(ctx, dest_key.to_vec()).await;
        assert_eq!(status, Status::Success);
        assert_eq!(u16::from_be_bytes([body[0], body[1]]), 1);
    }

    #[tokio::test]
    async fn buy_rejects_when_payment_oracle_does_not_confirm() {
        let ctx = Arc::new(test_context_with([0u8; 16], Arc::new(UnconfiguredPaymentOracle)));
        let coin = (den0(), Sn(21));
        let r = ctx.store.read_record(coin.0, coin.1).unwrap();
        let mut trade_an = [0x5cu8; 16];
        trade_an[14..16].copy_from_slice(&TRADE_SUFFIX);

        let mut req = r.an.to_vec();
        req.extend_from_slice(&trade_an);
        req.extend_from_slice(&1u16.to_be_bytes());
        put_coin(&mut req, coin.0, coin.1);
        let (status, _) = store_sum(ctx.clone(), req).await;
        assert_eq!(status, Status::Success);

        let mut for_sale_req = trade_an.to_vec();
        for_sale_req.push(3);
        for_sale_req.extend_from_slice(&2500u32.to_be_bytes());
        let (status, _) = put_for_sale(ctx.clone(), for_sale_req).await;
        assert_eq!(status, Status::Success);

        let dest_key = [0x98u8; 16];
        let mut buy_req = trade_an.to_vec();
        buy_req.extend_from_slice(&dest_key);
        empty_payment_proof(&mut buy_req);
        let (status, _) = buy(ctx.clone(), buy_req).await;
        assert_eq!(status, Status::BadCoins);

        // coins never moved
        let (status, _) = peek_trade_locker(ctx, trade_an.to_vec()).await;
        assert_eq!(status, Status::Success);
    }
}
