// Change handlers (spec §4.H): get_available_change_sns, break, join.
// `break` turns one coin into ten of the next lower denomination; `join`
// is the inverse. Both couple a discovery call (which reserves pages)
// with a later mutating call that proves it holds those reservations.

use crate::denomination::{Denomination, Sn};
use crate::error::NodeError;
use crate::handlers::{current_mfs, Cursor, CHANGE_MAX_AVAILABLE_COINS, DENOMINATION_STEP_FACTOR};
use crate::protocol::dispatch::HandlerContext;
use crate::status::Status;
use crate::store::Record;
use futures::future::BoxFuture;
use rand::RngCore;
use std::sync::Arc;

const OP_BREAK: u8 = 1;
const OP_JOIN: u8 = 2;

/// Request: `session: u32`, `op: u8` (1=BREAK, 2=JOIN), `den: i8`.
/// Reserves up to [`CHANGE_MAX_AVAILABLE_COINS`] free pages in the
/// target denomination (`den - 1` for BREAK, `den + 1` for JOIN) on
/// behalf of `session` and returns their serial numbers (spec §4.H, §8
/// scenario 2-3).
pub fn get_available_change_sns(ctx: Arc<HandlerContext>, payload: Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)> {
    Box::pin(async move {
        let mut cur = Cursor::new(&payload);
        let parsed = (|| -> Result<_, NodeError> {
            let session = cur.u32()?;
            let op = cur.u8()?;
            let den = cur.den()?;
            Ok((session, op, den))
        })();
        let (session, op, den) = match parsed {
            Ok(v) => v,
            Err(e) => return (e.status(), Vec::new()),
        };

        let target = match op {
            OP_BREAK => den.step_down(),
            OP_JOIN => den.step_up(),
            _ => None,
        };
        let Some(target) = target else {
            return (Status::InvalidSnOrDenomination, Vec::new());
        };

        let sns = ctx.store.bitmap.available_sns(target, CHANGE_MAX_AVAILABLE_COINS);
        for sn in &sns {
            if let Err(e) = ctx.store.reserve_page(target, *sn, session) {
                return (e.status(), Vec::new());
            }
        }

        let mut out = Vec::with_capacity(3 + sns.len() * 4);
        out.push(target.value() as u8);
        out.extend_from_slice(&(sns.len() as u16).to_be_bytes());
        for sn in sns {
            out.extend_from_slice(&sn.0.to_be_bytes());
        }
        (Status::Success, out)
    })
}

/// Request: `session: u32`, `src_den: i8`, `src_sn: u32`, `src_an: [u8;
/// 16]`, `target_den: i8`, `count: u16` (must equal
/// [`DENOMINATION_STEP_FACTOR`]), then `count` times `(sn: u32, an:
/// [u8; 16])`. Authenticates the source coin, checks every target page
/// is reserved by `session`, installs the proposed ANs, then destroys
/// the source (spec §4.H, §8 scenario 2).
pub fn break_coin(ctx: Arc<HandlerContext>, payload: Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)> {
    Box::pin(async move {
        let mut cur = Cursor::new(&payload);
        let parsed = (|| -> Result<_, NodeError> {
            let session = cur.u32()?;
            let src_den = cur.den()?;
            let src_sn = cur.sn()?;
            let src_an = cur.an()?;
            let target_den = cur.den()?;
            let count = cur.u16()?;
            let mut targets = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let sn = cur.sn()?;
                let an = cur.an()?;
                targets.push((sn, an));
            }
            Ok((session, src_den, src_sn, src_an, target_den, targets))
        })();
        let (session, src_den, src_sn, src_an, target_den, targets) = match parsed {
            Ok(v) => v,
            Err(e) => return (e.status(), Vec::new()),
        };

        if targets.len() != DENOMINATION_STEP_FACTOR {
            return (Status::CoinsNotDivisible, Vec::new());
        }
        if Some(target_den) != src_den.step_down() {
            return (Status::InvalidSnOrDenomination, Vec::new());
        }
        match ctx.store.read_record(src_den, src_sn) {
            Ok(record) if record.an == src_an => {}
            Ok(_) => return (Status::BadCoins, Vec::new()),
            Err(e) => return (e.status(), Vec::new()),
        }
        for (sn, _) in &targets {
            match ctx.store.is_reserved_by(target_den, *sn, session, ctx.config.reservation_ttl) {
                Ok(true) => {}
                Ok(false) => return (Status::PageNotReserved, Vec::new()),
                Err(e) => return (e.status(), Vec::new()),
            }
        }

        for (sn, an) in &targets {
            if let Err(e) = ctx.store.write_record(
                target_den,
                *sn,
                Record {
                    an: *an,
                    mfs: current_mfs(),
                },
            ) {
                return (e.status(), Vec::new());
            }
        }
        let mut destroyed = [0u8; 16];
        rand::rng().fill_bytes(&mut destroyed);
        let destroyed_an = crate::crypto::legacy_hash(&[&destroyed]);
        if let Err(e) = ctx.store.write_record(
            src_den,
            src_sn,
            Record {
                an: destroyed_an,
                mfs: 0,
            },
        ) {
            return (e.status(), Vec::new());
        }

        (Status::Success, Vec::new())
    })
}

/// Request: `session: u32`, `src_den: i8`, `count: u16` (must equal
/// [`DENOMINATION_STEP_FACTOR`]), then `count` times `(sn: u32, an:
/// [u8; 16])`, then `target_den: i8`, `target_sn: u32`, `target_an:
/// [u8; 16]`. Authenticates every source coin, checks the target page
/// is reserved by `session`, frees the sources, and installs the
/// target (spec §4.H, §8 scenario 3).
pub fn join(ctx: Arc<HandlerContext>, payload: Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)> {
    Box::pin(async move {
        let mut cur = Cursor::new(&payload);
        let parsed = (|| -> Result<_, NodeError> {
            let session = cur.u32()?;
            let src_den = cur.den()?;
            let count = cur.u16()?;
            let mut sources = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let sn = cur.sn()?;
                let an = cur.an()?;
                sources.push((sn, an));
            }
            let target_den = cur.den()?;
            let target_sn = cur.sn()?;
            let target_an = cur.an()?;
            Ok((session, src_den, sources, target_den, target_sn, target_an))
        })();
        let (session, src_den, sources, target_den, target_sn, target_an) = match parsed {
            Ok(v) => v,
            Err(e) => return (e.status(), Vec::new()),
        };

        if sources.len() != DENOMINATION_STEP_FACTOR {
            return (Status::CoinsNotDivisible, Vec::new());
        }
        if Some(target_den) != src_den.step_up() {
            return (Status::InvalidSnOrDenomination, Vec::new());
        }
        for (sn, an) in &sources {
            match ctx.store.read_record(src_den, *sn) {
                Ok(record) if record.an == *an => {}
                Ok(_) => return (Status::BadCoins, Vec::new()),
                Err(e) => return (e.status(), Vec::new()),
            }
        }
        match ctx.store.is_reserved_by(target_den, target_sn, session, ctx.config.reservation_ttl) {
            Ok(true) => {}
            Ok(false) => return (Status::PageNotReserved, Vec::new()),
            Err(e) => return (e.status(), Vec::new()),
        }

        for (sn, an) in &sources {
            if let Err(e) = ctx.store.write_record(src_den, *sn, Record { an: *an, mfs: 0 }) {
                return (e.status(), Vec::new());
            }
        }
        if let Err(e) = ctx.store.write_record(
            target_den,
            target_sn,
            Record {
                an: target_an,
                mfs: current_mfs(),
            },
        ) {
            return (e.status(), Vec::new());
        }

        (Status::Success, Vec::new())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_context;

    fn den(v: i8) -> Denomination {
        Denomination::new(v).unwrap()
    }

    fn encode_change_sns(session: u32, op: u8, den: i8) -> Vec<u8> {
        let mut v = session.to_be_bytes().to_vec();
        v.push(op);
        v.push(den as u8);
        v
    }

    #[tokio::test]
    async fn break_turns_one_coin_into_ten() {
        let ctx = Arc::new(test_context());
        let session = 42u32;

        let (status, body) = get_available_change_sns(ctx.clone(), encode_change_sns(session, OP_BREAK, 1)).await;
        assert_eq!(status, Status::Success);
        let target_den = body[0] as i8;
        assert_eq!(target_den, 0);
        let count = u16::from_be_bytes([body[1], body[2]]);
        assert_eq!(count, CHANGE_MAX_AVAILABLE_COINS as u16);
        let mut sns = Vec::new();
        let mut pos = 3;
        for _ in 0..10 {
            sns.push(u32::from_be_bytes(body[pos..pos + 4].try_into().unwrap()));
            pos += 4;
        }

        let src_an = ctx.store.read_record(den(1), Sn(100)).unwrap().an;
        let mut req = session.to_be_bytes().to_vec();
        req.push(1); // src_den
        req.extend_from_slice(&100u32.to_be_bytes());
        req.extend_from_slice(&src_an);
        req.push(0); // target_den
        req.extend_from_slice(&10u16.to_be_bytes());
        let targets_an: Vec<[u8; 16]> = (0..10u8).map(|i| [i; 16]).collect();
        for (sn, an) in sns.iter().zip(targets_an.iter()) {
            req.extend_from_slice(&sn.to_be_bytes());
            req.extend_from_slice(an);
        }

        let (status, _) = break_coin(ctx.clone(), req).await;
        assert_eq!(status, Status::Success);

        let src_after = ctx.store.read_record(den(1), Sn(100)).unwrap();
        assert_eq!(src_after.mfs, 0);
        for (sn, an) in sns.iter().zip(targets_an.iter()) {
            let rec = ctx.store.read_record(den(0), Sn(*sn)).unwrap();
            assert_eq!(&rec.an, an);
            assert!(rec.is_owned());
        }
    }

    #[tokio::test]
    async fn join_requires_reserved_target() {
        let ctx = Arc::new(test_context());
        let session = 7u32;
        let sources: Vec<(Sn, [u8; 16])> = (0..10u32)
            .map(|i| (Sn(i), ctx.store.read_record(den(0), Sn(i)).unwrap().an))
            .collect();

        let mut req = session.to_be_bytes().to_vec();
        req.push(0); // src_den
        req.extend_from_slice(&10u16.to_be_bytes());
        for (sn, an) in &sources {
            req.extend_from_slice(&sn.0.to_be_bytes());
            req.extend_from_slice(an);
        }
        req.push(1); // target_den
        req.extend_from_slice(&200u32.to_be_bytes());
        req.extend_from_slice(&[0xEEu8; 16]);

        let (status, _) = join(ctx.clone(), req.clone()).await;
        assert_eq!(status, Status::PageNotReserved);

        ctx.store.reserve_page(den(1), Sn(200), session).unwrap();
        let (status, _) = join(ctx, req).await;
        assert_eq!(status, Status::Success);
    }
}
