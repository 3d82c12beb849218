// Authentication handlers (spec §4.H): detect, pown, find. These are the
// base primitives every other coin-mutating handler builds on.

use crate::denomination::Sn;
use crate::handlers::{all_pass_status, current_mfs, pack_bits, Cursor};
use crate::protocol::dispatch::HandlerContext;
use crate::status::Status;
use crate::store::Record;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Request: `count: u16`, then `count` times `(den: i8, sn: u32, an: [u8;
/// 16])`. Response: one bit per coin, set iff the stored AN matches.
/// Read-only: no state changes.
pub fn detect(ctx: Arc<HandlerContext>, payload: Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)> {
    Box::pin(async move {
        let mut cur = Cursor::new(&payload);
        let count = match cur.u16() {
            Ok(c) => c,
            Err(e) => return (e.status(), Vec::new()),
        };
        let mut bits = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (den, sn, an) = match (|| -> Result<_, crate::error::NodeError> {
                let (den, sn) = cur.coin()?;
                let an = cur.an()?;
                Ok((den, sn, an))
            })() {
                Ok(v) => v,
                Err(e) => return (e.status(), Vec::new()),
            };
            let matches = match ctx.store.read_record(den, sn) {
                Ok(record) => record.an == an,
                Err(_) => false,
            };
            bits.push(matches);
        }
        (all_pass_status(&bits), pack_bits(&bits))
    })
}

/// Request: `count: u16`, then `count` times `(den, sn, current_an,
/// new_an)`. Authenticates as [`detect`]; on a match, replaces the AN
/// with `new_an`, stamps MFS with the current month, and flips the
/// bitmap bit to owned (spec §4.H).
pub fn pown(ctx: Arc<HandlerContext>, payload: Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)> {
    Box::pin(async move {
        let mut cur = Cursor::new(&payload);
        let count = match cur.u16() {
            Ok(c) => c,
            Err(e) => return (e.status(), Vec::new()),
        };
        let mut bits = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let parsed = (|| -> Result<_, crate::error::NodeError> {
                let (den, sn) = cur.coin()?;
                let current_an = cur.an()?;
                let new_an = cur.an()?;
                Ok((den, sn, current_an, new_an))
            })();
            let (den, sn, current_an, new_an) = match parsed {
                Ok(v) => v,
                Err(e) => return (e.status(), Vec::new()),
            };
            let ok = match ctx.store.read_record(den, sn) {
                Ok(record) if record.an == current_an => ctx
                    .store
                    .write_record(
                        den,
                        sn,
                        Record {
                            an: new_an,
                            mfs: current_mfs(),
                        },
                    )
                    .is_ok(),
                _ => false,
            };
            bits.push(ok);
        }
        (all_pass_status(&bits), pack_bits(&bits))
    })
}

/// Request: `an: [u8; 16]`, `proposed_an: [u8; 16]`, `count: u16`, then
/// `count` times `(den, sn)`. Classifies each coin against the two
/// candidate ANs: matches current -> `0x1`, matches proposed -> `0x2`,
/// neither -> `0x0` (spec §4.H). Response is one byte per coin, in
/// request order.
pub fn find(ctx: Arc<HandlerContext>, payload: Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)> {
    Box::pin(async move {
        let mut cur = Cursor::new(&payload);
        let parsed = (|| -> Result<_, crate::error::NodeError> {
            let an = cur.an()?;
            let proposed_an = cur.an()?;
            let count = cur.u16()?;
            Ok((an, proposed_an, count))
        })();
        let (an, proposed_an, count) = match parsed {
            Ok(v) => v,
            Err(e) => return (e.status(), Vec::new()),
        };

        let mut classes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (den, sn): (_, Sn) = match cur.coin() {
                Ok(v) => v,
                Err(e) => return (e.status(), Vec::new()),
            };
            let class = match ctx.store.read_record(den, sn) {
                Ok(record) if record.an == an => 0x1u8,
                Ok(record) if record.an == proposed_an => 0x2u8,
                _ => 0x0u8,
            };
            classes.push(class);
        }

        let status = if classes.is_empty() {
            Status::FindNeither
        } else if classes.iter().all(|c| *c == 0x1) {
            Status::FindAllAn
        } else if classes.iter().all(|c| *c == 0x2) {
            Status::FindAllPan
        } else if classes.iter().all(|c| *c == 0x0) {
            Status::FindNeither
        } else {
            Status::FindMixed
        };
        (status, classes)
    })
}
