// Executive handlers (spec §4.H): admin-authenticated minting and
// bookkeeping operations that operate across denominations without the
// 1:10 change relation.

use crate::crypto::{legacy_hash, modern_hash};
use crate::denomination::{Denomination, Sn};
use crate::error::NodeError;
use crate::handlers::{check_admin, current_mfs, pack_bits, Cursor, EXECUTIVE_MAX_AVAILABLE_COINS};
use crate::protocol::dispatch::HandlerContext;
use crate::status::Status;
use crate::store::{Record, ADMIN_OVERRIDE_SESSION};
use futures::future::BoxFuture;
use std::sync::Arc;

const ALGO_LEGACY: u8 = 0;
const ALGO_MODERN: u8 = 1;

/// Request: `session: u32`, `admin_key: [u8; 16]`, `den_mask: u16` (bit
/// `den.index()` selects that denomination). For each selected
/// denomination, reserves up to [`EXECUTIVE_MAX_AVAILABLE_COINS`] free
/// pages for `session` and returns them compacted into runs. Response:
/// `den_count: u8`, then per denomination `den: i8`, `run_count: u16`,
/// then `(start: u32, count: u16)` runs (spec §4.H).
pub fn get_available_sns(ctx: Arc<HandlerContext>, payload: Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)> {
    Box::pin(async move {
        let mut cur = Cursor::new(&payload);
        let parsed = (|| -> Result<_, NodeError> {
            let session = cur.u32()?;
            let admin_key = cur.an()?;
            let den_mask = cur.u16()?;
            Ok((session, admin_key, den_mask))
        })();
        let (session, admin_key, den_mask) = match parsed {
            Ok(v) => v,
            Err(e) => return (e.status(), Vec::new()),
        };
        if !check_admin(&ctx, &admin_key) {
            return (Status::AdminAuth, Vec::new());
        }

        let selected: Vec<Denomination> = Denomination::all().filter(|d| den_mask & (1 << d.index()) != 0).collect();

        let mut out = vec![selected.len() as u8];
        for den in selected {
            let sns = ctx.store.bitmap.available_sns(den, EXECUTIVE_MAX_AVAILABLE_COINS);
            for sn in &sns {
                if let Err(e) = ctx.store.reserve_page(den, *sn, session) {
                    return (e.status(), Vec::new());
                }
            }
            let runs = compact_runs(&sns);
            out.push(den.value() as u8);
            out.extend_from_slice(&(runs.len() as u16).to_be_bytes());
            for (start, count) in runs {
                out.extend_from_slice(&start.to_be_bytes());
                out.extend_from_slice(&count.to_be_bytes());
            }
        }
        (Status::Success, out)
    })
}

fn compact_runs(sns: &[Sn]) -> Vec<(u32, u16)> {
    let mut runs = Vec::new();
    let mut iter = sns.iter().map(|s| s.0).peekable();
    while let Some(start) = iter.next() {
        let mut count: u16 = 1;
        let mut last = start;
        while let Some(&next) = iter.peek() {
            if next == last + 1 && count < u16::MAX {
                last = next;
                count += 1;
                iter.next();
            } else {
                break;
            }
        }
        runs.push((start, count));
    }
    runs
}

/// Request: `session: u32`, `admin_key: [u8; 16]`, `algo: u8`
/// (0=legacy MD5 family, 1=modern SHA-256 family), `count: u16`, then
/// `count` times `(den, sn)`. Each target page must be reserved by
/// `session` or the caller must be using [`ADMIN_OVERRIDE_SESSION`].
/// New AN = hash(node_id ‖ sn ‖ admin_key). Response: per coin, the
/// previous AN (16 bytes), in request order (spec §4.H).
pub fn create_coins(ctx: Arc<HandlerContext>, payload: Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)> {
    Box::pin(async move {
        let mut cur = Cursor::new(&payload);
        let parsed = (|| -> Result<_, NodeError> {
            let session = cur.u32()?;
            let admin_key = cur.an()?;
            let algo = cur.u8()?;
            let count = cur.u16()?;
            let mut coins = Vec::with_capacity(count as usize);
            for _ in 0..count {
                coins.push(cur.coin()?);
            }
            Ok((session, admin_key, algo, coins))
        })();
        let (session, admin_key, algo, coins) = match parsed {
            Ok(v) => v,
            Err(e) => return (e.status(), Vec::new()),
        };
        if !check_admin(&ctx, &admin_key) {
            return (Status::AdminAuth, Vec::new());
        }

        let mut out = Vec::with_capacity(coins.len() * 16);
        for (den, sn) in coins {
            match ctx
                .store
                .is_reserved_by(den, sn, session, ctx.config.reservation_ttl)
            {
                Ok(true) => {}
                Ok(false) if session == ADMIN_OVERRIDE_SESSION => {}
                Ok(false) => return (Status::PageNotReserved, Vec::new()),
                Err(e) => return (e.status(), Vec::new()),
            }
            let previous = match ctx.store.read_record(den, sn) {
                Ok(r) => r,
                Err(e) => return (e.status(), Vec::new()),
            };
            let new_an = derive_create_an(algo, ctx.config.node_id, sn, &admin_key);
            if let Err(e) = ctx.store.write_record(
                den,
                sn,
                Record {
                    an: new_an,
                    mfs: current_mfs(),
                },
            ) {
                return (e.status(), Vec::new());
            }
            out.extend_from_slice(&previous.an);
        }
        (Status::Success, out)
    })
}

fn derive_create_an(algo: u8, node_id: u8, sn: Sn, admin_key: &[u8; 16]) -> [u8; 16] {
    if algo == ALGO_MODERN {
        let digest = modern_hash(&[&[node_id], &sn.0.to_le_bytes(), admin_key]);
        let mut an = [0u8; 16];
        an.copy_from_slice(&digest[..16]);
        an
    } else {
        let _ = ALGO_LEGACY;
        legacy_hash(&[&[node_id], &sn.0.to_le_bytes(), admin_key])
    }
}

/// Request: `admin_key: [u8; 16]`, `delete: bool` (0=free, 1=delete),
/// `count: u16`, then `count` times `(den, sn)` for free, or `(den, sn,
/// an)` for delete. `free` unconditionally zeroes MFS; `delete`
/// requires the stored AN to match. Response: one bit per coin (spec
/// §4.H).
pub fn free_coins(ctx: Arc<HandlerContext>, payload: Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)> {
    free_or_delete(ctx, payload, false)
}

pub fn delete_coins(ctx: Arc<HandlerContext>, payload: Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)> {
    free_or_delete(ctx, payload, true)
}

fn free_or_delete(ctx: Arc<HandlerContext>, payload: Vec<u8>, require_an: bool) -> BoxFuture<'static, (Status, Vec<u8>)> {
    Box::pin(async move {
        let mut cur = Cursor::new(&payload);
        let parsed = (|| -> Result<_, NodeError> {
            let admin_key = cur.an()?;
            let count = cur.u16()?;
            let mut coins = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let (den, sn) = cur.coin()?;
                let an = if require_an { Some(cur.an()?) } else { None };
                coins.push((den, sn, an));
            }
            Ok((admin_key, coins))
        })();
        let (admin_key, coins) = match parsed {
            Ok(v) => v,
            Err(e) => return (e.status(), Vec::new()),
        };
        if !check_admin(&ctx, &admin_key) {
            return (Status::AdminAuth, Vec::new());
        }

        let mut bits = Vec::with_capacity(coins.len());
        for (den, sn, an) in coins {
            let ok = match ctx.store.read_record(den, sn) {
                Ok(record) => {
                    if an.is_some_and(|a| a != record.an) {
                        false
                    } else {
                        ctx.store
                            .write_record(den, sn, Record { an: record.an, mfs: 0 })
                            .is_ok()
                    }
                }
                Err(_) => false,
            };
            bits.push(ok);
        }
        (crate::handlers::all_pass_status(&bits), pack_bits(&bits))
    })
}

/// Request: `admin_key: [u8; 16]`, `den: i8`. Reads every page of `den`
/// directly from disk, bypassing the cache so this bulk scan never
/// evicts working-set pages, and returns one bit per serial number
/// (owned/free) (spec §4.H).
pub fn get_all_sns(ctx: Arc<HandlerContext>, payload: Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)> {
    Box::pin(async move {
        let mut cur = Cursor::new(&payload);
        let parsed = (|| -> Result<_, NodeError> {
            let admin_key = cur.an()?;
            let den = cur.den()?;
            Ok((admin_key, den))
        })();
        let (admin_key, den) = match parsed {
            Ok(v) => v,
            Err(e) => return (e.status(), Vec::new()),
        };
        if !check_admin(&ctx, &admin_key) {
            return (Status::AdminAuth, Vec::new());
        }

        let pages = match ctx.store.disk.load_all(den) {
            Ok(p) => p,
            Err(e) => return (e.status(), Vec::new()),
        };
        let mut bits = Vec::with_capacity(pages.len() * crate::denomination::RECORDS_PER_PAGE as usize);
        for page_bytes in pages {
            for slot in 0..crate::denomination::RECORDS_PER_PAGE as usize {
                let mfs = page_bytes[slot * 17 + 16];
                bits.push(mfs != 0);
            }
        }
        (Status::Success, pack_bits(&bits))
    })
}
