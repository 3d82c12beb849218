// Cross-shard handlers (spec §4.H): coins moving between this node's
// shard and an external shard are value-conserving transfers rather
// than ordinary mints/burns, so both ops gate on a caller-supplied
// conservation check before touching any record. Session id 0 is a
// dry-run: the check still runs, but no record is written.

use crate::crypto::legacy_hash;
use crate::denomination::{An, Denomination, Sn};
use crate::error::NodeError;
use crate::handlers::{all_pass_status, current_mfs, pack_bits, Cursor};
use crate::protocol::dispatch::HandlerContext;
use crate::status::Status;
use crate::store::Record;
use futures::future::BoxFuture;
use rand::RngCore;
use std::sync::Arc;

const TEST_MODE_SESSION: u32 = 0;

fn shard_an(node_id: u8, den: Denomination, sn: Sn, session: u32) -> An {
    legacy_hash(&[
        &[node_id],
        &den.value().to_le_bytes(),
        &sn.0.to_le_bytes(),
        &session.to_le_bytes(),
    ])
}

/// Request: `session: u32`, `den: i8`, `conservation_token: An`,
/// `count: u16`, then `count` times `sn: u32`. Creates a coin at each
/// `(den, sn)` in this shard with a hash-derived AN, gated on the
/// caller's token matching the XOR of the derived ANs (the external
/// shard computed the same values before handing off the quantity).
/// `session == 0` validates but never writes (spec §4.H).
pub fn pickup_coins(ctx: Arc<HandlerContext>, payload: Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)> {
    Box::pin(async move {
        let mut cur = Cursor::new(&payload);
        let parsed = (|| -> Result<_, NodeError> {
            let session = cur.u32()?;
            let den = cur.den()?;
            let token = cur.an()?;
            let count = cur.u16()?;
            let mut sns = Vec::with_capacity(count as usize);
            for _ in 0..count {
                sns.push(cur.sn()?);
            }
            Ok((session, den, token, sns))
        })();
        let (session, den, token, sns) = match parsed {
            Ok(v) => v,
            Err(e) => return (e.status(), Vec::new()),
        };

        let derived: Vec<An> = sns.iter().map(|sn| shard_an(ctx.config.node_id, den, *sn, session)).collect();
        let mut acc = [0u8; 16];
        for an in &derived {
            for i in 0..16 {
                acc[i] ^= an[i];
            }
        }
        if acc != token {
            return (Status::AmountMismatch, Vec::new());
        }

        let mut bits = Vec::with_capacity(sns.len());
        for (sn, an) in sns.iter().zip(derived.iter()) {
            let ok = session == TEST_MODE_SESSION
                || ctx
                    .store
                    .write_record(
                        den,
                        *sn,
                        Record {
                            an: *an,
                            mfs: current_mfs(),
                        },
                    )
                    .is_ok();
            bits.push(ok);
        }
        (all_pass_status(&bits), pack_bits(&bits))
    })
}

/// Request: `session: u32`, `den: i8`, `conservation_token: An`,
/// `count: u16`, then `count` times `sn: u32`. XOR-accumulates the
/// coins' currently stored ANs and compares to `conservation_token`;
/// on a match, destroys each coin (random AN, MFS = 0) to hand the
/// quantity off to the external shard. `session == 0` validates but
/// never writes (spec §4.H).
pub fn switch_shard_sum_with_sns(ctx: Arc<HandlerContext>, payload: Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)> {
    Box::pin(async move {
        let mut cur = Cursor::new(&payload);
        let parsed = (|| -> Result<_, NodeError> {
            let session = cur.u32()?;
            let den = cur.den()?;
            let token = cur.an()?;
            let count = cur.u16()?;
            let mut sns = Vec::with_capacity(count as usize);
            for _ in 0..count {
                sns.push(cur.sn()?);
            }
            Ok((session, den, token, sns))
        })();
        let (session, den, token, sns) = match parsed {
            Ok(v) => v,
            Err(e) => return (e.status(), Vec::new()),
        };

        let mut acc = [0u8; 16];
        for sn in &sns {
            match ctx.store.read_record(den, *sn) {
                Ok(record) => {
                    for i in 0..16 {
                        acc[i] ^= record.an[i];
                    }
                }
                Err(e) => return (e.status(), Vec::new()),
            }
        }
        if acc != token {
            return (Status::AmountMismatch, Vec::new());
        }

        let mut bits = Vec::with_capacity(sns.len());
        for sn in &sns {
            let ok = if session == TEST_MODE_SESSION {
                true
            } else {
                let mut random = [0u8; 16];
                rand::rng().fill_bytes(&mut random);
                let destroyed_an = legacy_hash(&[&random]);
                ctx.store
                    .write_record(
                        den,
                        *sn,
                        Record {
                            an: destroyed_an,
                            mfs: 0,
                        },
                    )
                    .is_ok()
            };
            bits.push(ok);
        }
        (all_pass_status(&bits), pack_bits(&bits))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_context;

    fn den0() -> Denomination {
        Denomination::new(0).unwrap()
    }

    #[tokio::test]
    async fn pickup_coins_creates_with_matching_token() {
        let ctx = Arc::new(test_context());
        let session = 3u32;
        let sns = [Sn(900), Sn(901)];
        let derived: Vec<An> = sns.iter().map(|sn| shard_an(ctx.config.node_id, den0(), *sn, session)).collect();
        let mut token = [0u8; 16];
        for an in &derived {
            for i in 0..16 {
                token[i] ^= an[i];
            }
        }

        let mut req = session.to_be_bytes().to_vec();
        req.push(0); // den
        req.extend_from_slice(&token);
        req.extend_from_slice(&2u16.to_be_bytes());
        for sn in sns {
            req.extend_from_slice(&sn.0.to_be_bytes());
        }

        let (status, _) = pickup_coins(ctx.clone(), req).await;
        assert_eq!(status, Status::AllPass);
        for sn in sns {
            assert!(ctx.store.read_record(den0(), sn).unwrap().is_owned());
        }
    }

    #[tokio::test]
    async fn test_mode_session_skips_mutation() {
        let ctx = Arc::new(test_context());
        let before = ctx.store.read_record(den0(), Sn(5)).unwrap();

        let mut acc = [0u8; 16];
        for i in 0..16 {
            acc[i] ^= before.an[i];
        }
        let mut req = 0u32.to_be_bytes().to_vec();
        req.push(0);
        req.extend_from_slice(&acc);
        req.extend_from_slice(&1u16.to_be_bytes());
        req.extend_from_slice(&5u32.to_be_bytes());

        let (status, _) = switch_shard_sum_with_sns(ctx.clone(), req).await;
        assert_eq!(status, Status::AllPass);
        let after = ctx.store.read_record(den0(), Sn(5)).unwrap();
        assert_eq!(after, before);
    }
}
