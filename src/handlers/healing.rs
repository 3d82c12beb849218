// Healing-protocol handlers (spec §4.H, §4.I, §4.J): get_ticket,
// validate_ticket, fix.

use crate::crypto::legacy_hash;
use crate::denomination::{Denomination, Sn};
use crate::error::NodeError;
use crate::handlers::{all_pass_status, pack_bits, put_coin, Cursor};
use crate::healing;
use crate::protocol::dispatch::HandlerContext;
use crate::status::Status;
use crate::store::Record;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Request: `count: u16`, then `count` times `(den, sn, an)`. Each coin
/// is authenticated like `detect`; if at least one is authentic, a
/// ticket is allocated naming the authentic subset. Response: one bit
/// per coin (authenticity), followed by the ticket id (`u32`, big
/// endian) iff any coin was authentic.
pub fn get_ticket(ctx: Arc<HandlerContext>, payload: Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)> {
    Box::pin(async move {
        let mut cur = Cursor::new(&payload);
        let count = match cur.u16() {
            Ok(c) => c,
            Err(e) => return (e.status(), Vec::new()),
        };
        let mut bits = Vec::with_capacity(count as usize);
        let mut authentic = Vec::new();
        for _ in 0..count {
            let parsed = (|| -> Result<_, NodeError> {
                let (den, sn) = cur.coin()?;
                let an = cur.an()?;
                Ok((den, sn, an))
            })();
            let (den, sn, an) = match parsed {
                Ok(v) => v,
                Err(e) => return (e.status(), Vec::new()),
            };
            let ok = matches!(ctx.store.read_record(den, sn), Ok(r) if r.an == an);
            if ok {
                authentic.push((den, sn));
            }
            bits.push(ok);
        }

        let mut out = pack_bits(&bits);
        if !authentic.is_empty() {
            match ctx.tickets.allocate(authentic) {
                Ok(ticket_id) => out.extend_from_slice(&ticket_id.to_be_bytes()),
                Err(e) => return (e.status(), Vec::new()),
            }
        }
        (all_pass_status(&bits), out)
    })
}

/// Request: `peer_id: u8`, `ticket_id: u32`. Serves a peer's healing
/// fan-out request: marks the claim bit and returns the ticket's coin
/// list, or fails with `TicketAlreadyClaimed`/`TicketNotFound` (spec
/// §4.H). Response: `count: u16`, then `(den, sn)` pairs.
pub fn validate_ticket(ctx: Arc<HandlerContext>, payload: Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)> {
    Box::pin(async move {
        let mut cur = Cursor::new(&payload);
        let parsed = (|| -> Result<_, NodeError> {
            let peer_id = cur.u8()?;
            let ticket_id = cur.u32()?;
            Ok((peer_id, ticket_id))
        })();
        let (peer_id, ticket_id) = match parsed {
            Ok(v) => v,
            Err(e) => return (e.status(), Vec::new()),
        };

        match ctx.tickets.validate_and_claim(ticket_id, peer_id) {
            Ok(coins) => {
                let mut out = (coins.len() as u16).to_be_bytes().to_vec();
                for (den, sn) in coins {
                    put_coin(&mut out, den, sn);
                }
                (Status::Success, out)
            }
            Err(e) => (e.status(), Vec::new()),
        }
    })
}

/// Request: `proposed_group: u8`, `ticket_per_peer: [u32;
/// healing::TOTAL_PEERS]`, `count: u16`, then `count` times `(den, sn)`.
/// Fans `VALIDATE_TICKET` out to every peer in parallel using each
/// peer's own ticket id, tallies votes per coin, and repairs any coin
/// with at least quorum votes by deriving a fresh AN from
/// `legacy_hash(node_id, den, sn, proposed_group)` (spec §4.H, §8
/// scenario 4). Response: one bit per requested coin (fixed or not).
pub fn fix(ctx: Arc<HandlerContext>, payload: Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)> {
    Box::pin(async move {
        let mut cur = Cursor::new(&payload);
        let parsed = (|| -> Result<_, NodeError> {
            let proposed_group = cur.u8()?;
            let mut ticket_per_peer = [0u32; healing::TOTAL_PEERS];
            for slot in ticket_per_peer.iter_mut() {
                *slot = cur.u32()?;
            }
            let count = cur.u16()?;
            let mut coins = Vec::with_capacity(count as usize);
            for _ in 0..count {
                coins.push(cur.coin()?);
            }
            Ok((proposed_group, ticket_per_peer, coins))
        })();
        let (proposed_group, ticket_per_peer, coins): (u8, [u32; healing::TOTAL_PEERS], Vec<(Denomination, Sn)>) =
            match parsed {
                Ok(v) => v,
                Err(e) => return (e.status(), Vec::new()),
            };

        let responses =
            healing::fan_out_validate_ticket_per_peer(&ctx.config.peers, &ticket_per_peer, ctx.config.node_id).await;
        let tally = healing::tally_votes(&responses);

        let mut bits = Vec::with_capacity(coins.len());
        for (den, sn) in &coins {
            let votes = tally.get(&(*den, *sn)).copied().unwrap_or(0);
            let fixed = if votes >= healing::QUORUM {
                let new_an = legacy_hash(&[
                    &[ctx.config.node_id],
                    &den.value().to_le_bytes(),
                    &sn.0.to_le_bytes(),
                    &[proposed_group],
                ]);
                ctx.store
                    .write_record(
                        *den,
                        *sn,
                        Record {
                            an: new_an,
                            mfs: crate::handlers::current_mfs(),
                        },
                    )
                    .is_ok()
            } else {
                false
            };
            bits.push(fixed);
        }

        (all_pass_status(&bits), pack_bits(&bits))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::denomination::Denomination;
    use crate::test_support::test_context;

    fn den0() -> Denomination {
        Denomination::new(0).unwrap()
    }

    #[tokio::test]
    async fn get_ticket_allocates_for_authentic_coin() {
        let ctx = Arc::new(test_context());
        let an = ctx.store.read_record(den0(), Sn(3)).unwrap().an;
        let mut req = vec![0u8, 1];
        req.push(0);
        req.extend_from_slice(&3u32.to_be_bytes());
        req.extend_from_slice(&an);

        let (status, body) = get_ticket(ctx, req).await;
        assert_eq!(status, Status::AllPass);
        assert_eq!(body.len(), 1 + 4);
    }

    #[tokio::test]
    async fn validate_ticket_rejects_double_claim() {
        let ctx = Arc::new(test_context());
        let ticket_id = ctx.tickets.allocate(vec![(den0(), Sn(1))]).unwrap();

        let mut req = vec![5u8];
        req.extend_from_slice(&ticket_id.to_be_bytes());
        let (status, _) = validate_ticket(ctx.clone(), req.clone()).await;
        assert_eq!(status, Status::Success);

        let (status, _) = validate_ticket(ctx, req).await;
        assert_eq!(status, Status::TicketAlreadyClaimed);
    }
}
