// End-to-end coverage of the healing quorum scenario: a coin is repaired
// only once at least QUORUM peers vote that they hold it.

mod support;

use raida_node::denomination::{Denomination, Sn};
use raida_node::handlers::healing::fix;
use raida_node::healing::{self, serve_validate_ticket};
use raida_node::oracle::UnconfiguredPaymentOracle;
use raida_node::ticket::TicketPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

fn den0() -> Denomination {
    Denomination::new(0).unwrap()
}

/// Spawns `count` one-shot peer listeners, each with its own ticket pool
/// holding a ticket that claims `coin`. Returns the bound addresses and
/// the ticket id each peer expects to be asked about.
async fn spawn_voting_peers(coin: (Denomination, Sn), count: usize) -> Vec<(String, u32)> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let pool = Arc::new(TicketPool::new(Duration::from_secs(30)));
        let ticket_id = pool.allocate(vec![coin]).unwrap();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let _ = serve_validate_ticket(&mut stream, &pool).await;
            }
        });
        out.push((format!("{}", addr), ticket_id));
    }
    out
}

fn build_fix_payload(proposed_group: u8, ticket_per_peer: &[u32], coin: (Denomination, Sn)) -> Vec<u8> {
    let mut req = vec![proposed_group];
    for t in ticket_per_peer {
        req.extend_from_slice(&t.to_be_bytes());
    }
    req.extend_from_slice(&1u16.to_be_bytes());
    req.push(coin.0.value() as u8);
    req.extend_from_slice(&coin.1 .0.to_be_bytes());
    req
}

#[tokio::test]
async fn fourteen_of_twenty_five_votes_repairs_the_coin() {
    let coin = (den0(), Sn(9));
    let mut config = support::scratch_config();

    let voters = spawn_voting_peers(coin, 14).await;
    let mut peers = vec!["127.0.0.1:1".to_string(); healing::TOTAL_PEERS];
    let mut ticket_per_peer = vec![0u32; healing::TOTAL_PEERS];
    for (i, (addr, ticket_id)) in voters.into_iter().enumerate() {
        peers[i] = addr;
        ticket_per_peer[i] = ticket_id;
    }
    config.peers = peers;
    config.node_id = 3;
    let ctx = support::build_context(config, Arc::new(UnconfiguredPaymentOracle));

    let before = ctx.store.read_record(coin.0, coin.1).unwrap();

    let payload = build_fix_payload(7, &ticket_per_peer, coin);
    let (status, body) = fix(ctx.clone(), payload).await;
    assert_eq!(status, raida_node::status::Status::AllPass);
    assert_eq!(body, vec![0x80]);

    let after = ctx.store.read_record(coin.0, coin.1).unwrap();
    assert_ne!(after.an, before.an);
    assert!(ctx.store.bitmap.is_owned(coin.0, coin.1));
    let expected = raida_node::crypto::legacy_hash(&[
        &[ctx.config.node_id],
        &coin.0.value().to_le_bytes(),
        &coin.1 .0.to_le_bytes(),
        &[7u8],
    ]);
    assert_eq!(after.an, expected);
}

#[tokio::test]
async fn twelve_of_twenty_five_votes_is_not_quorum() {
    let coin = (den0(), Sn(10));
    let mut config = support::scratch_config();

    let voters = spawn_voting_peers(coin, 12).await;
    let mut peers = vec!["127.0.0.1:1".to_string(); healing::TOTAL_PEERS];
    let mut ticket_per_peer = vec![0u32; healing::TOTAL_PEERS];
    for (i, (addr, ticket_id)) in voters.into_iter().enumerate() {
        peers[i] = addr;
        ticket_per_peer[i] = ticket_id;
    }
    config.peers = peers;
    config.node_id = 3;
    let ctx = support::build_context(config, Arc::new(UnconfiguredPaymentOracle));

    let before = ctx.store.read_record(coin.0, coin.1).unwrap();

    let payload = build_fix_payload(7, &ticket_per_peer, coin);
    let (status, body) = fix(ctx.clone(), payload).await;
    assert_eq!(status, raida_node::status::Status::AllFail);
    assert_eq!(body, vec![0x00]);

    let after = ctx.store.read_record(coin.0, coin.1).unwrap();
    assert_eq!(after.an, before.an);
}
