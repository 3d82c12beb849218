// Distributed healing client (spec §4.J): fan a VALIDATE_TICKET request out
// to every peer in parallel, tallying whichever responses arrive before
// their individual timeout. A peer that errors or times out contributes no
// vote; it never fails the overall `fix` request (spec §7).

use crate::denomination::{Denomination, Sn};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Size of the healing cohort; every peer votes on every `fix`.
pub const TOTAL_PEERS: usize = 25;

/// Votes from at least this many distinct peers are required to repair a
/// coin: `ceil(TOTAL_PEERS / 2) = 13` (spec §8).
pub const QUORUM: usize = TOTAL_PEERS.div_ceil(2);

pub const PEER_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize, Deserialize)]
struct ValidateTicketRequest {
    ticket_id: u32,
    peer_id: u8,
}

#[derive(Debug, Serialize, Deserialize)]
struct ValidateTicketResponse {
    coins: Option<Vec<(i8, u32)>>,
}

async fn write_frame(stream: &mut TcpStream, bytes: &[u8]) -> std::io::Result<()> {
    stream.write_u32(bytes.len() as u32).await?;
    stream.write_all(bytes).await
}

async fn read_frame(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let len = stream.read_u32().await? as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Serve one incoming `VALIDATE_TICKET` peer request (the receiving side of
/// [`fan_out_validate_ticket`]). Lives here rather than in `handlers` since
/// it speaks the internal peer framing, not the client wire protocol.
pub async fn serve_validate_ticket(
    stream: &mut TcpStream,
    tickets: &crate::ticket::TicketPool,
) -> std::io::Result<()> {
    let req_bytes = read_frame(stream).await?;
    let request: ValidateTicketRequest = match serde_json::from_slice(&req_bytes) {
        Ok(r) => r,
        Err(_) => {
            write_frame(stream, &serde_json::to_vec(&ValidateTicketResponse { coins: None }).unwrap()).await?;
            return Ok(());
        }
    };
    let coins = tickets
        .validate_and_claim(request.ticket_id, request.peer_id)
        .ok()
        .map(|coins| coins.into_iter().map(|(d, sn)| (d.value(), sn.0)).collect());
    let response = ValidateTicketResponse { coins };
    write_frame(stream, &serde_json::to_vec(&response).unwrap()).await
}

async fn request_one_peer(
    address: String,
    ticket_id: u32,
    self_peer_id: u8,
) -> Option<Vec<(Denomination, Sn)>> {
    let fut = async {
        let mut stream = TcpStream::connect(&address).await.ok()?;
        let request = ValidateTicketRequest {
            ticket_id,
            peer_id: self_peer_id,
        };
        write_frame(&mut stream, &serde_json::to_vec(&request).ok()?).await.ok()?;
        let bytes = read_frame(&mut stream).await.ok()?;
        let response: ValidateTicketResponse = serde_json::from_slice(&bytes).ok()?;
        response.coins.map(|coins| {
            coins
                .into_iter()
                .filter_map(|(den, sn)| Denomination::new(den).map(|d| (d, Sn(sn))))
                .collect()
        })
    };
    match tokio::time::timeout(PEER_TIMEOUT, fut).await {
        Ok(Some(coins)) => Some(coins),
        Ok(None) => {
            debug!(peer = %address, "peer returned no vote");
            None
        }
        Err(_) => {
            warn!(peer = %address, "peer timed out during healing fan-out");
            None
        }
    }
}

/// Fan a `VALIDATE_TICKET` request out to every peer address, returning one
/// slot per peer in `peers`' order. `None` means no vote (error or
/// timeout); `Some(coins)` is the peer's claimed coin list.
pub async fn fan_out_validate_ticket(
    peers: &[String],
    ticket_id: u32,
    self_peer_id: u8,
) -> Vec<Option<Vec<(Denomination, Sn)>>> {
    let tasks: Vec<_> = peers
        .iter()
        .cloned()
        .map(|address| tokio::spawn(request_one_peer(address, ticket_id, self_peer_id)))
        .collect();

    let mut out = Vec::with_capacity(tasks.len());
    for task in tasks {
        out.push(task.await.unwrap_or(None));
    }
    out
}

/// Like [`fan_out_validate_ticket`], but each peer is queried with its own
/// ticket id (the `fix` request carries one ticket id per peer, spec
/// §4.H). A peer with ticket id `0` is skipped without a network call and
/// contributes no vote.
pub async fn fan_out_validate_ticket_per_peer(
    peers: &[String],
    ticket_per_peer: &[u32],
    self_peer_id: u8,
) -> Vec<Option<Vec<(Denomination, Sn)>>> {
    let tasks: Vec<_> = peers
        .iter()
        .cloned()
        .zip(ticket_per_peer.iter().copied())
        .map(|(address, ticket_id)| {
            tokio::spawn(async move {
                if ticket_id == 0 {
                    return None;
                }
                request_one_peer(address, ticket_id, self_peer_id).await
            })
        })
        .collect();

    let mut out = Vec::with_capacity(tasks.len());
    for task in tasks {
        out.push(task.await.unwrap_or(None));
    }
    out
}

/// Tally votes per `(den, sn)` across every peer's coin list.
pub fn tally_votes(
    responses: &[Option<Vec<(Denomination, Sn)>>],
) -> std::collections::HashMap<(Denomination, Sn), usize> {
    let mut tally = std::collections::HashMap::new();
    for coins in responses.iter().flatten() {
        for coin in coins {
            *tally.entry(*coin).or_insert(0usize) += 1;
        }
    }
    tally
}
