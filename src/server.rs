// Front-end glue: accepts TCP connections, parses the wire header, derives
// the body key, dispatches to a handler, and writes the response frame.
// Not its own spec component; it is the thing that puts component F/G
// onto a socket (see SPEC_FULL.md).

use crate::error::{NodeError, Result};
use crate::protocol::codec::{self, Key, ResponsePlan};
use crate::protocol::dispatch::{DispatchTable, HandlerContext};
use crate::protocol::header::{self, Header};
use crate::ticket::TicketPool;
use parking_lot::Mutex;
use rand::RngCore;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
const RATE_LIMIT_MAX_PER_WINDOW: u32 = 600;

/// The `rate_limit_ok(ip)` interface spec.md §6 lists as consumed: a
/// per-IP fixed-window counter, reset lazily on the first request past
/// the window boundary.
struct RateLimiter {
    windows: Mutex<HashMap<IpAddr, (Instant, u32)>>,
}

impl RateLimiter {
    fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn check(&self, ip: IpAddr) -> bool {
        let mut guard = self.windows.lock();
        let entry = guard.entry(ip).or_insert((Instant::now(), 0));
        if entry.0.elapsed() >= RATE_LIMIT_WINDOW {
            *entry = (Instant::now(), 0);
        }
        entry.1 += 1;
        entry.1 <= RATE_LIMIT_MAX_PER_WINDOW
    }
}

/// Owns the listening socket and the shared handler context. One task per
/// accepted connection; connections loop request after request until EOF
/// or a framing error, at which point they close (spec.md §4.F/§5: no
/// user-level cancellation of an in-flight request, but nothing prevents
/// closing a connection that sent garbage).
pub struct Server {
    listener: TcpListener,
    ctx: Arc<HandlerContext>,
    dispatch: Arc<DispatchTable>,
    rate_limiter: Arc<RateLimiter>,
}

impl Server {
    pub async fn bind(address: &str, ctx: Arc<HandlerContext>, dispatch: Arc<DispatchTable>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self {
            listener,
            ctx,
            dispatch,
            rate_limiter: Arc::new(RateLimiter::new()),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` fires. Each connection is
    /// handled on its own spawned task so one slow peer never blocks
    /// another (spec.md §5's bounded worker-pool model).
    pub async fn run(self, shutdown: Arc<tokio::sync::Notify>) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    if !self.rate_limiter.check(peer_addr.ip()) {
                        debug!(peer = %peer_addr, "rejecting connection: rate limited");
                        continue;
                    }
                    let ctx = self.ctx.clone();
                    let dispatch = self.dispatch.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, peer_addr, ctx, dispatch).await;
                    });
                }
                _ = shutdown.notified() => {
                    info!("accept loop shutting down");
                    return;
                }
            }
        }
    }
}

async fn handle_connection(mut stream: TcpStream, peer_addr: std::net::SocketAddr, ctx: Arc<HandlerContext>, dispatch: Arc<DispatchTable>) {
    loop {
        match serve_one_request(&mut stream, &ctx, &dispatch).await {
            Ok(true) => continue,
            Ok(false) => return,
            Err(e) => {
                debug!(peer = %peer_addr, error = %e, "closing connection after framing error");
                return;
            }
        }
    }
}

/// Serve exactly one request/response cycle. Returns `Ok(false)` on a
/// clean EOF at the start of a frame (peer closed normally), `Ok(true)`
/// once a response has been written, or an error that should close the
/// connection (spec.md §4.F's framing rejections never get a handler
/// invoked, and here they never get a response either: the request never
/// parsed far enough to know who to answer).
async fn serve_one_request(stream: &mut TcpStream, ctx: &Arc<HandlerContext>, dispatch: &DispatchTable) -> Result<bool> {
    let mut first = [0u8; 1];
    let n = stream.read(&mut first).await?;
    if n == 0 {
        return Ok(false);
    }

    let mut prefix = [0u8; 7];
    prefix[0] = first[0];
    stream.read_exact(&mut prefix[1..]).await?;

    let total_len = match prefix[6] {
        header::ENC_COIN_AN_128 | header::ENC_LOCKER_AN_128 | header::ENC_RESERVED_LEGACY => header::LEGACY_HEADER_LEN,
        header::ENC_COIN_AN_256 | header::ENC_COIN_PAIR_256 => header::MODERN_HEADER_LEN,
        other => return Err(NodeError::UnknownEncryption(other)),
    };
    let mut header_bytes = vec![0u8; total_len];
    header_bytes[..7].copy_from_slice(&prefix);
    stream.read_exact(&mut header_bytes[7..]).await?;
    let header = Header::parse(&header_bytes)?;
    header.validate(ctx.config.node_id, ctx.config.coin_id)?;

    let mut body = vec![0u8; header.body_size() as usize];
    stream.read_exact(&mut body).await?;

    let key = codec::derive_key(&header, &ctx.store, &ctx.lockers)?;
    codec::decrypt_body(&header, &key, &mut body)?;
    let payload = codec::payload(&header, &body).to_vec();

    let started = Instant::now();
    let (status, resp_payload) = dispatch.dispatch(ctx.clone(), header.group(), header.command(), payload).await;
    let exec_micros = started.elapsed().as_micros().min(u32::MAX as u128) as u32;

    let plan = ResponsePlan {
        node_id: ctx.config.node_id,
        group: header.group(),
        command: header.command(),
        status,
        exec_micros,
        payload: &resp_payload,
    };
    let frame = match &header {
        Header::Legacy(h) => {
            let Key::Bytes16(key16) = key else {
                return Err(NodeError::InvalidEncryption("expected 16-byte key for legacy response".into()));
            };
            let challenge: [u8; 16] = body
                .get(0..16)
                .and_then(|s| s.try_into().ok())
                .ok_or(NodeError::UnexpectedEof)?;
            codec::build_legacy(&plan, &key16, &h.nonce, &challenge)
        }
        Header::Modern(h) => {
            let Key::Bytes32(key32) = key else {
                return Err(NodeError::InvalidEncryption("expected 32-byte key for modern response".into()));
            };
            let mut server_nonce = [0u8; 24];
            rand::rng().fill_bytes(&mut server_nonce);
            let tail = [h.nonce[h.nonce.len() - 2], h.nonce[h.nonce.len() - 1]];
            codec::build_modern(&plan, &key32, server_nonce, tail)
        }
    };
    stream.write_all(&frame).await?;
    Ok(true)
}

/// Cooperative shutdown flag shared by the accept loop and the flusher;
/// set once and never cleared.
pub fn new_shutdown_flag() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

pub fn request_shutdown(flag: &AtomicBool, notify: &tokio::sync::Notify) {
    flag.store(true, Ordering::SeqCst);
    notify.notify_waiters();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locker::{LockerIndex, TradeLockerIndex};
    use crate::oracle::UnconfiguredPaymentOracle;
    use crate::protocol::header::{ENC_COIN_AN_128, CHALLENGE_LEN};
    use crate::status::{auth_cmd, group};
    use crate::store::CoinStore;
    use crate::ticket::TicketPool;

    fn test_ctx() -> Arc<HandlerContext> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.keep();
        let store = CoinStore::open(path, b"server-test-seed", 32).unwrap();
        let config = crate::config::NodeConfig {
            node_id: 3,
            coin_id: 1,
            ..Default::default()
        };
        Arc::new(HandlerContext {
            store: Arc::new(store),
            tickets: Arc::new(TicketPool::new(config.ticket_ttl)),
            lockers: Arc::new(LockerIndex::new()),
            trade_lockers: Arc::new(TradeLockerIndex::new()),
            config: Arc::new(config),
            payment_oracle: Arc::new(UnconfiguredPaymentOracle),
        })
    }

    fn legacy_request(ctx: &HandlerContext, den: i8, sn: u32, an: [u8; 16], group: u8, command: u8, payload: &[u8]) -> Vec<u8> {
        let nonce = [7u8; 12];
        let mut header = vec![1u8, 0, ctx.config.node_id, ctx.config.coin_id, group, command, ENC_COIN_AN_128];
        header.push(den as u8);
        header.extend_from_slice(&sn.to_be_bytes());

        let mut body = vec![0u8; 12];
        body[..11].copy_from_slice(b"challenge12");
        let crc = crate::crypto::crc32(&body[..12]);
        body.extend_from_slice(&crc.to_be_bytes());
        assert_eq!(body.len(), CHALLENGE_LEN);
        body.extend_from_slice(payload);
        body.extend_from_slice(&header::TRAILER);
        crate::crypto::aes_ctr_128(&an, &nonce, &mut body);

        header.extend_from_slice(&(body.len() as u16).to_be_bytes());
        header.extend_from_slice(&nonce);
        header.resize(header::LEGACY_HEADER_LEN, 0);
        header.extend_from_slice(&body);
        header
    }

    #[tokio::test]
    async fn serves_echo_over_a_real_socket() {
        let ctx = test_ctx();
        let den = crate::denomination::Denomination::new(0).unwrap();
        let sn = crate::denomination::Sn(1);
        let an = ctx.store.read_record(den, sn).unwrap().an;
        let dispatch = Arc::new(DispatchTable::build());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_ctx = ctx.clone();
        let server_dispatch = dispatch.clone();
        tokio::spawn(async move {
            let (mut stream, peer) = listener.accept().await.unwrap();
            let _ = serve_one_request(&mut stream, &server_ctx, &server_dispatch).await;
            let _ = peer;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let request = legacy_request(&ctx, den.value(), sn.0, an, group::AUTH, auth_cmd::ECHO, b"ping");
        client.write_all(&request).await.unwrap();

        let mut resp_header = [0u8; header::LEGACY_HEADER_LEN];
        client.read_exact(&mut resp_header).await.unwrap();
        assert_eq!(resp_header[0], ctx.config.node_id);
        assert_eq!(resp_header[1], crate::status::Status::Success.code());
        let body_size = u16::from_be_bytes([resp_header[4], resp_header[5]]) as usize;
        let mut resp_body = vec![0u8; body_size];
        client.read_exact(&mut resp_body).await.unwrap();
        crate::crypto::aes_ctr_128(&an, &[7u8; 12], &mut resp_body);
        assert_eq!(&resp_body[..resp_body.len() - 2], b"ping");
    }
}
