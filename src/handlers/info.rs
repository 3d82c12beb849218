// Informational handlers (spec §4.H): echo, version, stats, audit. None
// of these mutate coin state.

use crate::protocol::dispatch::HandlerContext;
use crate::status::Status;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Echoes the request payload back verbatim; used by clients to probe
/// liveness and round-trip latency.
pub fn echo(_ctx: Arc<HandlerContext>, payload: Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)> {
    Box::pin(async move { (Status::Success, payload) })
}

/// Returns this crate's version string.
pub fn version(_ctx: Arc<HandlerContext>, _payload: Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)> {
    Box::pin(async move { (Status::Success, env!("CARGO_PKG_VERSION").as_bytes().to_vec()) })
}

/// A small operational snapshot: cached page count followed by the
/// number of live healing tickets.
pub fn stats(ctx: Arc<HandlerContext>, _payload: Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)> {
    Box::pin(async move {
        let mut out = Vec::with_capacity(8);
        out.extend_from_slice(&(ctx.store.cache.len() as u32).to_be_bytes());
        out.extend_from_slice(&(crate::ticket::TICKET_POOL_SIZE as u32).to_be_bytes());
        (Status::Success, out)
    })
}

/// Sums owned-coin counts per denomination straight from the bitmap
/// (spec §4.H: "audit iterates the bitmap to sum value per denomination").
/// One `(den: i8, owned_count: u64)` pair per denomination, ascending.
pub fn audit(ctx: Arc<HandlerContext>, _payload: Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)> {
    Box::pin(async move {
        let mut out = Vec::with_capacity(crate::denomination::COUNT * 9);
        for den in crate::denomination::Denomination::all() {
            out.push(den.value() as u8);
            out.extend_from_slice(&ctx.store.bitmap.owned_count(den).to_be_bytes());
        }
        (Status::Success, out)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_context;

    #[tokio::test]
    async fn echo_returns_payload() {
        let ctx = Arc::new(test_context());
        let (status, body) = echo(ctx, b"ping".to_vec()).await;
        assert_eq!(status, Status::Success);
        assert_eq!(body, b"ping");
    }

    #[tokio::test]
    async fn audit_reports_fifteen_denominations() {
        let ctx = Arc::new(test_context());
        let (status, body) = audit(ctx, vec![]).await;
        assert_eq!(status, Status::Success);
        assert_eq!(body.len(), crate::denomination::COUNT * 9);
    }
}
