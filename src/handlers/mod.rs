// Command handlers (spec §4.H), one module per family. Every handler has
// the signature `fn(Arc<HandlerContext>, Vec<u8>) -> BoxFuture<'static,
// (Status, Vec<u8>)>` so the dispatch table can hold them as plain function
// pointers; the async body is boxed inside each handler.
//
// Request/response payload layouts are this crate's own encoding choice —
// spec.md describes handler semantics, not wire-level payload byte layout,
// so each handler documents its own fixed encoding inline.

pub mod auth;
pub mod change;
pub mod executive;
pub mod filesystem;
pub mod healing;
pub mod info;
pub mod locker;
pub mod shard;

use crate::denomination::{Denomination, Sn};
use crate::error::NodeError;
use crate::protocol::dispatch::HandlerContext;

/// Two independent per-handler caps for the "available slots" batch size;
/// spec.md §9's Open Question says these must stay distinct rather than
/// be unified into one constant.
pub const CHANGE_MAX_AVAILABLE_COINS: usize = 64;
pub const EXECUTIVE_MAX_AVAILABLE_COINS: usize = 1024;

/// Upper bound on how many coins a single `break`/`join` touches: one
/// denomination step is always a factor of ten, so ten targets/sources.
pub const DENOMINATION_STEP_FACTOR: usize = 10;

/// Compares the request's admin key against configuration in constant
/// time; every admin-authenticated handler starts with this check.
pub(crate) fn check_admin(ctx: &HandlerContext, candidate: &[u8; 16]) -> bool {
    use subtle_eq::ct_eq;
    ct_eq(candidate, &ctx.config.admin_key)
}

mod subtle_eq {
    /// Constant-time byte comparison without pulling in a dedicated
    /// crate for sixteen bytes.
    pub fn ct_eq(a: &[u8; 16], b: &[u8; 16]) -> bool {
        let mut diff = 0u8;
        for i in 0..16 {
            diff |= a[i] ^ b[i];
        }
        diff == 0
    }
}

/// Pack one bit per item, MSB-first within each byte.
pub(crate) fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut out = vec![0u8; bits.len().div_ceil(8)];
    for (i, bit) in bits.iter().enumerate() {
        if *bit {
            out[i / 8] |= 0x80 >> (i % 8);
        }
    }
    out
}

pub(crate) fn all_pass_status(bits: &[bool]) -> crate::status::Status {
    use crate::status::Status;
    if bits.is_empty() || bits.iter().all(|b| *b) {
        Status::AllPass
    } else if bits.iter().all(|b| !*b) {
        Status::AllFail
    } else {
        Status::Mixed
    }
}

pub(crate) struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn u8(&mut self) -> Result<u8, NodeError> {
        let b = *self.buf.get(self.pos).ok_or(NodeError::UnexpectedEof)?;
        self.pos += 1;
        Ok(b)
    }

    pub fn i8(&mut self) -> Result<i8, NodeError> {
        Ok(self.u8()? as i8)
    }

    pub fn u16(&mut self) -> Result<u16, NodeError> {
        let bytes = self.bytes(2)?;
        Ok(u16::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn u32(&mut self) -> Result<u32, NodeError> {
        let bytes = self.bytes(4)?;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], NodeError> {
        let end = self.pos.checked_add(n).ok_or(NodeError::UnexpectedEof)?;
        let slice = self.buf.get(self.pos..end).ok_or(NodeError::UnexpectedEof)?;
        self.pos = end;
        Ok(slice)
    }

    pub fn an(&mut self) -> Result<[u8; 16], NodeError> {
        Ok(self.bytes(16)?.try_into().unwrap())
    }

    pub fn den(&mut self) -> Result<Denomination, NodeError> {
        Denomination::new(self.i8()?).ok_or(NodeError::InvalidSnOrDenomination)
    }

    pub fn sn(&mut self) -> Result<Sn, NodeError> {
        Ok(Sn(self.u32()?))
    }

    pub fn coin(&mut self) -> Result<(Denomination, Sn), NodeError> {
        Ok((self.den()?, self.sn()?))
    }

    /// A `u16`-length-prefixed byte string.
    pub fn var_bytes(&mut self) -> Result<&'a [u8], NodeError> {
        let len = self.u16()? as usize;
        self.bytes(len)
    }

    /// A `u16`-length-prefixed UTF-8 string.
    pub fn string(&mut self) -> Result<String, NodeError> {
        let bytes = self.var_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| NodeError::Internal("invalid utf-8 in payload".into()))
    }
}

/// Appends `(den, sn)` in the same wire order [`Cursor::coin`] reads.
pub(crate) fn put_coin(out: &mut Vec<u8>, den: Denomination, sn: Sn) {
    out.push(den.value() as u8);
    out.extend_from_slice(&sn.0.to_be_bytes());
}

/// Months since epoch, used as the MFS stamp on a successful `pown`.
pub(crate) fn current_mfs() -> u8 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(1);
    let months = secs / (30 * 24 * 3600);
    (months % 255 + 1) as u8
}
