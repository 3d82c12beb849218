// Body decryption/encryption, challenge/trailer validation, and response
// framing (spec §4.F). Key derivation dispatches on the header's encryption
// type; everything else is dialect-agnostic once the key is known.

use crate::crypto;
use crate::error::{NodeError, Result};
use crate::locker::LockerIndex;
use crate::protocol::header::{
    Header, Locator, CHALLENGE_LEN, ENC_COIN_AN_128, ENC_COIN_AN_256, ENC_COIN_PAIR_256,
    ENC_LOCKER_AN_128, TRAILER,
};
use crate::status::Status;
use crate::store::CoinStore;

/// A derived body key; 16 bytes for legacy types, 32 bytes for modern.
#[derive(Debug, Clone)]
pub enum Key {
    Bytes16([u8; 16]),
    Bytes32([u8; 32]),
}

fn locator_prefix(locator: &Locator) -> [u8; 5] {
    let mut out = [0u8; 5];
    out[0] = locator.den as u8;
    out[1..5].copy_from_slice(&locator.sn.to_be_bytes());
    out
}

/// Resolve the body key from the header's coin/locker locator(s) (spec
/// §4.F's key-derivation table).
pub fn derive_key(header: &Header, store: &CoinStore, lockers: &LockerIndex) -> Result<Key> {
    match header.enc_type() {
        ENC_COIN_AN_128 => {
            let locator = header.locator();
            let den = locator
                .denomination()
                .ok_or(NodeError::InvalidSnOrDenomination)?;
            let record = store.read_record(den, crate::denomination::Sn(locator.sn))?;
            Ok(Key::Bytes16(record.an))
        }
        ENC_LOCKER_AN_128 => {
            let prefix = locator_prefix(&header.locator());
            let key = lockers
                .find_by_prefix(&prefix)
                .ok_or(NodeError::InvalidPan)?;
            Ok(Key::Bytes16(key))
        }
        ENC_COIN_AN_256 => {
            let locator = header.locator();
            let den = locator
                .denomination()
                .ok_or(NodeError::InvalidSnOrDenomination)?;
            let record = store.read_record(den, crate::denomination::Sn(locator.sn))?;
            Ok(Key::Bytes32(crypto::modern_hash(&[&record.an])))
        }
        ENC_COIN_PAIR_256 => {
            let l1 = header.locator();
            let l2 = header
                .locator2()
                .ok_or_else(|| NodeError::InvalidEncryption("missing second locator".into()))?;
            let den1 = l1.denomination().ok_or(NodeError::InvalidSnOrDenomination)?;
            let den2 = l2.denomination().ok_or(NodeError::InvalidSnOrDenomination)?;
            let r1 = store.read_record(den1, crate::denomination::Sn(l1.sn))?;
            let r2 = store.read_record(den2, crate::denomination::Sn(l2.sn))?;
            Ok(Key::Bytes32(crypto::modern_hash(&[&r1.an, &r2.an])))
        }
        other => Err(NodeError::UnknownEncryption(other)),
    }
}

fn apply_cipher(key: &Key, nonce: &[u8], data: &mut [u8]) -> Result<()> {
    match key {
        Key::Bytes16(k) => {
            crypto::aes_ctr_128(k, nonce, data);
            Ok(())
        }
        Key::Bytes32(k) => crypto::aes_ctr_256(k, nonce, data),
    }
}

/// Decrypt the body in place using the request nonce, then check framing:
/// trailer bytes, and (legacy only) the in-body challenge CRC.
pub fn decrypt_body(header: &Header, key: &Key, body: &mut [u8]) -> Result<()> {
    apply_cipher(key, header.request_nonce(), body)?;
    verify_trailer(body)?;
    if header.is_legacy() {
        verify_challenge(body)?;
    }
    Ok(())
}

fn verify_trailer(body: &[u8]) -> Result<()> {
    if body.len() < 2 || body[body.len() - 2..] != TRAILER {
        return Err(NodeError::InvalidPacketLength(body.len()));
    }
    Ok(())
}

fn verify_challenge(body: &[u8]) -> Result<()> {
    if body.len() < CHALLENGE_LEN {
        return Err(NodeError::UnexpectedEof);
    }
    let expected = crypto::crc32(&body[..12]);
    let actual = u32::from_be_bytes(body[12..16].try_into().unwrap());
    if expected != actual {
        return Err(NodeError::InvalidCrc);
    }
    Ok(())
}

/// The decrypted, framing-stripped request payload a handler actually
/// operates on: challenge and trailer removed.
pub fn payload<'a>(header: &Header, body: &'a [u8]) -> &'a [u8] {
    let end = body.len() - 2;
    if header.is_legacy() {
        &body[CHALLENGE_LEN..end]
    } else {
        &body[..end]
    }
}

/// Fields common to every response, regardless of dialect.
pub struct ResponsePlan<'a> {
    pub node_id: u8,
    pub group: u8,
    pub command: u8,
    pub status: Status,
    pub exec_micros: u32,
    pub payload: &'a [u8],
}

/// Build a full legacy response frame: header, encrypted payload+trailer.
/// `challenge` is the request's original 16-byte challenge, needed for the
/// replay-echo field.
pub fn build_legacy(
    plan: &ResponsePlan,
    key: &[u8; 16],
    client_nonce: &[u8; 12],
    challenge: &[u8; 16],
) -> Vec<u8> {
    let mut body = plan.payload.to_vec();
    body.extend_from_slice(&TRAILER);
    let key_bytes = Key::Bytes16(*key);
    let _ = apply_cipher(&key_bytes, client_nonce, &mut body);

    let echo_hash = crypto::legacy_hash(&[challenge]);
    let mut echo = [0u8; 16];
    for i in 0..16 {
        echo[i] = echo_hash[i] ^ key[i];
    }

    let mut out = Vec::with_capacity(32 + body.len());
    out.push(plan.node_id);
    out.push(plan.status.code());
    out.push(plan.group);
    out.push(plan.command);
    out.extend_from_slice(&(body.len() as u16).to_be_bytes());
    out.extend_from_slice(&plan.exec_micros.to_be_bytes());
    out.extend_from_slice(&echo);
    out.resize(32, 0);
    out.extend_from_slice(&body);
    out
}

/// Build a full modern response frame. `server_nonce` must come from a
/// CSPRNG; `client_nonce_tail` is the last two bytes of the request nonce,
/// echoed back per spec §4.F.
pub fn build_modern(
    plan: &ResponsePlan,
    key: &[u8; 32],
    server_nonce: [u8; 24],
    client_nonce_tail: [u8; 2],
) -> Vec<u8> {
    let mut body = plan.payload.to_vec();
    body.extend_from_slice(&TRAILER);
    let key_bytes = Key::Bytes32(*key);
    let _ = apply_cipher(&key_bytes, &server_nonce, &mut body);

    let mut out = Vec::with_capacity(48 + body.len());
    out.push(plan.node_id);
    out.push(plan.status.code());
    out.push(plan.group);
    out.push(plan.command);
    out.extend_from_slice(&(body.len() as u16).to_be_bytes());
    out.extend_from_slice(&plan.exec_micros.to_be_bytes());
    out.extend_from_slice(&client_nonce_tail);
    out.extend_from_slice(&server_nonce);
    out.resize(48, 0);
    out.extend_from_slice(&body);
    out
}
