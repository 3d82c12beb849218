// Hashing, CRC, and AES-CTR primitives shared by the disk layer (default
// record seeding, fix-repair ANs) and the wire codec (spec §4.A, §4.F).

use crate::error::{NodeError, Result};
use aes::cipher::{KeyIvInit, StreamCipher};
use aes::{Aes128, Aes256};
use ctr::Ctr128BE;
use md5::{Digest, Md5};
use sha2::Sha256;

type Aes128Ctr = Ctr128BE<Aes128>;
type Aes256Ctr = Ctr128BE<Aes256>;

/// The "legacy" 16-byte digest family (spec §4.A, §4.F type 1-2 keys,
/// and the `fix` repair AN). MD5 is the natural fit: 16-byte output,
/// the family the spec contrasts with "modern" SHA-256 throughout.
pub fn legacy_hash(parts: &[&[u8]]) -> [u8; 16] {
    let mut hasher = Md5::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// The "modern" 32-byte digest family (spec §4.F type 4-5 keys, and
/// `create_coins` under protocol revision >= 4).
pub fn modern_hash(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

pub fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// AES-CTR operates on a 16-byte counter block; the wire nonce is either
/// 12 bytes (legacy) or 24 bytes (modern), neither of which is a block.
/// The first 16 bytes become the initial counter; anything past that is
/// replay-echo material the codec already handles separately, and a short
/// nonce is zero-padded on the right.
fn nonce_to_iv(nonce: &[u8]) -> [u8; 16] {
    let mut iv = [0u8; 16];
    let n = nonce.len().min(16);
    iv[..n].copy_from_slice(&nonce[..n]);
    iv
}

/// Returns true if this CPU can run hardware-accelerated AES. The 32-byte
/// key path requires it (spec §4.F); absence is a hard error.
pub fn hw_aes_available() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        std::is_x86_64_feature_detected!("aes")
    }
    #[cfg(target_arch = "aarch64")]
    {
        std::arch::is_aarch64_feature_detected!("aes")
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        false
    }
}

/// AES-128-CTR, in place. Used for encryption types 1 and 2.
pub fn aes_ctr_128(key: &[u8; 16], nonce: &[u8], data: &mut [u8]) {
    let iv = nonce_to_iv(nonce);
    let mut cipher = Aes128Ctr::new(key.into(), &iv.into());
    cipher.apply_keystream(data);
}

/// AES-256-CTR, in place. Used for encryption types 4 and 5; requires
/// hardware AES support (spec §4.F).
pub fn aes_ctr_256(key: &[u8; 32], nonce: &[u8], data: &mut [u8]) -> Result<()> {
    if !hw_aes_available() {
        return Err(NodeError::HwAesUnavailable);
    }
    let iv = nonce_to_iv(nonce);
    let mut cipher = Aes256Ctr::new(key.into(), &iv.into());
    cipher.apply_keystream(data);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_hash_is_16_bytes_and_deterministic() {
        let a = legacy_hash(&[b"seed", &[0u8], &[3u8]]);
        let b = legacy_hash(&[b"seed", &[0u8], &[3u8]]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn modern_hash_is_32_bytes() {
        let h = modern_hash(&[b"an"]);
        assert_eq!(h.len(), 32);
    }

    #[test]
    fn aes_128_ctr_round_trips() {
        let key = [7u8; 16];
        let nonce = [1u8; 12];
        let mut data = b"authentication!!".to_vec();
        let original = data.clone();
        aes_ctr_128(&key, &nonce, &mut data);
        assert_ne!(data, original);
        aes_ctr_128(&key, &nonce, &mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn aes_256_ctr_round_trips_when_hw_available() {
        if !hw_aes_available() {
            return;
        }
        let key = [9u8; 32];
        let nonce = [2u8; 24];
        let mut data = b"0123456789abcdef".to_vec();
        let original = data.clone();
        aes_ctr_256(&key, &nonce, &mut data).unwrap();
        assert_ne!(data, original);
        aes_ctr_256(&key, &nonce, &mut data).unwrap();
        assert_eq!(data, original);
    }
}
