//! Proof-of-work search over block headers.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::Rng;

use crate::constants::DIFFICULTY_PREFIX;
use crate::error::ChainResult;
use crate::{canonical_json, sha256_hex, BlockHeader};

/// Encode a nonce counter the way it appears in a header: base64 over the
/// decimal digits.
pub fn encode_nonce(nonce: i64) -> String {
    BASE64.encode(nonce.to_string())
}

/// Search nonces until the header's canonical-JSON hash starts with `prefix`.
/// The counter starts at 100 plus a random offset and increments by one per
/// attempt. Returns the winning hash with `header.nonce` filled in.
///
/// Production callers pass [`DIFFICULTY_PREFIX`]; tests shorten the prefix to
/// keep the search cheap.
pub fn search(header: &mut BlockHeader, prefix: &str) -> ChainResult<String> {
    let mut nonce: i64 = 100i64.wrapping_add(rand::thread_rng().gen_range(0..i64::MAX));
    loop {
        nonce = nonce.wrapping_add(1);
        header.nonce = encode_nonce(nonce);
        let hash = sha256_hex(&canonical_json(header)?);
        if hash.starts_with(prefix) {
            return Ok(hash);
        }
    }
}

/// True when `claimed` reproduces the header's canonical-JSON hash and meets
/// the network difficulty.
pub fn verify(header: &BlockHeader, claimed: &str) -> ChainResult<bool> {
    let hash = sha256_hex(&canonical_json(header)?);
    Ok(hash == claimed && claimed.starts_with(DIFFICULTY_PREFIX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> BlockHeader {
        BlockHeader {
            prev_block_hash: String::new(),
            transactions_hash: "ab".repeat(32),
            time: 1_700_000_000,
            nonce: String::new(),
        }
    }

    #[test]
    fn nonce_is_base64_of_decimal_digits() {
        assert_eq!(encode_nonce(123), BASE64.encode("123"));
    }

    #[test]
    fn search_finds_a_matching_prefix() {
        let mut header = header();
        let hash = search(&mut header, "0").unwrap();
        assert!(hash.starts_with('0'));
        assert!(!header.nonce.is_empty());
        // the hash is reproducible from the stored nonce
        assert_eq!(sha256_hex(&canonical_json(&header).unwrap()), hash);
    }

    #[test]
    fn verify_rejects_a_wrong_hash() {
        let header = header();
        assert!(!verify(&header, &"0".repeat(64)).unwrap());
    }

    #[test]
    fn verify_rejects_a_short_difficulty_prefix() {
        // A reproducible hash that misses the five-zero prefix must fail.
        let mut header = header();
        let hash = search(&mut header, "0").unwrap();
        if !hash.starts_with(DIFFICULTY_PREFIX) {
            assert!(!verify(&header, &hash).unwrap());
        }
    }
}
