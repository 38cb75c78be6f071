//! Minimal ABI helpers for the hook contract
//!
//! The hook only needs a handful of static shapes: 32-byte words, indexed
//! address/int24/bytes32 topics, uint256 handles and ERC-20 string returns.
//! Everything is hex in and hex out, the same way the JSON-RPC returns it.

use anyhow::{Context, Result};
use num_bigint::BigUint;
use sha3::{Digest, Keccak256};

/// Size of one ABI word in bytes.
pub const WORD: usize = 32;

/// keccak-256 of arbitrary bytes.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Event topic0 for a canonical signature, e.g. `BucketFilled(bytes32,int24,uint8)`.
pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(keccak256(signature.as_bytes())))
}

/// 4-byte function selector as a 0x-prefixed hex string.
pub fn selector(signature: &str) -> String {
    format!("0x{}", hex::encode(&keccak256(signature.as_bytes())[..4]))
}

/// Strip `0x` and decode.
pub fn decode_hex(input: &str) -> Result<Vec<u8>> {
    let trimmed = input.trim_start_matches("0x").trim_start_matches("0X");
    if trimmed.len() % 2 == 1 {
        return hex::decode(format!("0{}", trimmed)).context("failed to decode hex");
    }
    hex::decode(trimmed).context("failed to decode hex")
}

/// Parse a JSON-RPC quantity (`0x1a`) into u64.
pub fn parse_quantity(input: &str) -> Result<u64> {
    let trimmed = input.trim_start_matches("0x");
    if trimmed.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(trimmed, 16).with_context(|| format!("invalid quantity: {}", input))
}

/// True if `s` looks like a 20-byte 0x address.
pub fn is_address(s: &str) -> bool {
    s.len() == 42 && s.starts_with("0x") && s[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// True if `s` looks like a 32-byte 0x word (pool ids, topics).
pub fn is_bytes32(s: &str) -> bool {
    s.len() == 66 && s.starts_with("0x") && s[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Left-pad an address into a 32-byte word (no 0x prefix).
pub fn encode_address_word(address: &str) -> Result<String> {
    if !is_address(address) {
        anyhow::bail!("not an address: {}", address);
    }
    Ok(format!("{:0>64}", address[2..].to_lowercase()))
}

/// Address as an indexed topic.
pub fn address_topic(address: &str) -> Result<String> {
    Ok(format!("0x{}", encode_address_word(address)?))
}

/// bytes32 value as a word (no 0x prefix).
pub fn encode_bytes32_word(value: &str) -> Result<String> {
    if !is_bytes32(value) {
        anyhow::bail!("not a bytes32 value: {}", value);
    }
    Ok(value[2..].to_lowercase())
}

/// int24 as a sign-extended 256-bit word (no 0x prefix).
pub fn encode_int24_word(tick: i32) -> String {
    // i64 -> u64 keeps the two's complement bits; pad with f for negatives.
    if tick < 0 {
        format!("{:f>64}", format!("{:x}", tick as i64 as u64))
    } else {
        format!("{:0>64x}", tick)
    }
}

/// int24 as an indexed topic.
pub fn int24_topic(tick: i32) -> String {
    format!("0x{}", encode_int24_word(tick))
}

/// uint8 as a word (no 0x prefix).
pub fn encode_uint8_word(value: u8) -> String {
    format!("{:0>64x}", value)
}

/// Sign-extend the low 24 bits of `raw` as two's complement.
pub fn sign_extend_24(raw: u32) -> i32 {
    let low = raw & 0x00ff_ffff;
    if low & 0x0080_0000 != 0 {
        (low | 0xff00_0000) as i32
    } else {
        low as i32
    }
}

/// Decode an indexed int24 topic. Only the low 24 bits are significant, so
/// both the fully sign-extended form and a zero-padded form decode the same.
pub fn decode_int24_topic(topic: &str) -> Result<i32> {
    let bytes = decode_hex(topic)?;
    if bytes.len() < 3 {
        anyhow::bail!("int24 topic too short: {} bytes", bytes.len());
    }
    let n = bytes.len();
    let raw = u32::from_be_bytes([0, bytes[n - 3], bytes[n - 2], bytes[n - 1]]);
    Ok(sign_extend_24(raw))
}

/// Split ABI-encoded return data into 32-byte words.
pub fn words(bytes: &[u8]) -> Vec<&[u8]> {
    bytes.chunks_exact(WORD).collect()
}

/// uint256 word to BigUint.
pub fn decode_uint256(word: &[u8]) -> BigUint {
    BigUint::from_bytes_be(word)
}

/// Last byte of a word, rejecting words with any other bit set.
pub fn decode_uint8(word: &[u8]) -> Result<u8> {
    if word.len() != WORD {
        anyhow::bail!("expected a 32-byte word, got {}", word.len());
    }
    if word[..WORD - 1].iter().any(|b| *b != 0) {
        anyhow::bail!("value does not fit in uint8");
    }
    Ok(word[WORD - 1])
}

pub fn decode_bool(word: &[u8]) -> Result<bool> {
    match decode_uint8(word)? {
        0 => Ok(false),
        1 => Ok(true),
        other => anyhow::bail!("invalid bool value: {}", other),
    }
}

/// Decode an ERC-20 `symbol()` return: dynamic `string`, or the legacy
/// `bytes32` form some tokens still use.
pub fn decode_string_or_bytes32(bytes: &[u8]) -> Result<String> {
    if bytes.len() == WORD {
        let end = bytes.iter().position(|b| *b == 0).unwrap_or(WORD);
        return Ok(String::from_utf8_lossy(&bytes[..end]).into_owned());
    }
    if bytes.len() < WORD * 2 {
        anyhow::bail!("string return too short: {} bytes", bytes.len());
    }
    let offset = word_to_usize(&bytes[..WORD])?;
    let len_end = offset.checked_add(WORD).context("string offset overflow")?;
    let len = word_to_usize(bytes.get(offset..len_end).context("string offset out of range")?)?;
    let data_end = len_end.checked_add(len).context("string length overflow")?;
    let data = bytes
        .get(len_end..data_end)
        .context("string length out of range")?;
    Ok(String::from_utf8_lossy(data).into_owned())
}

fn word_to_usize(word: &[u8]) -> Result<usize> {
    if word.len() != WORD || word[..WORD - 8].iter().any(|b| *b != 0) {
        anyhow::bail!("word does not fit in usize");
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&word[WORD - 8..]);
    usize::try_from(u64::from_be_bytes(buf)).context("word does not fit in usize")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_selectors() {
        assert_eq!(selector("decimals()"), "0x313ce567");
        assert_eq!(selector("symbol()"), "0x95d89b41");
        assert_eq!(
            event_topic("Transfer(address,address,uint256)"),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn test_string_length_overflow_is_an_error() {
        let bytes = decode_hex(&format!("{:064x}{:064x}", 32, u64::MAX)).unwrap();
        assert!(decode_string_or_bytes32(&bytes).is_err());

        let bytes = decode_hex(&format!("{:064x}{:064x}", 32, 100)).unwrap();
        assert!(decode_string_or_bytes32(&bytes).is_err());
    }

    #[test]
    fn test_sign_extension_of_all_ones() {
        let zero_padded = format!("0x{:0>64}", "ffffff");
        assert_eq!(decode_int24_topic(&zero_padded).unwrap(), -1);
        let full = format!("0x{}", "f".repeat(64));
        assert_eq!(decode_int24_topic(&full).unwrap(), -1);
    }

    #[test]
    fn test_int24_bounds() {
        assert_eq!(sign_extend_24(0x7f_ffff), 8_388_607);
        assert_eq!(sign_extend_24(0x80_0000), -8_388_608);
        assert_eq!(decode_int24_topic(&int24_topic(-887_272)).unwrap(), -887_272);
        assert_eq!(decode_int24_topic(&int24_topic(60)).unwrap(), 60);
    }

    #[test]
    fn test_negative_tick_word_is_sign_extended() {
        let word = encode_int24_word(-1);
        assert_eq!(word.len(), 64);
        assert!(word.chars().all(|c| c == 'f'));
        assert_eq!(encode_int24_word(-2).len(), 64);
        assert!(encode_int24_word(-2).ends_with("fffe"));
    }

    #[test]
    fn test_address_topic() {
        let topic = address_topic("0x00000000000000000000000000000000000000AB").unwrap();
        assert_eq!(topic.len(), 66);
        assert!(topic.ends_with("ab"));
        assert!(address_topic("0x1234").is_err());
    }

    #[test]
    fn test_decode_string_return() {
        // abi.encode("USDC")
        let encoded = format!(
            "{:0>64x}{:0>64x}{:0<64}",
            32,
            4,
            hex::encode("USDC")
        );
        let bytes = decode_hex(&encoded).unwrap();
        assert_eq!(decode_string_or_bytes32(&bytes).unwrap(), "USDC");

        let legacy = format!("{:0<64}", hex::encode("MKR"));
        let bytes = decode_hex(&legacy).unwrap();
        assert_eq!(decode_string_or_bytes32(&bytes).unwrap(), "MKR");
    }

    #[test]
    fn test_uint8_rejects_wide_values() {
        let bytes = decode_hex(&format!("{:0>64x}", 256)).unwrap();
        assert!(decode_uint8(&bytes).is_err());
        let bytes = decode_hex(&encode_uint8_word(1)).unwrap();
        assert_eq!(decode_uint8(&bytes).unwrap(), 1);
    }
}
