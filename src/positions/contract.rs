//! Hook contract view calls

use anyhow::{Context, Result};

use crate::chain::{abi, ChainReader};
use crate::models::{BucketState, HandleValue, PositionKey};

pub const POSITIONS_SIGNATURE: &str = "positions(bytes32,address,int24,uint8)";
pub const BUCKETS_SIGNATURE: &str = "buckets(bytes32,int24,uint8)";

/// Raw `positions(...)` record. All fields are ciphertext handles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionRecord {
    pub shares: HandleValue,
    pub proceeds_per_share_snapshot: HandleValue,
    pub filled_per_share_snapshot: HandleValue,
    pub realized_proceeds: HandleValue,
}

pub fn encode_positions_call(key: &PositionKey, user: &str) -> Result<String> {
    Ok(format!(
        "{}{}{}{}{}",
        abi::selector(POSITIONS_SIGNATURE),
        abi::encode_bytes32_word(&key.pool_id)?,
        abi::encode_address_word(user)?,
        abi::encode_int24_word(key.tick),
        abi::encode_uint8_word(key.side.as_u8()),
    ))
}

pub fn encode_buckets_call(key: &PositionKey) -> Result<String> {
    Ok(format!(
        "{}{}{}{}",
        abi::selector(BUCKETS_SIGNATURE),
        abi::encode_bytes32_word(&key.pool_id)?,
        abi::encode_int24_word(key.tick),
        abi::encode_uint8_word(key.side.as_u8()),
    ))
}

pub fn decode_position_record(hex_result: &str) -> Result<PositionRecord> {
    let bytes = abi::decode_hex(hex_result)?;
    let w = abi::words(&bytes);
    if w.len() < 4 {
        anyhow::bail!("positions() response too short: {} bytes", bytes.len());
    }
    Ok(PositionRecord {
        shares: abi::decode_uint256(w[0]).into(),
        proceeds_per_share_snapshot: abi::decode_uint256(w[1]).into(),
        filled_per_share_snapshot: abi::decode_uint256(w[2]).into(),
        realized_proceeds: abi::decode_uint256(w[3]).into(),
    })
}

pub fn decode_bucket_state(hex_result: &str) -> Result<BucketState> {
    let bytes = abi::decode_hex(hex_result)?;
    let w = abi::words(&bytes);
    if w.len() < 5 {
        anyhow::bail!("buckets() response too short: {} bytes", bytes.len());
    }
    Ok(BucketState {
        total_shares_handle: abi::decode_uint256(w[0]).into(),
        liquidity_handle: abi::decode_uint256(w[1]).into(),
        initialized: abi::decode_bool(w[4])?,
    })
}

/// Typed views over one hook deployment.
pub struct HookContract<'a, C: ChainReader + ?Sized> {
    reader: &'a C,
    address: &'a str,
}

impl<'a, C: ChainReader + ?Sized> HookContract<'a, C> {
    pub fn new(reader: &'a C, address: &'a str) -> Self {
        Self { reader, address }
    }

    pub async fn position(&self, key: &PositionKey, user: &str) -> Result<PositionRecord> {
        let data = encode_positions_call(key, user)?;
        let result = self
            .reader
            .call(self.address, &data)
            .await
            .with_context(|| format!("positions() failed for {}", key))?;
        decode_position_record(&result)
    }

    pub async fn bucket(&self, key: &PositionKey) -> Result<BucketState> {
        let data = encode_buckets_call(key)?;
        let result = self
            .reader
            .call(self.address, &data)
            .await
            .with_context(|| format!("buckets() failed for {}", key))?;
        decode_bucket_state(&result)
    }
}

/// ABI-encode return data in the hook's layout. Used by tests and fixtures.
pub fn encode_position_record(record: &PositionRecord) -> String {
    let word = |h: &HandleValue| format!("{:0>64}", h.0.to_str_radix(16));
    format!(
        "0x{}{}{}{}",
        word(&record.shares),
        word(&record.proceeds_per_share_snapshot),
        word(&record.filled_per_share_snapshot),
        word(&record.realized_proceeds),
    )
}

pub fn encode_bucket_state(state: &BucketState) -> String {
    let word = |h: &HandleValue| format!("{:0>64}", h.0.to_str_radix(16));
    format!(
        "0x{}{}{}{}{}",
        word(&state.total_shares_handle),
        word(&state.liquidity_handle),
        word(&HandleValue::default()),
        word(&HandleValue::default()),
        abi::encode_uint8_word(state.initialized as u8),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;

    #[test]
    fn test_positions_calldata_layout() {
        let key = PositionKey::new(&format!("0x{:0>64}", "ab"), -1, Side::Sell);
        let data = encode_positions_call(&key, "0x00000000000000000000000000000000000000cc").unwrap();

        // selector + 4 words
        assert_eq!(data.len(), 10 + 64 * 4);
        assert!(data.starts_with(&abi::selector(POSITIONS_SIGNATURE)));
        assert_eq!(&data[10 + 128..10 + 192], "f".repeat(64));
        assert!(data.ends_with("01"));
    }

    #[test]
    fn test_decode_position_record() {
        let record = PositionRecord {
            shares: 5u64.into(),
            proceeds_per_share_snapshot: 0u64.into(),
            filled_per_share_snapshot: 9u64.into(),
            realized_proceeds: 0u64.into(),
        };
        let decoded = decode_position_record(&encode_position_record(&record)).unwrap();
        assert_eq!(decoded, record);
        assert!(decode_position_record("0x00").is_err());
    }

    #[test]
    fn test_decode_bucket_state() {
        let state = BucketState {
            total_shares_handle: 12u64.into(),
            liquidity_handle: 3u64.into(),
            initialized: true,
        };
        let decoded = decode_bucket_state(&encode_bucket_state(&state)).unwrap();
        assert!(decoded.initialized);
        assert_eq!(decoded.total_shares_handle, state.total_shares_handle);
    }
}
