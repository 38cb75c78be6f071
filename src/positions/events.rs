//! Hook contract events
//!
//! ```text
//! Deposit(bytes32 indexed poolId, address indexed user, int24 indexed tick, uint8 side, bytes32 amountHash)
//! BucketFilled(bytes32 indexed poolId, int24 indexed tick, uint8 side)
//! Claim(bytes32 indexed poolId, address indexed user, int24 indexed tick, uint8 side, bytes32 amountHash)
//! ```
//!
//! `side` is not indexed; it is the low byte of the first data word.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::chain::abi;
use crate::chain::{LogOrdinal, RawLog};
use crate::models::{PositionKey, Side};

pub const DEPOSIT_SIGNATURE: &str = "Deposit(bytes32,address,int24,uint8,bytes32)";
pub const BUCKET_FILLED_SIGNATURE: &str = "BucketFilled(bytes32,int24,uint8)";
pub const CLAIM_SIGNATURE: &str = "Claim(bytes32,address,int24,uint8,bytes32)";

/// topic0 values, computed once per call site.
#[derive(Debug, Clone)]
pub struct EventTopics {
    pub deposit: String,
    pub bucket_filled: String,
    pub claim: String,
}

impl EventTopics {
    pub fn new() -> Self {
        Self {
            deposit: abi::event_topic(DEPOSIT_SIGNATURE),
            bucket_filled: abi::event_topic(BUCKET_FILLED_SIGNATURE),
            claim: abi::event_topic(CLAIM_SIGNATURE),
        }
    }
}

impl Default for EventTopics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DepositEvent {
    pub key: PositionKey,
    pub user: String,
    pub ordinal: LogOrdinal,
    pub transaction_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BucketFilledEvent {
    pub key: PositionKey,
    pub ordinal: LogOrdinal,
    pub transaction_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaimEvent {
    pub key: PositionKey,
    pub user: String,
    pub ordinal: LogOrdinal,
    pub transaction_hash: Option<String>,
}

fn topic<'a>(log: &'a RawLog, index: usize) -> Result<&'a str> {
    log.topics
        .get(index)
        .map(String::as_str)
        .with_context(|| format!("missing topic {}", index))
}

fn expect_topic0(log: &RawLog, expected: &str) -> Result<()> {
    let topic0 = topic(log, 0)?;
    if !topic0.eq_ignore_ascii_case(expected) {
        anyhow::bail!("unexpected topic0 {}", topic0);
    }
    Ok(())
}

fn ordinal(log: &RawLog) -> Result<LogOrdinal> {
    log.ordinal().context("log has no block number")
}

/// Side from the first data word.
fn side_from_data(log: &RawLog) -> Result<Side> {
    let data = abi::decode_hex(&log.data)?;
    let first = data.get(..abi::WORD).context("log data too short for side")?;
    Side::try_from(abi::decode_uint8(first)?)
}

/// Indexed address topics are left-padded; keep the low 20 bytes.
fn address_from_topic(topic: &str) -> Result<String> {
    let bytes = abi::decode_hex(topic)?;
    if bytes.len() != abi::WORD {
        anyhow::bail!("address topic must be 32 bytes, got {}", bytes.len());
    }
    Ok(format!("0x{}", hex::encode(&bytes[12..])))
}

pub fn decode_deposit(log: &RawLog, topics: &EventTopics) -> Result<DepositEvent> {
    expect_topic0(log, &topics.deposit)?;
    let pool_id = topic(log, 1)?;
    let user = address_from_topic(topic(log, 2)?)?;
    let tick = abi::decode_int24_topic(topic(log, 3)?)?;
    let side = side_from_data(log)?;

    Ok(DepositEvent {
        key: PositionKey::new(pool_id, tick, side),
        user,
        ordinal: ordinal(log)?,
        transaction_hash: log.transaction_hash.clone(),
    })
}

pub fn decode_bucket_filled(log: &RawLog, topics: &EventTopics) -> Result<BucketFilledEvent> {
    expect_topic0(log, &topics.bucket_filled)?;
    let pool_id = topic(log, 1)?;
    let tick = abi::decode_int24_topic(topic(log, 2)?)?;
    let side = side_from_data(log)?;

    Ok(BucketFilledEvent {
        key: PositionKey::new(pool_id, tick, side),
        ordinal: ordinal(log)?,
        transaction_hash: log.transaction_hash.clone(),
    })
}

pub fn decode_claim(log: &RawLog, topics: &EventTopics) -> Result<ClaimEvent> {
    expect_topic0(log, &topics.claim)?;
    let pool_id = topic(log, 1)?;
    let user = address_from_topic(topic(log, 2)?)?;
    let tick = abi::decode_int24_topic(topic(log, 3)?)?;
    let side = side_from_data(log)?;

    Ok(ClaimEvent {
        key: PositionKey::new(pool_id, tick, side),
        user,
        ordinal: ordinal(log)?,
        transaction_hash: log.transaction_hash.clone(),
    })
}

/// Build raw logs in the hook's layout. Used by tests and fixtures.
pub mod encode {
    use super::*;

    fn raw(address: &str, topics: Vec<String>, data: String, block: u64, index: u64) -> RawLog {
        RawLog {
            address: address.to_string(),
            topics,
            data: format!("0x{}", data),
            block_number: Some(format!("0x{:x}", block)),
            log_index: Some(format!("0x{:x}", index)),
            transaction_hash: Some(format!("0x{:064x}", block * 1000 + index)),
            removed: false,
        }
    }

    pub fn deposit_log(hook: &str, user: &str, key: &PositionKey, block: u64, index: u64) -> Result<RawLog> {
        let topics = vec![
            abi::event_topic(DEPOSIT_SIGNATURE),
            key.pool_id.clone(),
            abi::address_topic(user)?,
            abi::int24_topic(key.tick),
        ];
        let data = format!("{}{:0>64}", abi::encode_uint8_word(key.side.as_u8()), "");
        Ok(raw(hook, topics, data, block, index))
    }

    pub fn bucket_filled_log(hook: &str, key: &PositionKey, block: u64, index: u64) -> RawLog {
        let topics = vec![
            abi::event_topic(BUCKET_FILLED_SIGNATURE),
            key.pool_id.clone(),
            abi::int24_topic(key.tick),
        ];
        raw(hook, topics, abi::encode_uint8_word(key.side.as_u8()), block, index)
    }

    pub fn claim_log(hook: &str, user: &str, key: &PositionKey, block: u64, index: u64) -> Result<RawLog> {
        let topics = vec![
            abi::event_topic(CLAIM_SIGNATURE),
            key.pool_id.clone(),
            abi::address_topic(user)?,
            abi::int24_topic(key.tick),
        ];
        let data = format!("{}{:0>64}", abi::encode_uint8_word(key.side.as_u8()), "");
        Ok(raw(hook, topics, data, block, index))
    }
}
