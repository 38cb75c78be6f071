use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Order side of a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Side::Buy => 0,
            Side::Sell => 1,
        }
    }
}

impl TryFrom<u8> for Side {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> anyhow::Result<Self> {
        match value {
            0 => Ok(Side::Buy),
            1 => Ok(Side::Sell),
            other => Err(anyhow::anyhow!("invalid side byte: {}", other)),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(poolId, tick, side)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PositionKey {
    pub pool_id: String,
    pub tick: i32,
    pub side: Side,
}

impl PositionKey {
    pub fn new(pool_id: &str, tick: i32, side: Side) -> Self {
        Self {
            pool_id: pool_id.to_lowercase(),
            tick,
            side,
        }
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.pool_id.get(..10).unwrap_or(&self.pool_id);
        write!(f, "{}@{}/{}", short, self.tick, self.side)
    }
}

/// Opaque uint256 ciphertext handle. Serialized as a decimal string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct HandleValue(pub BigUint);

impl HandleValue {
    /// A zero handle was never written by the contract.
    pub fn is_zero(&self) -> bool {
        self.0.bits() == 0
    }
}

impl From<BigUint> for HandleValue {
    fn from(value: BigUint) -> Self {
        Self(value)
    }
}

impl From<u64> for HandleValue {
    fn from(value: u64) -> Self {
        Self(BigUint::from(value))
    }
}

impl fmt::Display for HandleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for HandleValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for HandleValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        BigUint::from_str(&s)
            .map(HandleValue)
            .map_err(serde::de::Error::custom)
    }
}

/// Reconciled view of one user position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    #[serde(flatten)]
    pub key: PositionKey,
    /// `1.0001^tick`, token1 per token0
    pub price: f64,
    pub shares_handle: HandleValue,
    pub realized_proceeds_handle: HandleValue,
    pub proceeds_per_share_snapshot: HandleValue,
    pub filled_per_share_snapshot: HandleValue,
    /// Plaintext shares, when an unseal service is configured
    pub shares: Option<HandleValue>,
    pub realized_proceeds: Option<HandleValue>,
    pub bucket: BucketState,
    pub bucket_filled: bool,
    pub claimed_after_fill: bool,
    pub is_claimable: bool,
    pub is_active: bool,
    pub deposit_count: usize,
    pub first_deposit_block: u64,
    pub last_activity_block: u64,
}

/// Current on-chain bucket record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BucketState {
    pub total_shares_handle: HandleValue,
    pub liquidity_handle: HandleValue,
    pub initialized: bool,
}

/// Pool triple plus its on-chain id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub pool_id: String,
    pub hook: String,
    pub token0: String,
    pub token1: String,
}

impl Pool {
    /// Identity used for uniqueness: the `(hook, token0, token1)` triple.
    pub fn triple(&self) -> (String, String, String) {
        (
            self.hook.to_lowercase(),
            self.token0.to_lowercase(),
            self.token1.to_lowercase(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub address: String,
    pub symbol: String,
    pub decimals: u8,
}

impl TokenMetadata {
    pub fn unknown(address: &str) -> Self {
        Self {
            address: address.to_string(),
            symbol: "?".to_string(),
            decimals: 18,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSummary {
    #[serde(flatten)]
    pub pool: Pool,
    pub token0_meta: TokenMetadata,
    pub token1_meta: TokenMetadata,
}

/// Positions of one user in one pool, or the error that prevented fetching
/// them. Per-pool failures never abort the other pools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolPositions {
    pub pool_id: String,
    pub positions: Vec<Position>,
    /// Positions skipped because their contract reads failed
    pub skipped: usize,
    pub error: Option<String>,
    pub from_block: u64,
    pub to_block: u64,
    pub fetched_at: DateTime<Utc>,
}

/// Price at a tick, `1.0001^tick`.
pub fn tick_to_price(tick: i32) -> f64 {
    1.0001_f64.powi(tick)
}
