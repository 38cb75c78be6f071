//! Pool registry and token metadata
//!
//! Pools are configured, not discovered. Token symbols and decimals are read
//! from the ERC-20 contracts on first use and cached with a TTL.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::cache::TtlCache;
use crate::chain::{abi, ChainReader};
use crate::models::{Pool, PoolSummary, TokenMetadata};

const SYMBOL_SIGNATURE: &str = "symbol()";
const DECIMALS_SIGNATURE: &str = "decimals()";

/// Configured pools, unique by `(hook, token0, token1)`.
#[derive(Debug, Clone, Default)]
pub struct PoolRegistry {
    pools: Vec<Pool>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list, rejecting duplicates.
    pub fn from_pools(pools: impl IntoIterator<Item = Pool>) -> Result<Self> {
        let mut registry = Self::new();
        for pool in pools {
            registry.insert(pool)?;
        }
        Ok(registry)
    }

    pub fn insert(&mut self, pool: Pool) -> Result<()> {
        let pool = Pool {
            pool_id: pool.pool_id.to_lowercase(),
            ..pool
        };
        if self.pools.iter().any(|p| p.triple() == pool.triple()) {
            anyhow::bail!(
                "duplicate pool (hook {}, token0 {}, token1 {})",
                pool.hook,
                pool.token0,
                pool.token1
            );
        }
        if self.get(&pool.pool_id).is_some() {
            anyhow::bail!("duplicate pool id {}", pool.pool_id);
        }
        self.pools.push(pool);
        Ok(())
    }

    pub fn get(&self, pool_id: &str) -> Option<&Pool> {
        self.pools
            .iter()
            .find(|p| p.pool_id.eq_ignore_ascii_case(pool_id))
    }

    pub fn all(&self) -> &[Pool] {
        &self.pools
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Distinct token addresses across all pools.
    pub fn tokens(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.pools
            .iter()
            .flat_map(|p| [p.token0.to_lowercase(), p.token1.to_lowercase()])
            .filter(|t| seen.insert(t.clone()))
            .collect()
    }
}

/// Token metadata read-through cache.
pub struct TokenMetadataStore {
    reader: Arc<dyn ChainReader>,
    cache: TtlCache<String, TokenMetadata>,
}

impl TokenMetadataStore {
    pub fn new(reader: Arc<dyn ChainReader>, ttl: Duration) -> Self {
        Self {
            reader,
            cache: TtlCache::new(ttl),
        }
    }

    /// Metadata for `token`. A failed read degrades to `?`/18 and is not
    /// cached, so the next call tries again.
    pub async fn metadata(&self, token: &str) -> TokenMetadata {
        let key = token.to_lowercase();
        match self
            .cache
            .get_or_try_insert_with(key.clone(), || self.fetch(&key))
            .await
        {
            Ok(meta) => meta,
            Err(e) => {
                warn!(token = %token, error = %e, "Token metadata lookup failed");
                TokenMetadata::unknown(&key)
            }
        }
    }

    async fn fetch(&self, token: &str) -> Result<TokenMetadata> {
        let symbol_hex = self
            .reader
            .call(token, &abi::selector(SYMBOL_SIGNATURE))
            .await
            .context("symbol() failed")?;
        let decimals_hex = self
            .reader
            .call(token, &abi::selector(DECIMALS_SIGNATURE))
            .await
            .context("decimals() failed")?;

        let symbol = abi::decode_string_or_bytes32(&abi::decode_hex(&symbol_hex)?)?;
        let decimals_bytes = abi::decode_hex(&decimals_hex)?;
        let decimals = abi::decode_uint8(
            decimals_bytes
                .get(..abi::WORD)
                .context("decimals() response too short")?,
        )?;

        Ok(TokenMetadata {
            address: token.to_string(),
            symbol,
            decimals,
        })
    }

    /// Pool plus both tokens' metadata.
    pub async fn summarize(&self, pool: &Pool) -> PoolSummary {
        let (token0_meta, token1_meta) =
            tokio::join!(self.metadata(&pool.token0), self.metadata(&pool.token1));
        PoolSummary {
            pool: pool.clone(),
            token0_meta,
            token1_meta,
        }
    }
}
