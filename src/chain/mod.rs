//! Chain access
//!
//! Everything the reconciler needs from an Ethereum-compatible node goes
//! through [`ChainReader`]: the latest block, bounded `eth_getLogs` scans and
//! `eth_call` views. [`RpcClient`] is the HTTP JSON-RPC implementation; tests
//! substitute an in-memory reader.

pub mod abi;
pub mod rpc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use rpc::{RpcClient, RpcError};

/// Read-only view of the chain.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Latest block number.
    async fn block_number(&self) -> Result<u64>;

    /// Logs matching `filter`, in the order the node returns them.
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>>;

    /// `eth_call` against the latest block. Returns the raw hex result.
    async fn call(&self, to: &str, data: &str) -> Result<String>;
}

/// `eth_getLogs` filter. `None` topics are wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: String,
    pub topics: Vec<Option<String>>,
    pub from_block: u64,
    pub to_block: u64,
}

impl LogFilter {
    pub fn new(address: &str, topic0: &str) -> Self {
        Self {
            address: address.to_string(),
            topics: vec![Some(topic0.to_string())],
            from_block: 0,
            to_block: 0,
        }
    }

    pub fn topic(mut self, topic: Option<String>) -> Self {
        self.topics.push(topic);
        self
    }

    pub fn blocks(mut self, from_block: u64, to_block: u64) -> Self {
        self.from_block = from_block;
        self.to_block = to_block;
        self
    }

    /// Whether a log satisfies this filter's address and topics. Block bounds
    /// are checked against the log's block number when present.
    pub fn matches(&self, log: &RawLog) -> bool {
        if !log.address.eq_ignore_ascii_case(&self.address) {
            return false;
        }
        if let Some(block) = log.ordinal().map(|o| o.block_number) {
            if block < self.from_block || block > self.to_block {
                return false;
            }
        }
        self.topics.iter().enumerate().all(|(i, wanted)| match wanted {
            None => true,
            Some(t) => log
                .topics
                .get(i)
                .map(|have| have.eq_ignore_ascii_case(t))
                .unwrap_or(false),
        })
    }
}

/// One entry of an `eth_getLogs` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub log_index: Option<String>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

impl RawLog {
    /// Position of this log in chain order. Pending logs have none.
    pub fn ordinal(&self) -> Option<LogOrdinal> {
        let block_number = abi::parse_quantity(self.block_number.as_deref()?).ok()?;
        let log_index = self
            .log_index
            .as_deref()
            .and_then(|i| abi::parse_quantity(i).ok())
            .unwrap_or(0);
        Some(LogOrdinal {
            block_number,
            log_index,
        })
    }
}

/// `(block, logIndex)`: total order of logs on a canonical chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogOrdinal {
    pub block_number: u64,
    pub log_index: u64,
}

/// Scan `[filter.from_block, filter.to_block]` in windows of at most
/// `chunk` blocks. Windows are queried in order and results concatenated,
/// so the output stays in log order. Removed (reorged) logs are dropped.
pub async fn scan_logs<C: ChainReader + ?Sized>(
    reader: &C,
    filter: &LogFilter,
    chunk: u64,
) -> Result<Vec<RawLog>> {
    if chunk == 0 {
        anyhow::bail!("log block range must be non-zero");
    }

    let mut out = Vec::new();
    let mut current = filter.from_block;

    while current <= filter.to_block {
        let to_block = current.saturating_add(chunk - 1).min(filter.to_block);
        let window = filter.clone().blocks(current, to_block);
        let logs = reader.get_logs(&window).await?;

        debug!(
            from_block = current,
            to_block,
            count = logs.len(),
            "Scanned log window"
        );

        out.extend(logs.into_iter().filter(|l| !l.removed));

        if to_block == u64::MAX {
            break;
        }
        current = to_block + 1;
    }

    out.sort_by_key(|l| l.ordinal());
    Ok(out)
}
