//! Position reconciliation
//!
//! Rebuilds a user's positions from three bounded log streams, then reads the
//! current on-chain records for each one:
//!
//! 1. Deposit logs (pool + user) give the set of positions ever touched.
//! 2. BucketFilled logs (pool-wide) mark buckets that have been filled.
//! 3. Claim logs (pool + user) mark fills that have already been claimed.
//!
//! ```text
//! is_claimable = realized_proceeds > 0 || (bucket_filled && !claimed_after_fill)
//! is_active    = shares > 0 || is_claimable
//! ```
//!
//! A failed contract read skips that position; a failed log scan fails only
//! the pool it belongs to.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::contract::{HookContract, PositionRecord};
use super::events::{
    decode_bucket_filled, decode_claim, decode_deposit, BucketFilledEvent, ClaimEvent,
    DepositEvent, EventTopics,
};
use crate::chain::{abi, scan_logs, ChainReader, LogFilter, LogOrdinal, RawLog};
use crate::errors::ErrorReport;
use crate::fhe::{unseal_with_retry, SealedKind, UnsealRetryPolicy, Unsealer};
use crate::models::{tick_to_price, HandleValue, Pool, PoolPositions, Position, PositionKey};

/// Block window and request limits for a reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// How far back from the latest block to scan.
    pub lookback_blocks: u64,
    /// Never scan below this block (hook deployment).
    pub start_block: u64,
    /// Maximum block span of one `eth_getLogs` request.
    pub log_block_range: u64,
    /// Pools in flight at once, and separately the cap on contract reads in
    /// flight across all of them.
    pub max_concurrent_requests: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            lookback_blocks: 100_000,
            start_block: 0,
            log_block_range: 10_000,
            max_concurrent_requests: 4,
        }
    }
}

impl ReconcileConfig {
    /// `[max(start_block, latest - lookback), latest]`. While the chain head
    /// is still below `start_block` the range is empty (`from > to`).
    pub fn window(&self, latest: u64) -> (u64, u64) {
        let from = latest.saturating_sub(self.lookback_blocks).max(self.start_block);
        (from, latest)
    }
}

/// Claimability flags derived for one position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claimability {
    pub is_claimable: bool,
    pub is_active: bool,
}

pub fn derive_claimability(
    shares_positive: bool,
    realized_positive: bool,
    bucket_filled: bool,
    claimed_after_fill: bool,
) -> Claimability {
    let is_claimable = realized_positive || (bucket_filled && !claimed_after_fill);
    Claimability {
        is_claimable,
        is_active: shares_positive || is_claimable,
    }
}

/// Decoded event streams for one `(user, pool)`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventHistory {
    pub deposits: Vec<DepositEvent>,
    pub fills: Vec<BucketFilledEvent>,
    pub claims: Vec<ClaimEvent>,
    /// Logs that failed to decode and were skipped
    pub malformed: usize,
}

impl EventHistory {
    /// Decode raw logs, keeping only events for `pool_id` (and `user`, where
    /// the event carries one).
    pub fn from_logs(
        user: &str,
        pool_id: &str,
        deposit_logs: &[RawLog],
        fill_logs: &[RawLog],
        claim_logs: &[RawLog],
        topics: &EventTopics,
    ) -> Self {
        let mut history = Self::default();
        let pool_id = pool_id.to_lowercase();

        for log in deposit_logs {
            match decode_deposit(log, topics) {
                Ok(ev) if ev.key.pool_id == pool_id && ev.user.eq_ignore_ascii_case(user) => {
                    history.deposits.push(ev)
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, tx = ?log.transaction_hash, "Skipping malformed Deposit log");
                    history.malformed += 1;
                }
            }
        }
        for log in fill_logs {
            match decode_bucket_filled(log, topics) {
                Ok(ev) if ev.key.pool_id == pool_id => history.fills.push(ev),
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, tx = ?log.transaction_hash, "Skipping malformed BucketFilled log");
                    history.malformed += 1;
                }
            }
        }
        for log in claim_logs {
            match decode_claim(log, topics) {
                Ok(ev) if ev.key.pool_id == pool_id && ev.user.eq_ignore_ascii_case(user) => {
                    history.claims.push(ev)
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, tx = ?log.transaction_hash, "Skipping malformed Claim log");
                    history.malformed += 1;
                }
            }
        }

        history.deposits.sort_by_key(|e| e.ordinal);
        history.fills.sort_by_key(|e| e.ordinal);
        history.claims.sort_by_key(|e| e.ordinal);
        history
    }

    /// Every position the user has deposited into, in first-deposit order.
    pub fn candidates(&self) -> Vec<PositionKey> {
        let mut seen = HashSet::new();
        self.deposits
            .iter()
            .filter(|d| seen.insert(d.key.clone()))
            .map(|d| d.key.clone())
            .collect()
    }

    pub fn latest_fill(&self, key: &PositionKey) -> Option<LogOrdinal> {
        self.fills.iter().filter(|f| &f.key == key).map(|f| f.ordinal).max()
    }

    pub fn latest_claim(&self, key: &PositionKey) -> Option<LogOrdinal> {
        self.claims.iter().filter(|c| &c.key == key).map(|c| c.ordinal).max()
    }

    pub fn bucket_filled(&self, key: &PositionKey) -> bool {
        self.latest_fill(key).is_some()
    }

    /// A claim logged after the most recent fill settles that fill.
    pub fn claimed_after_fill(&self, key: &PositionKey) -> bool {
        match (self.latest_fill(key), self.latest_claim(key)) {
            (Some(fill), Some(claim)) => claim > fill,
            _ => false,
        }
    }

    pub fn deposit_count(&self, key: &PositionKey) -> usize {
        self.deposits.iter().filter(|d| &d.key == key).count()
    }

    pub fn first_deposit_block(&self, key: &PositionKey) -> u64 {
        self.deposits
            .iter()
            .find(|d| &d.key == key)
            .map(|d| d.ordinal.block_number)
            .unwrap_or(0)
    }

    pub fn last_activity_block(&self, key: &PositionKey) -> u64 {
        let deposits = self.deposits.iter().filter(|d| &d.key == key).map(|d| d.ordinal);
        let claims = self.claims.iter().filter(|c| &c.key == key).map(|c| c.ordinal);
        let fills = self.fills.iter().filter(|f| &f.key == key).map(|f| f.ordinal);
        deposits
            .chain(claims)
            .chain(fills)
            .max()
            .map(|o| o.block_number)
            .unwrap_or(0)
    }
}

/// A candidate position whose contract reads failed.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedPosition {
    pub key: PositionKey,
    pub error: ErrorReport,
}

/// Everything `check-claims` shows for one pool.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimReport {
    pub user: String,
    pub pool_id: String,
    pub from_block: u64,
    pub to_block: u64,
    pub history: EventHistory,
    pub positions: Vec<Position>,
    pub skipped: Vec<SkippedPosition>,
    pub fetched_at: DateTime<Utc>,
}

impl ClaimReport {
    pub fn claimable(&self) -> impl Iterator<Item = &Position> {
        self.positions.iter().filter(|p| p.is_claimable)
    }
}

pub struct PositionReconciler {
    reader: Arc<dyn ChainReader>,
    config: ReconcileConfig,
    topics: EventTopics,
    unsealer: Option<Arc<dyn Unsealer>>,
    unseal_policy: UnsealRetryPolicy,
    /// Contract reads in flight across every pool being reconciled.
    read_sem: Arc<Semaphore>,
}

impl PositionReconciler {
    pub fn new(reader: Arc<dyn ChainReader>, config: ReconcileConfig) -> Self {
        let read_sem = Arc::new(Semaphore::new(config.max_concurrent_requests.max(1)));
        Self {
            reader,
            config,
            topics: EventTopics::new(),
            unsealer: None,
            unseal_policy: UnsealRetryPolicy::default(),
            read_sem,
        }
    }

    /// Decrypt shares and proceeds through `unsealer` instead of judging
    /// them by handle.
    pub fn with_unsealer(mut self, unsealer: Arc<dyn Unsealer>, policy: UnsealRetryPolicy) -> Self {
        self.unsealer = Some(unsealer);
        self.unseal_policy = policy;
        self
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Current scan window.
    pub async fn block_window(&self) -> Result<(u64, u64)> {
        let latest = self
            .reader
            .block_number()
            .await
            .context("failed to fetch latest block")?;
        Ok(self.config.window(latest))
    }

    /// Fetch and decode the three event streams for `(user, pool)`.
    pub async fn fetch_history(
        &self,
        user: &str,
        pool: &Pool,
        from_block: u64,
        to_block: u64,
    ) -> Result<EventHistory> {
        let user_topic = abi::address_topic(user)?;
        if from_block > to_block {
            debug!(pool_id = %pool.pool_id, from_block, to_block, "Nothing to scan yet");
            return Ok(EventHistory::default());
        }
        let pool_topic = Some(pool.pool_id.to_lowercase());
        let chunk = self.config.log_block_range;

        let deposits = LogFilter::new(&pool.hook, &self.topics.deposit)
            .topic(pool_topic.clone())
            .topic(Some(user_topic.clone()))
            .blocks(from_block, to_block);
        let fills = LogFilter::new(&pool.hook, &self.topics.bucket_filled)
            .topic(pool_topic.clone())
            .blocks(from_block, to_block);
        let claims = LogFilter::new(&pool.hook, &self.topics.claim)
            .topic(pool_topic)
            .topic(Some(user_topic))
            .blocks(from_block, to_block);

        let (deposit_logs, fill_logs, claim_logs) = tokio::try_join!(
            scan_logs(self.reader.as_ref(), &deposits, chunk),
            scan_logs(self.reader.as_ref(), &fills, chunk),
            scan_logs(self.reader.as_ref(), &claims, chunk),
        )
        .with_context(|| format!("log scan failed for pool {}", pool.pool_id))?;

        debug!(
            pool_id = %pool.pool_id,
            deposits = deposit_logs.len(),
            fills = fill_logs.len(),
            claims = claim_logs.len(),
            "Fetched event logs"
        );

        Ok(EventHistory::from_logs(
            user,
            &pool.pool_id,
            &deposit_logs,
            &fill_logs,
            &claim_logs,
            &self.topics,
        ))
    }

    /// All positions of `user` in one pool.
    pub async fn fetch_positions(&self, user: &str, pool: &Pool) -> Result<PoolPositions> {
        let (from_block, to_block) = self.block_window().await?;
        self.fetch_positions_in(user, pool, from_block, to_block).await
    }

    async fn fetch_positions_in(
        &self,
        user: &str,
        pool: &Pool,
        from_block: u64,
        to_block: u64,
    ) -> Result<PoolPositions> {
        let history = self.fetch_history(user, pool, from_block, to_block).await?;
        let (positions, skipped) = self.reconcile_history(user, pool, &history).await;

        info!(
            pool_id = %pool.pool_id,
            user = %user,
            positions = positions.len(),
            active = positions.iter().filter(|p| p.is_active).count(),
            skipped = skipped.len(),
            "Reconciled positions"
        );

        Ok(PoolPositions {
            pool_id: pool.pool_id.clone(),
            positions,
            skipped: skipped.len(),
            error: None,
            from_block,
            to_block,
            fetched_at: Utc::now(),
        })
    }

    /// Fan out over `pools`, at most `max_concurrent_requests` at a time.
    /// Each pool's failure is captured in its own entry; output order
    /// matches `pools`. Contract reads share one limit across all pools.
    pub async fn fetch_all_positions(&self, user: &str, pools: &[Pool]) -> Result<Vec<PoolPositions>> {
        let (from_block, to_block) = self.block_window().await?;
        let concurrency = self.config.max_concurrent_requests.max(1);

        let results: Vec<PoolPositions> = stream::iter(pools.iter().cloned())
            .map(|pool| async move {
                self.fetch_pool_or_error(user, &pool, from_block, to_block)
                    .await
            })
            .buffered(concurrency)
            .collect()
            .await;

        Ok(results)
    }

    async fn fetch_pool_or_error(
        &self,
        user: &str,
        pool: &Pool,
        from_block: u64,
        to_block: u64,
    ) -> PoolPositions {
        match self.fetch_positions_in(user, pool, from_block, to_block).await {
            Ok(p) => p,
            Err(e) => {
                let report = ErrorReport::from_error(&e);
                warn!(
                    pool_id = %pool.pool_id,
                    category = report.category.as_str(),
                    error = %report.message,
                    "Pool fetch failed"
                );
                PoolPositions {
                    pool_id: pool.pool_id.clone(),
                    positions: Vec::new(),
                    skipped: 0,
                    error: Some(report.message),
                    from_block,
                    to_block,
                    fetched_at: Utc::now(),
                }
            }
        }
    }

    /// Raw events plus reconciled claimability for one pool.
    pub async fn claim_report(&self, user: &str, pool: &Pool) -> Result<ClaimReport> {
        let (from_block, to_block) = self.block_window().await?;
        let history = self.fetch_history(user, pool, from_block, to_block).await?;
        let (positions, skipped) = self.reconcile_history(user, pool, &history).await;

        Ok(ClaimReport {
            user: user.to_lowercase(),
            pool_id: pool.pool_id.clone(),
            from_block,
            to_block,
            history,
            positions,
            skipped,
            fetched_at: Utc::now(),
        })
    }

    /// Read on-chain state for every candidate. Failures are logged and the
    /// position skipped; nothing is retried.
    pub async fn reconcile_history(
        &self,
        user: &str,
        pool: &Pool,
        history: &EventHistory,
    ) -> (Vec<Position>, Vec<SkippedPosition>) {
        let concurrency = self.config.max_concurrent_requests.max(1);

        let results: Vec<(PositionKey, Result<Position>)> = stream::iter(history.candidates())
            .map(|key| async move {
                let res = self.reconcile_one(user, pool, &key, history).await;
                (key, res)
            })
            .buffered(concurrency)
            .collect()
            .await;

        let mut positions = Vec::new();
        let mut skipped = Vec::new();
        for (key, res) in results {
            match res {
                Ok(p) => positions.push(p),
                Err(e) => {
                    let error = ErrorReport::from_error(&e);
                    warn!(
                        position = %key,
                        category = error.category.as_str(),
                        error = %error.message,
                        "Skipping position"
                    );
                    skipped.push(SkippedPosition { key, error });
                }
            }
        }
        (positions, skipped)
    }

    async fn reconcile_one(
        &self,
        user: &str,
        pool: &Pool,
        key: &PositionKey,
        history: &EventHistory,
    ) -> Result<Position> {
        let hook = HookContract::new(self.reader.as_ref(), &pool.hook);
        let (record, bucket): (PositionRecord, _) = {
            let _permit = self.read_sem.acquire().await.context("read semaphore")?;
            (hook.position(key, user).await?, hook.bucket(key).await?)
        };

        let shares = self.try_unseal(&record.shares, key, "shares").await;
        let realized = self
            .try_unseal(&record.realized_proceeds, key, "realized_proceeds")
            .await;

        let shares_positive = positive(&record.shares, shares.as_ref());
        let realized_positive = positive(&record.realized_proceeds, realized.as_ref());
        let bucket_filled = history.bucket_filled(key);
        let claimed_after_fill = history.claimed_after_fill(key);

        let flags = derive_claimability(
            shares_positive,
            realized_positive,
            bucket_filled,
            claimed_after_fill,
        );

        Ok(Position {
            key: key.clone(),
            price: tick_to_price(key.tick),
            shares_handle: record.shares,
            realized_proceeds_handle: record.realized_proceeds,
            proceeds_per_share_snapshot: record.proceeds_per_share_snapshot,
            filled_per_share_snapshot: record.filled_per_share_snapshot,
            shares: shares.map(HandleValue),
            realized_proceeds: realized.map(HandleValue),
            bucket,
            bucket_filled,
            claimed_after_fill,
            is_claimable: flags.is_claimable,
            is_active: flags.is_active,
            deposit_count: history.deposit_count(key),
            first_deposit_block: history.first_deposit_block(key),
            last_activity_block: history.last_activity_block(key),
        })
    }

    /// Plaintext for a handle, or `None` when no unsealer is configured, the
    /// handle was never written, or the unseal failed.
    async fn try_unseal(&self, handle: &HandleValue, key: &PositionKey, field: &str) -> Option<BigUint> {
        let unsealer = self.unsealer.as_ref()?;
        if handle.is_zero() {
            return Some(BigUint::default());
        }
        match unseal_with_retry(unsealer.as_ref(), &handle.0, SealedKind::Uint128, &self.unseal_policy).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(position = %key, field, error = %e, "Unseal failed, judging by handle");
                None
            }
        }
    }
}

/// `> 0` on the plaintext when known, otherwise on the handle.
fn positive(handle: &HandleValue, plaintext: Option<&BigUint>) -> bool {
    match plaintext {
        Some(v) => v.bits() > 0,
        None => !handle.is_zero(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fhe::FheError;
    use crate::models::{BucketState, Side};
    use crate::positions::contract::{
        encode_bucket_state, encode_buckets_call, encode_position_record, encode_positions_call,
    };
    use crate::positions::events::encode::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    const HOOK: &str = "0x00000000000000000000000000000000000000aa";
    const USER: &str = "0x00000000000000000000000000000000000000bb";
    const OTHER: &str = "0x00000000000000000000000000000000000000cc";

    fn pool_id() -> String {
        format!("0x{:0>64}", "1")
    }

    fn history(deposits: Vec<RawLog>, fills: Vec<RawLog>, claims: Vec<RawLog>) -> EventHistory {
        EventHistory::from_logs(USER, &pool_id(), &deposits, &fills, &claims, &EventTopics::new())
    }

    #[test]
    fn test_unfilled_zero_proceeds_not_claimable() {
        let flags = derive_claimability(true, false, false, false);
        assert!(!flags.is_claimable);
        assert!(flags.is_active);

        let flags = derive_claimability(false, false, false, false);
        assert!(!flags.is_claimable);
        assert!(!flags.is_active);
    }

    #[test]
    fn test_realized_proceeds_always_claimable() {
        let flags = derive_claimability(false, true, false, false);
        assert!(flags.is_claimable);
        assert!(flags.is_active);
        let flags = derive_claimability(false, true, true, true);
        assert!(flags.is_claimable);
    }

    #[test]
    fn test_claim_after_fill_not_reflagged() {
        let key = PositionKey::new(&pool_id(), -60, Side::Buy);
        let h = history(
            vec![deposit_log(HOOK, USER, &key, 10, 0).unwrap()],
            vec![bucket_filled_log(HOOK, &key, 20, 0)],
            vec![claim_log(HOOK, USER, &key, 30, 0).unwrap()],
        );
        assert!(h.bucket_filled(&key));
        assert!(h.claimed_after_fill(&key));
        let flags = derive_claimability(false, false, h.bucket_filled(&key), h.claimed_after_fill(&key));
        assert!(!flags.is_claimable);
    }

    #[test]
    fn test_refill_after_claim_is_claimable_again() {
        let key = PositionKey::new(&pool_id(), 60, Side::Sell);
        let h = history(
            vec![deposit_log(HOOK, USER, &key, 10, 0).unwrap()],
            vec![
                bucket_filled_log(HOOK, &key, 20, 0),
                bucket_filled_log(HOOK, &key, 40, 1),
            ],
            vec![claim_log(HOOK, USER, &key, 30, 0).unwrap()],
        );
        assert!(!h.claimed_after_fill(&key));
        assert_eq!(h.last_activity_block(&key), 40);
    }

    #[test]
    fn test_same_block_ordering_uses_log_index() {
        let key = PositionKey::new(&pool_id(), 0, Side::Buy);
        let h = history(
            vec![deposit_log(HOOK, USER, &key, 10, 0).unwrap()],
            vec![bucket_filled_log(HOOK, &key, 20, 5)],
            vec![claim_log(HOOK, USER, &key, 20, 4).unwrap()],
        );
        assert!(!h.claimed_after_fill(&key));
    }

    #[test]
    fn test_fill_on_other_side_does_not_count() {
        let key = PositionKey::new(&pool_id(), 0, Side::Buy);
        let other_side = PositionKey::new(&pool_id(), 0, Side::Sell);
        let h = history(
            vec![deposit_log(HOOK, USER, &key, 10, 0).unwrap()],
            vec![bucket_filled_log(HOOK, &other_side, 20, 0)],
            vec![],
        );
        assert!(!h.bucket_filled(&key));
    }

    #[test]
    fn test_candidates_dedupe_in_first_deposit_order() {
        let a = PositionKey::new(&pool_id(), 120, Side::Buy);
        let b = PositionKey::new(&pool_id(), -120, Side::Sell);
        let h = history(
            vec![
                deposit_log(HOOK, USER, &b, 5, 0).unwrap(),
                deposit_log(HOOK, USER, &a, 7, 0).unwrap(),
                deposit_log(HOOK, USER, &b, 9, 0).unwrap(),
                deposit_log(HOOK, OTHER, &a, 3, 0).unwrap(),
            ],
            vec![],
            vec![],
        );
        assert_eq!(h.candidates(), vec![b.clone(), a]);
        assert_eq!(h.deposit_count(&b), 2);
        assert_eq!(h.first_deposit_block(&b), 5);
    }

    #[test]
    fn test_malformed_logs_are_counted_and_skipped() {
        let key = PositionKey::new(&pool_id(), 0, Side::Buy);
        let mut bad = deposit_log(HOOK, USER, &key, 1, 0).unwrap();
        bad.data = "0x".into();
        let h = history(vec![bad], vec![], vec![]);
        assert!(h.deposits.is_empty());
        assert_eq!(h.malformed, 1);
    }

    // ===== Unseal path =====

    struct FixedChain {
        logs: Vec<RawLog>,
        calls: HashMap<String, String>,
    }

    #[async_trait]
    impl ChainReader for FixedChain {
        async fn block_number(&self) -> Result<u64> {
            Ok(100)
        }

        async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>> {
            Ok(self.logs.iter().filter(|l| filter.matches(l)).cloned().collect())
        }

        async fn call(&self, _to: &str, data: &str) -> Result<String> {
            self.calls
                .get(data)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("execution reverted"))
        }
    }

    /// Plaintexts by handle; any other handle has no permit.
    struct TableUnsealer {
        plaintexts: HashMap<BigUint, BigUint>,
        seen: Mutex<Vec<BigUint>>,
    }

    #[async_trait]
    impl Unsealer for TableUnsealer {
        async fn unseal(&self, handle: &BigUint, _kind: SealedKind) -> Result<BigUint, FheError> {
            self.seen.lock().push(handle.clone());
            self.plaintexts
                .get(handle)
                .cloned()
                .ok_or(FheError::PermitMissing)
        }
    }

    fn handle_record(shares: u64, realized: u64) -> PositionRecord {
        PositionRecord {
            shares: shares.into(),
            realized_proceeds: realized.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_unsealed_plaintext_decides_activity() {
        let pool = Pool {
            pool_id: pool_id(),
            hook: HOOK.to_string(),
            token0: OTHER.to_string(),
            token1: OTHER.to_string(),
        };
        // Nonzero handles that decrypt to zero.
        let drained = PositionKey::new(&pool_id(), 60, Side::Buy);
        // Shares handle without a permit, realized proceeds never written.
        let denied = PositionKey::new(&pool_id(), -60, Side::Sell);

        let mut calls = HashMap::new();
        for (key, record) in [(&drained, handle_record(0x11, 0x12)), (&denied, handle_record(0x21, 0))] {
            calls.insert(
                encode_positions_call(key, USER).unwrap(),
                encode_position_record(&record),
            );
            calls.insert(
                encode_buckets_call(key).unwrap(),
                encode_bucket_state(&BucketState::default()),
            );
        }
        let chain = FixedChain {
            logs: vec![
                deposit_log(HOOK, USER, &drained, 10, 0).unwrap(),
                deposit_log(HOOK, USER, &denied, 11, 0).unwrap(),
            ],
            calls,
        };
        let unsealer = Arc::new(TableUnsealer {
            plaintexts: [
                (BigUint::from(0x11u32), BigUint::default()),
                (BigUint::from(0x12u32), BigUint::default()),
            ]
            .into_iter()
            .collect(),
            seen: Mutex::new(Vec::new()),
        });

        let reconciler = PositionReconciler::new(Arc::new(chain), ReconcileConfig::default())
            .with_unsealer(unsealer.clone(), UnsealRetryPolicy::default());
        let result = reconciler.fetch_positions(USER, &pool).await.unwrap();
        assert_eq!(result.positions.len(), 2);

        let p = result.positions.iter().find(|p| p.key == drained).unwrap();
        assert_eq!(p.shares, Some(HandleValue::default()));
        assert!(!p.is_active);
        assert!(!p.is_claimable);

        let p = result.positions.iter().find(|p| p.key == denied).unwrap();
        assert!(p.shares.is_none());
        assert!(p.is_active, "failed unseal falls back to the nonzero handle");
        assert_eq!(p.realized_proceeds, Some(HandleValue::default()));
        assert!(!p.is_claimable);

        let seen = unsealer.seen.lock();
        assert!(!seen.contains(&BigUint::default()), "zero handles are never unsealed");
        assert!(seen.contains(&BigUint::from(0x21u32)));
    }

    #[test]
    fn test_window_respects_start_block() {
        let config = ReconcileConfig {
            lookback_blocks: 1_000,
            start_block: 500,
            ..Default::default()
        };
        assert_eq!(config.window(10_000), (9_000, 10_000));
        assert_eq!(config.window(1_200), (500, 1_200));
        let (from, to) = config.window(100);
        assert!(from > to, "no blocks below start_block are scanned");
    }
}
