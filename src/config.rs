//! Application configuration
//!
//! Defaults, then an optional TOML file, then `HOOKBOOK_*` environment
//! variables (a `.env` file is loaded first if present).
//!
//! ```toml
//! rpc_url = "https://sepolia.example.org"
//! chain_id = 11155111
//!
//! [reconcile]
//! lookback_blocks = 50000
//! log_block_range = 5000
//!
//! [[pools]]
//! pool_id = "0x…"
//! hook = "0x…"
//! token0 = "0x…"
//! token1 = "0x…"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::chain::abi;
use crate::fhe::UnsealRetryPolicy;
use crate::models::Pool;
use crate::positions::ReconcileConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub request_timeout_secs: u64,
    /// API listen port for `serve`.
    pub port: u16,
    /// TTL of token metadata entries.
    pub pool_cache_ttl_secs: u64,
    /// TTL of per-user position snapshots served by the API.
    pub positions_cache_ttl_secs: u64,
    pub reconcile: ReconcileConfig,
    pub unseal: UnsealConfig,
    pub pools: Vec<Pool>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rpc_url: String::new(),
            chain_id: 0,
            request_timeout_secs: 15,
            port: 8080,
            pool_cache_ttl_secs: 3_600,
            positions_cache_ttl_secs: 15,
            reconcile: ReconcileConfig::default(),
            unseal: UnsealConfig::default(),
            pools: Vec::new(),
        }
    }
}

/// Optional unseal bridge. Without a URL, handles are reported as-is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UnsealConfig {
    pub url: Option<String>,
    pub retry: UnsealRetryPolicy,
}

/// A configuration problem found by [`AppConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigViolation {
    pub field: String,
    pub description: String,
}

impl fmt::Display for ConfigViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.field, self.description)
    }
}

impl AppConfig {
    /// Defaults, then `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = match path {
            Some(p) => Self::from_toml_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Overlay `HOOKBOOK_*` variables from `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: String) -> Result<T>
        where
            T::Err: fmt::Display,
        {
            value
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid {}={:?}: {}", key, value, e))
        }

        if let Some(v) = lookup("HOOKBOOK_RPC_URL") {
            self.rpc_url = v;
        }
        if let Some(v) = lookup("HOOKBOOK_CHAIN_ID") {
            self.chain_id = parse("HOOKBOOK_CHAIN_ID", v)?;
        }
        if let Some(v) = lookup("HOOKBOOK_LOOKBACK_BLOCKS") {
            self.reconcile.lookback_blocks = parse("HOOKBOOK_LOOKBACK_BLOCKS", v)?;
        }
        if let Some(v) = lookup("HOOKBOOK_START_BLOCK") {
            self.reconcile.start_block = parse("HOOKBOOK_START_BLOCK", v)?;
        }
        if let Some(v) = lookup("HOOKBOOK_LOG_BLOCK_RANGE") {
            self.reconcile.log_block_range = parse("HOOKBOOK_LOG_BLOCK_RANGE", v)?;
        }
        if let Some(v) = lookup("HOOKBOOK_MAX_CONCURRENT_REQUESTS") {
            self.reconcile.max_concurrent_requests = parse("HOOKBOOK_MAX_CONCURRENT_REQUESTS", v)?;
        }
        if let Some(v) = lookup("HOOKBOOK_PORT") {
            self.port = parse("HOOKBOOK_PORT", v)?;
        }
        if let Some(v) = lookup("HOOKBOOK_UNSEAL_URL") {
            self.unseal.url = if v.trim().is_empty() { None } else { Some(v) };
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Every problem at once, so a bad config is fixed in one pass.
    pub fn validate(&self) -> Vec<ConfigViolation> {
        let mut violations = Vec::new();
        let mut push = |field: &str, description: String| {
            violations.push(ConfigViolation {
                field: field.to_string(),
                description,
            })
        };

        if self.rpc_url.trim().is_empty() {
            push("rpc_url", "RPC URL is empty (set HOOKBOOK_RPC_URL)".to_string());
        }
        if self.reconcile.log_block_range == 0 {
            push("reconcile.log_block_range", "must be non-zero".to_string());
        }
        if self.reconcile.max_concurrent_requests == 0 {
            push("reconcile.max_concurrent_requests", "must be non-zero".to_string());
        }

        let mut triples = HashSet::new();
        let mut ids = HashSet::new();
        for (i, pool) in self.pools.iter().enumerate() {
            let field = format!("pools[{}]", i);
            if !abi::is_bytes32(&pool.pool_id) {
                push(&field, format!("pool_id '{}' is not a 32-byte hex value", pool.pool_id));
            }
            for (name, addr) in [("hook", &pool.hook), ("token0", &pool.token0), ("token1", &pool.token1)] {
                if !abi::is_address(addr) {
                    push(&field, format!("{} '{}' does not look like an address", name, addr));
                }
            }
            if !triples.insert(pool.triple()) {
                push(&field, "duplicate (hook, token0, token1)".to_string());
            }
            if !ids.insert(pool.pool_id.to_lowercase()) {
                push(&field, format!("duplicate pool_id {}", pool.pool_id));
            }
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const POOL_TOML: &str = r#"
rpc_url = "http://localhost:8545"
chain_id = 31337

[reconcile]
lookback_blocks = 500

[unseal.retry]
max_attempts = 2
backoff = "fixed"

[[pools]]
pool_id = "0x0000000000000000000000000000000000000000000000000000000000000001"
hook = "0x00000000000000000000000000000000000000aa"
token0 = "0x00000000000000000000000000000000000000b0"
token1 = "0x00000000000000000000000000000000000000b1"
"#;

    #[test]
    fn test_parse_toml_keeps_defaults() {
        let config = AppConfig::from_toml_str(POOL_TOML).unwrap();
        assert_eq!(config.chain_id, 31337);
        assert_eq!(config.reconcile.lookback_blocks, 500);
        assert_eq!(config.reconcile.log_block_range, 10_000);
        assert_eq!(config.unseal.retry.max_attempts, 2);
        assert_eq!(config.pools.len(), 1);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(POOL_TOML.as_bytes()).unwrap();
        let config = AppConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.rpc_url, "http://localhost:8545");
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = AppConfig::from_toml_str(POOL_TOML).unwrap();
        let env: HashMap<&str, &str> = [
            ("HOOKBOOK_RPC_URL", "http://node:8545"),
            ("HOOKBOOK_LOG_BLOCK_RANGE", "2000"),
            ("HOOKBOOK_UNSEAL_URL", "http://bridge:9000"),
        ]
        .into_iter()
        .collect();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.rpc_url, "http://node:8545");
        assert_eq!(config.reconcile.log_block_range, 2000);
        assert_eq!(config.unseal.url.as_deref(), Some("http://bridge:9000"));
    }

    #[test]
    fn test_bad_env_value_errors() {
        let mut config = AppConfig::default();
        let result = config.apply_env(|k| (k == "HOOKBOOK_PORT").then(|| "eighty".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_reports_all_problems() {
        let mut config = AppConfig::from_toml_str(POOL_TOML).unwrap();
        config.rpc_url.clear();
        config.reconcile.log_block_range = 0;
        let mut dup = config.pools[0].clone();
        dup.pool_id = format!("0x{:0>64}", "2");
        dup.hook = dup.hook.to_uppercase().replace("0X", "0x");
        config.pools.push(dup);
        config.pools.push(Pool {
            pool_id: "0x01".into(),
            hook: "hook".into(),
            token0: config.pools[0].token0.clone(),
            token1: config.pools[0].token1.clone(),
        });

        let violations = config.validate();
        assert!(violations.iter().any(|v| v.field == "rpc_url"));
        assert!(violations.iter().any(|v| v.field == "reconcile.log_block_range"));
        assert!(violations
            .iter()
            .any(|v| v.field == "pools[1]" && v.description.contains("duplicate (hook")));
        assert!(violations
            .iter()
            .any(|v| v.field == "pools[2]" && v.description.contains("not a 32-byte")));
        assert!(violations
            .iter()
            .any(|v| v.field == "pools[2]" && v.description.contains("hook 'hook'")));
    }
}
