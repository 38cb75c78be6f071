//! FHE unseal session
//!
//! Decryption of ciphertext handles is done by an external coprocessor; this
//! module only wraps it. The one failure worth retrying is the timing race
//! where the coprocessor has not yet published the sealed output for a fresh
//! handle ("sealed data not found"). Everything else fails fast.

use anyhow::Context;
use async_trait::async_trait;
use num_bigint::BigUint;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// What a handle encrypts. Forwarded to the unseal service as `utype`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SealedKind {
    Uint128,
    Uint64,
    Bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FheError {
    /// Sealed output not yet available for this handle.
    SealedDataNotFound,
    /// No valid permit for the account.
    PermitMissing,
    Service(String),
}

impl FheError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FheError::SealedDataNotFound)
    }

    /// Map a service error string onto a variant.
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("sealed data not found") || lower.contains("sealoutput not found") {
            FheError::SealedDataNotFound
        } else if lower.contains("permit") {
            FheError::PermitMissing
        } else {
            FheError::Service(message.to_string())
        }
    }
}

impl fmt::Display for FheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FheError::SealedDataNotFound => write!(f, "sealed data not found"),
            FheError::PermitMissing => write!(f, "no valid permit for account"),
            FheError::Service(msg) => write!(f, "unseal service error: {}", msg),
        }
    }
}

impl std::error::Error for FheError {}

/// Decrypts ciphertext handles.
#[async_trait]
pub trait Unsealer: Send + Sync {
    async fn unseal(&self, handle: &BigUint, kind: SealedKind) -> Result<BigUint, FheError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UnsealRetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff: Backoff,
}

impl Default for UnsealRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            backoff: Backoff::Exponential,
        }
    }
}

impl UnsealRetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ms = match self.backoff {
            Backoff::Fixed => self.base_delay_ms,
            Backoff::Exponential => {
                let shift = attempt.saturating_sub(1).min(20);
                self.base_delay_ms.saturating_mul(1u64 << shift)
            }
        };
        Duration::from_millis(ms.min(self.max_delay_ms))
    }
}

/// Unseal with retries on `SealedDataNotFound` only.
pub async fn unseal_with_retry<U: Unsealer + ?Sized>(
    unsealer: &U,
    handle: &BigUint,
    kind: SealedKind,
    policy: &UnsealRetryPolicy,
) -> Result<BigUint, FheError> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match unsealer.unseal(handle, kind).await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < attempts => {
                let delay = policy.delay_for(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Sealed data not ready, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    warn!(attempts, "Unseal gave up waiting for sealed data");
                }
                return Err(e);
            }
        }
    }
}

/// Client for an unseal bridge running next to the coprocessor SDK.
///
/// `POST {base_url}/unseal` with `{handle, utype, chainId, account}`;
/// the bridge answers `{"value": "<decimal>"}` or `{"error": "..."}`.
pub struct HttpUnsealer {
    client: Client,
    base_url: String,
    chain_id: u64,
    account: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UnsealRequest<'a> {
    handle: String,
    utype: SealedKind,
    chain_id: u64,
    account: &'a str,
}

#[derive(Debug, Deserialize)]
struct UnsealResponse {
    value: Option<String>,
    error: Option<String>,
}

impl HttpUnsealer {
    pub fn new(base_url: String, chain_id: u64, account: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            chain_id,
            account,
        })
    }
}

#[async_trait]
impl Unsealer for HttpUnsealer {
    async fn unseal(&self, handle: &BigUint, kind: SealedKind) -> Result<BigUint, FheError> {
        let body = UnsealRequest {
            handle: handle.to_string(),
            utype: kind,
            chain_id: self.chain_id,
            account: &self.account,
        };

        let response: UnsealResponse = self
            .client
            .post(format!("{}/unseal", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| FheError::Service(e.to_string()))?
            .json()
            .await
            .map_err(|e| FheError::Service(e.to_string()))?;

        parse_unseal_response(response)
    }
}

fn parse_unseal_response(response: UnsealResponse) -> Result<BigUint, FheError> {
    if let Some(err) = response.error {
        return Err(FheError::from_message(&err));
    }
    let value = response
        .value
        .ok_or_else(|| FheError::Service("empty unseal response".to_string()))?;
    BigUint::from_str(&value).map_err(|e| FheError::Service(format!("bad plaintext: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyUnsealer {
        not_ready_for: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Unsealer for FlakyUnsealer {
        async fn unseal(&self, handle: &BigUint, _kind: SealedKind) -> Result<BigUint, FheError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.not_ready_for {
                Err(FheError::SealedDataNotFound)
            } else {
                Ok(handle + 1u32)
            }
        }
    }

    struct DeniedUnsealer {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Unsealer for DeniedUnsealer {
        async fn unseal(&self, _handle: &BigUint, _kind: SealedKind) -> Result<BigUint, FheError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(FheError::PermitMissing)
        }
    }

    fn fast_policy(max_attempts: u32) -> UnsealRetryPolicy {
        UnsealRetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 2,
            backoff: Backoff::Exponential,
        }
    }

    #[tokio::test]
    async fn test_retries_until_sealed_data_appears() {
        let unsealer = FlakyUnsealer {
            not_ready_for: 2,
            calls: AtomicU32::new(0),
        };
        let out = unseal_with_retry(&unsealer, &BigUint::from(41u32), SealedKind::Uint128, &fast_policy(5))
            .await
            .unwrap();
        assert_eq!(out, BigUint::from(42u32));
        assert_eq!(unsealer.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let unsealer = FlakyUnsealer {
            not_ready_for: 10,
            calls: AtomicU32::new(0),
        };
        let err = unseal_with_retry(&unsealer, &BigUint::from(1u32), SealedKind::Uint128, &fast_policy(3))
            .await
            .unwrap_err();
        assert_eq!(err, FheError::SealedDataNotFound);
        assert_eq!(unsealer.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permit_errors_are_not_retried() {
        let unsealer = DeniedUnsealer {
            calls: AtomicU32::new(0),
        };
        let err = unseal_with_retry(&unsealer, &BigUint::from(1u32), SealedKind::Uint128, &fast_policy(5))
            .await
            .unwrap_err();
        assert_eq!(err, FheError::PermitMissing);
        assert_eq!(unsealer.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_delays() {
        let policy = UnsealRetryPolicy {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 350,
            backoff: Backoff::Exponential,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));

        let fixed = UnsealRetryPolicy {
            backoff: Backoff::Fixed,
            ..policy
        };
        assert_eq!(fixed.delay_for(4), Duration::from_millis(100));
    }

    #[test]
    fn test_parse_unseal_response() {
        let ok = parse_unseal_response(UnsealResponse {
            value: Some("1000".into()),
            error: None,
        });
        assert_eq!(ok.unwrap(), BigUint::from(1000u32));

        let not_ready = parse_unseal_response(UnsealResponse {
            value: None,
            error: Some("Sealed data not found for handle".into()),
        });
        assert_eq!(not_ready.unwrap_err(), FheError::SealedDataNotFound);
    }
}
