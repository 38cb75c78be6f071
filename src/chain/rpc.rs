//! HTTP JSON-RPC client
//!
//! Single-flight requests only: no retries, no batching. A failed call is
//! reported to the caller, which decides whether to skip or surface it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use super::{ChainReader, LogFilter, RawLog};

/// JSON-RPC error object returned by the node.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    /// Whether the node reported an EVM revert rather than a transport or
    /// node-side problem.
    pub fn is_revert(&self) -> bool {
        self.code == 3 || self.message.to_lowercase().contains("revert")
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

/// JSON-RPC client over HTTP.
pub struct RpcClient {
    client: Client,
    rpc_url: String,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(rpc_url: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            rpc_url,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    async fn request<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });

        debug!(method, id, "RPC request");

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("{} request failed", method))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .with_context(|| format!("failed to read {} response", method))?;

        parse_response(method, status, &body)
    }
}

/// Decode a JSON-RPC response body. A JSON-RPC `error` object wins over the
/// HTTP status, so nodes that answer 4xx/5xx with one still yield [`RpcError`].
fn parse_response<T: for<'de> Deserialize<'de>>(
    method: &str,
    status: StatusCode,
    body: &[u8],
) -> Result<T> {
    let response: JsonRpcResponse<T> = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(_) if !status.is_success() => anyhow::bail!("{} returned HTTP {}", method, status),
        Err(e) => {
            return Err(anyhow::Error::new(e).context(format!("failed to parse {} response", method)))
        }
    };

    if let Some(err) = response.error {
        return Err(anyhow::Error::new(err).context(format!("{} failed", method)));
    }
    if !status.is_success() {
        anyhow::bail!("{} returned HTTP {}", method, status);
    }

    response
        .result
        .ok_or_else(|| anyhow::anyhow!("no result in {} response", method))
}

/// JSON params for an `eth_getLogs` filter.
pub fn log_filter_params(filter: &LogFilter) -> serde_json::Value {
    let topics: Vec<serde_json::Value> = filter
        .topics
        .iter()
        .map(|t| match t {
            Some(t) => serde_json::Value::String(t.clone()),
            None => serde_json::Value::Null,
        })
        .collect();

    serde_json::json!([{
        "address": filter.address,
        "topics": topics,
        "fromBlock": format!("0x{:x}", filter.from_block),
        "toBlock": format!("0x{:x}", filter.to_block),
    }])
}

#[async_trait]
impl ChainReader for RpcClient {
    async fn block_number(&self) -> Result<u64> {
        let hex: String = self.request("eth_blockNumber", serde_json::json!([])).await?;
        super::abi::parse_quantity(&hex)
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>> {
        self.request("eth_getLogs", log_filter_params(filter)).await
    }

    async fn call(&self, to: &str, data: &str) -> Result<String> {
        self.request(
            "eth_call",
            serde_json::json!([{ "to": to, "data": data }, "latest"]),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_params_encode_wildcards() {
        let filter = LogFilter::new("0xhook", "0xsig")
            .topic(Some("0xpool".into()))
            .topic(None)
            .blocks(16, 255);
        let params = log_filter_params(&filter);

        assert_eq!(params[0]["fromBlock"], "0x10");
        assert_eq!(params[0]["toBlock"], "0xff");
        assert_eq!(params[0]["topics"][1], "0xpool");
        assert!(params[0]["topics"][2].is_null());
    }

    #[test]
    fn test_rpc_error_response_parses() {
        let body = r#"{"jsonrpc":"2.0","id":1,"error":{"code":3,"message":"execution reverted: not owner","data":"0x08c379a0"}}"#;
        let parsed: JsonRpcResponse<String> = serde_json::from_str(body).unwrap();
        let err = parsed.error.unwrap();
        assert!(err.is_revert());
        assert_eq!(err.to_string(), "RPC error 3: execution reverted: not owner");
    }

    #[test]
    fn test_rpc_error_survives_http_error_status() {
        let body = br#"{"jsonrpc":"2.0","id":1,"error":{"code":-32005,"message":"limit exceeded"}}"#;
        let err = parse_response::<Vec<RawLog>>("eth_getLogs", StatusCode::TOO_MANY_REQUESTS, body)
            .unwrap_err();
        let rpc = err.downcast_ref::<RpcError>().expect("typed RpcError");
        assert_eq!(rpc.code, -32005);
    }

    #[test]
    fn test_http_error_without_json_body() {
        let err = parse_response::<String>("eth_call", StatusCode::BAD_GATEWAY, b"<html>bad gateway</html>")
            .unwrap_err();
        assert!(err.to_string().contains("HTTP 502"));
        assert!(err.downcast_ref::<RpcError>().is_none());
    }

    #[test]
    fn test_ok_status_returns_result() {
        let body = br#"{"jsonrpc":"2.0","id":1,"result":"0x1b4"}"#;
        let hex: String = parse_response("eth_blockNumber", StatusCode::OK, body).unwrap();
        assert_eq!(hex, "0x1b4");
    }

    #[test]
    fn test_get_logs_response_parses() {
        let body = r#"{"jsonrpc":"2.0","id":1,"result":[{
            "address":"0xhook","topics":["0xaa","0xbb"],"data":"0x01",
            "blockNumber":"0x1b4","logIndex":"0x2","transactionHash":"0xdead","removed":false
        }]}"#;
        let parsed: JsonRpcResponse<Vec<RawLog>> = serde_json::from_str(body).unwrap();
        let logs = parsed.result.unwrap();
        let ordinal = logs[0].ordinal().unwrap();
        assert_eq!(ordinal.block_number, 436);
        assert_eq!(ordinal.log_index, 2);
    }
}
