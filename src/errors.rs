//! Error categorization and message cleanup
//!
//! Nothing here is fatal. Every failure is reduced to a category and a short
//! human-readable message that the affected output (CLI row, API body) shows
//! instead of data.

use serde::Serialize;

use crate::chain::RpcError;
use crate::fhe::FheError;

const MAX_MESSAGE_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    WalletRejection,
    Rpc,
    ContractRevert,
    FheTiming,
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCategory::WalletRejection => "wallet_rejection",
            ErrorCategory::Rpc => "rpc",
            ErrorCategory::ContractRevert => "contract_revert",
            ErrorCategory::FheTiming => "fhe_timing",
            ErrorCategory::Other => "other",
        }
    }
}

/// Categorize an error, preferring typed causes over message matching.
pub fn categorize(err: &anyhow::Error) -> ErrorCategory {
    for cause in err.chain() {
        if let Some(rpc) = cause.downcast_ref::<RpcError>() {
            return if rpc.is_revert() {
                ErrorCategory::ContractRevert
            } else if rpc.code == 4001 {
                ErrorCategory::WalletRejection
            } else {
                ErrorCategory::Rpc
            };
        }
        if let Some(fhe) = cause.downcast_ref::<FheError>() {
            return if fhe.is_retryable() {
                ErrorCategory::FheTiming
            } else {
                ErrorCategory::Other
            };
        }
        if cause.downcast_ref::<reqwest::Error>().is_some() {
            return ErrorCategory::Rpc;
        }
    }
    categorize_message(&format!("{:#}", err))
}

/// Message-only categorization, for errors that arrive as text.
pub fn categorize_message(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    if lower.contains("user rejected")
        || lower.contains("user denied")
        || lower.contains("rejected the request")
        || lower.contains("code 4001")
    {
        ErrorCategory::WalletRejection
    } else if lower.contains("sealed data not found") {
        ErrorCategory::FheTiming
    } else if lower.contains("execution reverted") || lower.contains("revert") {
        ErrorCategory::ContractRevert
    } else if lower.contains("rpc")
        || lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("connection")
        || lower.contains("http")
    {
        ErrorCategory::Rpc
    } else {
        ErrorCategory::Other
    }
}

/// Best-effort cleanup of node and client error text.
pub fn clean_error_message(raw: &str) -> String {
    let mut msg = raw.trim();

    // Verbose client tails carry request dumps and version banners.
    for marker in ["Request Arguments:", "Details:", "Version:", "Contract Call:"] {
        if let Some(idx) = msg.find(marker) {
            msg = msg[..idx].trim_end();
        }
    }

    let mut msg = msg.to_string();
    if let Some(idx) = msg.to_ascii_lowercase().find("execution reverted:") {
        msg = msg[idx + "execution reverted:".len()..].trim().to_string();
    }

    let msg = msg
        .trim_matches(|c: char| c == '"' || c == '\'')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    if msg.is_empty() {
        return "Unknown error".to_string();
    }
    if msg.chars().count() > MAX_MESSAGE_LEN {
        let truncated: String = msg.chars().take(MAX_MESSAGE_LEN).collect();
        return format!("{}…", truncated);
    }
    msg
}

/// Category plus cleaned message, ready for an API body or CLI row.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub category: ErrorCategory,
    pub message: String,
}

impl ErrorReport {
    pub fn from_error(err: &anyhow::Error) -> Self {
        Self {
            category: categorize(err),
            message: clean_error_message(&format!("{:#}", err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_rpc_revert() {
        let err = anyhow::Error::new(RpcError {
            code: 3,
            message: "execution reverted: bucket not initialized".into(),
            data: None,
        })
        .context("eth_call failed");
        assert_eq!(categorize(&err), ErrorCategory::ContractRevert);
    }

    #[test]
    fn test_typed_rpc_failure() {
        let err = anyhow::Error::new(RpcError {
            code: -32005,
            message: "query returned more than 10000 results".into(),
            data: None,
        });
        assert_eq!(categorize(&err), ErrorCategory::Rpc);
    }

    #[test]
    fn test_fhe_timing() {
        let err = anyhow::Error::new(FheError::SealedDataNotFound).context("unseal shares");
        assert_eq!(categorize(&err), ErrorCategory::FheTiming);
    }

    #[test]
    fn test_message_patterns() {
        assert_eq!(
            categorize_message("MetaMask Tx Signature: User denied transaction signature."),
            ErrorCategory::WalletRejection
        );
        assert_eq!(categorize_message("request timed out"), ErrorCategory::Rpc);
        assert_eq!(categorize_message("something odd"), ErrorCategory::Other);
    }

    #[test]
    fn test_clean_error_message() {
        let raw = "The contract function \"claim\" reverted with the following reason:\nexecution reverted: NothingToClaim\n\nContract Call:\n  address: 0x00\nVersion: viem@2.0.0";
        assert_eq!(clean_error_message(raw), "NothingToClaim");

        let raw = "  \"RPC error -32000: header not found\"  ";
        assert_eq!(clean_error_message(raw), "RPC error -32000: header not found");

        assert_eq!(clean_error_message("   "), "Unknown error");

        let long = "x".repeat(500);
        assert_eq!(clean_error_message(&long).chars().count(), MAX_MESSAGE_LEN + 1);
    }
}
