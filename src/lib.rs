//! Hookbook Backend Library
//!
//! Reconciles a user's encrypted limit-order positions on the hook contract
//! from on-chain event logs, and serves them over a small read-only API.

pub mod api;
pub mod cache;
pub mod chain;
pub mod config;
pub mod errors;
pub mod fhe;
pub mod models;
pub mod pools;
pub mod positions;
