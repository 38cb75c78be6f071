//! User positions in encrypted limit-order buckets
//!
//! - `events`: decoding of Deposit / BucketFilled / Claim logs
//! - `contract`: `positions(...)` and `buckets(...)` view calls
//! - `reconcile`: event reconciliation and claimability

pub mod contract;
pub mod events;
pub mod reconcile;

pub use contract::{HookContract, PositionRecord};
pub use events::{BucketFilledEvent, ClaimEvent, DepositEvent, EventTopics};
pub use reconcile::{
    derive_claimability, ClaimReport, Claimability, EventHistory, PositionReconciler,
    ReconcileConfig, SkippedPosition,
};
