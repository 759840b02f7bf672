//! Points ledger core for a crowd-sourced salary and interview data service
//!
//! Users earn points for verified actions (submitting salary data, writing
//! an experience, sharing the site) and spend points to unlock gated content
//! or purchase a time-bounded viewing permission.
//!
//! ## Guarantees
//!
//! - **Exactly-once award** per capped action: run-count caps hold under
//!   concurrent requests via a unique index slot, never read-then-write
//! - **Exactly-once unlock** per (user, content) pair
//! - **No double-spend**: balance check and decrement are one conditional
//!   write, so racing redemptions serialize at the storage layer
//! - **Reconcilable audit trail**: the balance always equals the sum of
//!   completed point event deltas; every operation commits the balance
//!   change and the log entry in one transaction or not at all
//!
//! Transport, identity, and document search stay outside; the ledger only
//! sees authenticated user ids and collaborator lookups.

pub mod backfill;
pub mod catalog;
pub mod config;
pub mod content;
pub mod db;
pub mod ledger;
pub mod types;

pub use catalog::{BackfillRates, Catalog, RewardDefinition, TaskDefinition};
pub use content::{ContentKind, ContentLookup, ContentRef, InMemoryContentLookup};
pub use ledger::{
    AwardReceipt, CancelReceipt, PermissionReceipt, PointsLedger, RedeemReceipt, Snapshot,
};
pub use types::{LedgerError, Result};
