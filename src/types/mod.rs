//! Shared types for the points ledger

mod error;

pub use error::{LedgerError, Result};
