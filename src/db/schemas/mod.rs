//! Database schemas for the points ledger
//!
//! Defines MongoDB document structures for user balances and point events.

mod point_event;
mod user;

pub use point_event::{EventStatus, PointEventDoc, POINT_EVENT_COLLECTION};
pub use user::{UnlockEntry, UserDoc, USER_COLLECTION};
