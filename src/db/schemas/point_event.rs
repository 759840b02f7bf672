//! Point event document schema
//!
//! Append-only ledger entries. An event is created exactly once per
//! successful award or redemption and never mutated afterwards, except the
//! out-of-band `completed -> admin_canceled` transition applied by
//! administrative correction.

use bson::{oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::IntoIndexes;

/// Collection name for ledger entries
pub const POINT_EVENT_COLLECTION: &str = "point_events";

/// Lifecycle status of a ledger entry
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    #[default]
    Completed,
    AdminCanceled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::AdminCanceled => "admin_canceled",
        }
    }
}

/// Immutable record of one balance change plus its audit snapshot
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PointEventDoc {
    /// MongoDB document ID
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub user_id: String,

    /// Task or reward name that produced this entry
    pub event_name: String,

    /// Signed point delta applied to the balance
    pub points: i64,

    /// Opaque audit payload describing what triggered the entry
    #[serde(default)]
    pub snapshot: Document,

    #[serde(default)]
    pub status: EventStatus,

    /// Slot index for capped events. The unique partial index on
    /// (user_id, event_name, ordinal) is what makes run-count caps safe
    /// under concurrent awards; unbounded tasks carry no ordinal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordinal: Option<i64>,

    pub created_at: DateTime,
}

impl PointEventDoc {
    pub fn new(
        user_id: impl Into<String>,
        event_name: impl Into<String>,
        points: i64,
        snapshot: Document,
    ) -> Self {
        Self {
            id: None,
            user_id: user_id.into(),
            event_name: event_name.into(),
            points,
            snapshot,
            status: EventStatus::Completed,
            ordinal: None,
            created_at: DateTime::now(),
        }
    }

    pub fn with_ordinal(mut self, ordinal: i64) -> Self {
        self.ordinal = Some(ordinal);
        self
    }
}

impl IntoIndexes for PointEventDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Unique slot per (user, event, ordinal): turns a lost award
            // race into a duplicate-key error instead of a double grant.
            // Partial so unbounded tasks (no ordinal) never collide.
            (
                bson::doc! { "user_id": 1, "event_name": 1, "ordinal": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .partial_filter_expression(bson::doc! { "ordinal": { "$exists": true } })
                        .name("event_slot_unique".to_string())
                        .build(),
                ),
            ),
            // Cap counting and balance reconciliation
            (
                bson::doc! { "user_id": 1, "event_name": 1, "status": 1 },
                Some(
                    IndexOptions::builder()
                        .name("user_event_status_index".to_string())
                        .build(),
                ),
            ),
            // History reads, newest first
            (
                bson::doc! { "user_id": 1, "created_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("user_history_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_event_is_completed() {
        let event = PointEventDoc::new("user-1", "write_experience", 1000, Document::new());
        assert_eq!(event.status, EventStatus::Completed);
        assert!(event.ordinal.is_none());
        assert_eq!(event.points, 1000);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let completed = bson::to_bson(&EventStatus::Completed).unwrap();
        assert_eq!(completed, bson::Bson::String("completed".into()));

        let canceled = bson::to_bson(&EventStatus::AdminCanceled).unwrap();
        assert_eq!(canceled, bson::Bson::String("admin_canceled".into()));

        // as_str must agree with the serde names used in query filters
        assert_eq!(EventStatus::Completed.as_str(), "completed");
        assert_eq!(EventStatus::AdminCanceled.as_str(), "admin_canceled");
    }

    #[test]
    fn test_ordinal_is_omitted_when_absent() {
        let event = PointEventDoc::new("user-1", "write_experience", 1000, Document::new());
        let doc = bson::to_document(&event).unwrap();
        assert!(!doc.contains_key("ordinal"));

        let capped = event.with_ordinal(0);
        let doc = bson::to_document(&capped).unwrap();
        assert_eq!(doc.get_i64("ordinal").unwrap(), 0);
    }

    #[test]
    fn test_slot_index_is_unique_and_partial() {
        let indices = PointEventDoc::into_indices();
        let (keys, opts) = &indices[0];
        assert_eq!(keys.get_i32("ordinal").unwrap(), 1);

        let opts = opts.as_ref().unwrap();
        assert_eq!(opts.unique, Some(true));
        assert!(opts.partial_filter_expression.is_some());
    }
}
