//! Points ledger core
//!
//! The one subsystem with real invariants: exactly-once award per capped
//! action, exactly-once unlock per content item, no double-spend of a shared
//! balance, and an audit trail that always reconciles with the live balance.
//! Correct under concurrent requests from the same user and across
//! horizontally scaled processes, because every check-and-mutate step is a
//! storage-level atomic primitive.

mod admin;
mod award;
mod permission;
mod redeem;

pub use admin::CancelReceipt;
pub use award::{AwardReceipt, Snapshot};
pub use permission::{PermissionReceipt, PERMISSION_EVENT};
pub use redeem::RedeemReceipt;

use std::sync::Arc;

use bson::{doc, DateTime, Document};
use mongodb::options::ReturnDocument;
use mongodb::ClientSession;

use crate::catalog::Catalog;
use crate::content::{ContentLookup, ContentRef};
use crate::db::mongo::{MongoClient, MongoCollection};
use crate::db::schemas::{PointEventDoc, UserDoc, POINT_EVENT_COLLECTION, USER_COLLECTION};
use crate::types::{LedgerError, Result};

/// The points ledger: award, redeem, and permission operations plus reads.
///
/// Holds its catalog and content-lookup collaborator explicitly; nothing is
/// read from global state.
#[derive(Clone)]
pub struct PointsLedger {
    pub(crate) mongo: MongoClient,
    pub(crate) users: MongoCollection<UserDoc>,
    pub(crate) events: MongoCollection<PointEventDoc>,
    pub(crate) catalog: Arc<Catalog>,
    pub(crate) content: Arc<dyn ContentLookup>,
}

impl PointsLedger {
    /// Create the ledger, binding collections and applying their indexes
    pub async fn new(
        mongo: MongoClient,
        catalog: Arc<Catalog>,
        content: Arc<dyn ContentLookup>,
    ) -> Result<Self> {
        let users = mongo.collection::<UserDoc>(USER_COLLECTION).await?;
        let events = mongo
            .collection::<PointEventDoc>(POINT_EVENT_COLLECTION)
            .await?;

        Ok(Self {
            mongo,
            users,
            events,
            catalog,
            content,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Current balance; 0 for users with no ledger activity yet
    pub async fn balance(&self, user_id: &str) -> Result<i64> {
        Ok(self
            .users
            .find_one(doc! { "_id": user_id })
            .await?
            .map(|user| user.points)
            .unwrap_or(0))
    }

    /// Full ledger history for a user, newest first
    pub async fn history(&self, user_id: &str) -> Result<Vec<PointEventDoc>> {
        self.events
            .find_many(doc! { "user_id": user_id }, doc! { "created_at": -1 })
            .await
    }

    /// Resolve a content reference through the collaborator lookup.
    ///
    /// Returns the owner's user id. When `claimant` is given (awards), the
    /// content must belong to the claimer.
    pub(crate) async fn verify_content(
        &self,
        claimant: Option<&str>,
        content: &ContentRef,
    ) -> Result<String> {
        let owner = self
            .content
            .exists(content.kind, &content.content_id)
            .await?
            .ok_or_else(|| {
                LedgerError::NotFound(format!(
                    "{} '{}' does not exist",
                    content.kind.as_str(),
                    content.content_id
                ))
            })?;

        if let Some(user_id) = claimant {
            if owner != user_id {
                return Err(LedgerError::Validation(format!(
                    "{} '{}' belongs to another user",
                    content.kind.as_str(),
                    content.content_id
                )));
            }
        }

        Ok(owner)
    }

    /// Atomically apply a signed delta to a user's balance.
    ///
    /// Negative deltas are guarded by a `points >= |delta|` filter so the
    /// balance can never go negative; a non-matching filter returns `None`
    /// and the caller decides how to classify the failure.
    pub(crate) async fn apply_balance_delta(
        &self,
        session: &mut ClientSession,
        user_id: &str,
        delta: i64,
        upsert: bool,
    ) -> Result<Option<UserDoc>> {
        let now = DateTime::now();
        let filter = if delta < 0 {
            doc! { "_id": user_id, "points": { "$gte": -delta } }
        } else {
            doc! { "_id": user_id }
        };
        let update = doc! {
            "$inc": { "points": delta },
            "$set": { "updated_at": now },
            "$setOnInsert": { "created_at": now },
        };

        self.users
            .inner()
            .find_one_and_update(filter, update)
            .upsert(upsert)
            .return_document(ReturnDocument::After)
            .session(&mut *session)
            .await
            .map_err(Into::into)
    }

    /// Count completed runs of one event name for a user
    pub(crate) async fn completed_count(
        &self,
        session: Option<&mut ClientSession>,
        user_id: &str,
        event_name: &str,
    ) -> Result<u64> {
        let filter = completed_count_filter(user_id, event_name);
        let action = self.events.inner().count_documents(filter);
        let count = match session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        };
        Ok(count)
    }
}

/// Filter selecting a user's completed runs of one event
pub(crate) fn completed_count_filter(user_id: &str, event_name: &str) -> Document {
    doc! {
        "user_id": user_id,
        "event_name": event_name,
        "status": crate::db::schemas::EventStatus::Completed.as_str(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_count_filter_excludes_canceled_events() {
        let filter = completed_count_filter("user-1", "share_site");
        assert_eq!(filter.get_str("user_id").unwrap(), "user-1");
        assert_eq!(filter.get_str("event_name").unwrap(), "share_site");
        assert_eq!(filter.get_str("status").unwrap(), "completed");
    }
}
