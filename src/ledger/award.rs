//! Task awards
//!
//! Users earn points for verified actions: submitting salary data, writing
//! an experience, sharing the site. Each task carries a per-user run-count
//! cap enforced by a unique index slot, never by read-then-write.

use bson::{doc, oid::ObjectId, Document};
use mongodb::ClientSession;
use tracing::{debug, info};

use crate::catalog::TaskDefinition;
use crate::content::{ContentKind, ContentRef};
use crate::db::mongo::{finish_transaction, is_duplicate_key};
use crate::db::schemas::PointEventDoc;
use crate::types::{LedgerError, Result};

use super::PointsLedger;

/// Outcome of a successful award
#[derive(Debug, Clone)]
pub struct AwardReceipt {
    pub balance: i64,
    pub event_id: ObjectId,
}

/// Audit payload recorded with an award.
///
/// When the claimed action references content (a submitted record), the
/// reference is verified through the content lookup before the ledger is
/// touched, and echoed into the stored payload.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub content: Option<ContentRef>,
    pub payload: Document,
}

impl Snapshot {
    /// Snapshot with no content reference (e.g. sharing the site)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Snapshot referencing one content item
    pub fn for_content(kind: ContentKind, content_id: &str) -> Self {
        Self {
            content: Some(ContentRef::new(kind, content_id)),
            payload: doc! {
                "content_id": content_id,
                "content_type": kind.as_str(),
            },
        }
    }

    pub fn with_payload(mut self, payload: Document) -> Self {
        self.payload = payload;
        self
    }
}

impl PointsLedger {
    /// Award task points to a user.
    ///
    /// Fails with `TaskLimitExceeded` when the task's run cap is exhausted,
    /// `NotFound` when the referenced content does not exist, and
    /// `ConcurrencyConflict` when a concurrent award for the same slot won
    /// the race (nothing committed; safe to retry).
    pub async fn award(
        &self,
        user_id: &str,
        task_name: &str,
        snapshot: Snapshot,
    ) -> Result<AwardReceipt> {
        let task = self
            .catalog
            .task(task_name)
            .ok_or_else(|| LedgerError::Validation(format!("unknown task '{}'", task_name)))?
            .clone();

        if let Some(ref content) = snapshot.content {
            self.verify_content(Some(user_id), content).await?;
        }

        let mut session = self.mongo.start_session().await?;
        session.start_transaction().await?;
        let outcome = self
            .award_in_txn(&mut session, user_id, &task, &snapshot)
            .await;

        match finish_transaction(session, outcome).await {
            Ok(receipt) => {
                info!(
                    user_id = %user_id,
                    task = %task.name,
                    points = task.points_awarded,
                    balance = receipt.balance,
                    "Awarded task points"
                );
                Ok(receipt)
            }
            Err(err) => Err(self.classify_award_conflict(user_id, &task, err).await),
        }
    }

    async fn award_in_txn(
        &self,
        session: &mut ClientSession,
        user_id: &str,
        task: &TaskDefinition,
        snapshot: &Snapshot,
    ) -> Result<AwardReceipt> {
        let completed = self
            .completed_count(Some(&mut *session), user_id, &task.name)
            .await?;
        if task.cap_reached(completed) {
            return Err(LedgerError::TaskLimitExceeded {
                task: task.name.clone(),
                max_runs: task.max_run_count,
            });
        }

        // Capped tasks claim the next free slot; the unique partial index
        // rejects a concurrent claim of the same slot.
        let mut event = PointEventDoc::new(
            user_id,
            &task.name,
            task.points_awarded,
            snapshot.payload.clone(),
        );
        if task.is_capped() {
            let slot = self
                .next_award_slot(&mut *session, user_id, &task.name)
                .await?;
            event = event.with_ordinal(slot);
            debug!(user_id = %user_id, task = %task.name, slot = slot, "Claiming capped award slot");
        }

        let inserted = self
            .events
            .inner()
            .insert_one(&event)
            .session(&mut *session)
            .await
            .map_err(|err| {
                if is_duplicate_key(&err) {
                    LedgerError::ConcurrencyConflict(format!(
                        "award slot already claimed: {}",
                        err
                    ))
                } else {
                    err.into()
                }
            })?;
        let event_id = inserted
            .inserted_id
            .as_object_id()
            .ok_or_else(|| LedgerError::Database("inserted event id missing".into()))?;

        // User doc is created lazily on first award
        let user = self
            .apply_balance_delta(session, user_id, task.points_awarded, true)
            .await?
            .ok_or_else(|| LedgerError::Database("balance upsert returned nothing".into()))?;

        Ok(AwardReceipt {
            balance: user.points,
            event_id,
        })
    }

    /// Slots are monotonic: one past the highest ordinal still recorded for
    /// this (user, task). Slot numbers are never re-claimed, so an award
    /// after an admin cancel takes a fresh slot instead of colliding with a
    /// surviving event's.
    async fn next_award_slot(
        &self,
        session: &mut ClientSession,
        user_id: &str,
        event_name: &str,
    ) -> Result<i64> {
        let highest = self
            .events
            .inner()
            .find_one(doc! {
                "user_id": user_id,
                "event_name": event_name,
                "ordinal": { "$exists": true },
            })
            .sort(doc! { "ordinal": -1 })
            .session(&mut *session)
            .await?;

        Ok(next_slot(highest.and_then(|event| event.ordinal)))
    }

    /// Re-read the cap after a lost race: a conflict on a capped task whose
    /// cap is now exhausted is reported as the cap error, matching what the
    /// caller would see on retry.
    async fn classify_award_conflict(
        &self,
        user_id: &str,
        task: &TaskDefinition,
        err: LedgerError,
    ) -> LedgerError {
        if !err.is_retryable() || !task.is_capped() {
            return err;
        }

        match self.completed_count(None, user_id, &task.name).await {
            Ok(completed) if task.cap_reached(completed) => LedgerError::TaskLimitExceeded {
                task: task.name.clone(),
                max_runs: task.max_run_count,
            },
            _ => err,
        }
    }
}

/// One past the highest claimed slot, 0 when no slot exists yet
pub(crate) fn next_slot(highest: Option<i64>) -> i64 {
    highest.map(|ordinal| ordinal + 1).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_slot_never_reuses_a_freed_ordinal() {
        assert_eq!(next_slot(None), 0);
        assert_eq!(next_slot(Some(0)), 1);

        // A canceled slot-0 event leaves the survivor at ordinal 1; the
        // re-earned award must claim 2, not collide with the survivor.
        assert_eq!(next_slot(Some(1)), 2);
    }

    #[test]
    fn test_snapshot_for_content_echoes_reference() {
        let snapshot = Snapshot::for_content(ContentKind::Experience, "exp-7");
        let content = snapshot.content.as_ref().unwrap();
        assert_eq!(content.kind, ContentKind::Experience);
        assert_eq!(content.content_id, "exp-7");
        assert_eq!(snapshot.payload.get_str("content_id").unwrap(), "exp-7");
        assert_eq!(snapshot.payload.get_str("content_type").unwrap(), "experience");
    }

    #[test]
    fn test_empty_snapshot_has_no_reference() {
        let snapshot = Snapshot::empty();
        assert!(snapshot.content.is_none());
        assert!(snapshot.payload.is_empty());
    }
}
