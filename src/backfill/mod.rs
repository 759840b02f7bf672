//! Backfill reconciler
//!
//! One-time batch that seeds retroactive balances from pre-existing
//! qualifying submissions (published, non-archived). Idempotent by
//! construction: the synthetic grant event claims the same unique
//! (user_id, event_name, ordinal) slot as capped tasks, so a re-run finds
//! the slot taken and changes nothing.

use std::collections::HashMap;

use async_trait::async_trait;
use bson::{doc, Bson, DateTime, Document};
use futures_util::TryStreamExt;
use mongodb::options::ReturnDocument;
use mongodb::ClientSession;
use tracing::{debug, info};

use crate::catalog::BackfillRates;
use crate::db::mongo::{finish_transaction, is_duplicate_key, MongoClient, MongoCollection};
use crate::db::schemas::{PointEventDoc, UserDoc, POINT_EVENT_COLLECTION, USER_COLLECTION};
use crate::types::Result;

/// Event name of the synthetic retroactive grant
pub const BACKFILL_EVENT: &str = "points_backfill";

/// Collection of submitted experiences (collaborator data)
pub const EXPERIENCE_COLLECTION: &str = "experiences";
/// Collection of submitted salary/work-time records (collaborator data)
pub const SALARY_WORK_TIME_COLLECTION: &str = "salary_work_times";

/// Grant attempts per user before the run gives up on write conflicts
const MAX_GRANT_ATTEMPTS: u32 = 5;

/// Per-user counts of qualifying historical submissions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionTally {
    pub user_id: String,
    pub experience_count: i64,
    pub salary_work_time_count: i64,
}

/// Supplies the per-user submission counts the grant is computed from.
///
/// The scan/aggregation mechanics live behind this contract; the reconciler
/// only owns the grant's idempotency and atomicity.
#[async_trait]
pub trait SubmissionSource: Send + Sync {
    async fn tallies(&self) -> Result<Vec<SubmissionTally>>;
}

/// What one reconciler run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillSummary {
    pub users_seen: usize,
    pub users_granted: usize,
    /// Users with zero qualifying submissions: no event, balance untouched
    pub users_skipped_zero: usize,
    /// Users whose grant slot was already taken by an earlier run
    pub users_already_reconciled: usize,
    pub points_granted: i64,
}

/// One-time batch that computes and seeds retroactive balances
pub struct BackfillReconciler {
    mongo: MongoClient,
    users: MongoCollection<UserDoc>,
    events: MongoCollection<PointEventDoc>,
    rates: BackfillRates,
}

impl BackfillReconciler {
    pub async fn new(mongo: MongoClient, rates: BackfillRates) -> Result<Self> {
        let users = mongo.collection::<UserDoc>(USER_COLLECTION).await?;
        let events = mongo
            .collection::<PointEventDoc>(POINT_EVENT_COLLECTION)
            .await?;
        Ok(Self {
            mongo,
            users,
            events,
            rates,
        })
    }

    /// Run the reconciliation over every tallied user.
    ///
    /// With `dry_run` the grants are computed and counted but nothing is
    /// written.
    pub async fn run(&self, source: &dyn SubmissionSource, dry_run: bool) -> Result<BackfillSummary> {
        let tallies = source.tallies().await?;
        info!(users = tallies.len(), dry_run = dry_run, "Starting points backfill");

        let mut summary = BackfillSummary::default();
        for tally in tallies {
            summary.users_seen += 1;
            let total = retro_total(&self.rates, &tally);
            if total == 0 {
                summary.users_skipped_zero += 1;
                continue;
            }

            if dry_run {
                debug!(user_id = %tally.user_id, points = total, "Would grant (dry run)");
                summary.users_granted += 1;
                summary.points_granted += total;
                continue;
            }

            match self.grant_with_retry(&tally, total).await? {
                true => {
                    summary.users_granted += 1;
                    summary.points_granted += total;
                }
                false => {
                    debug!(user_id = %tally.user_id, "Already reconciled, skipping");
                    summary.users_already_reconciled += 1;
                }
            }
        }

        info!(
            seen = summary.users_seen,
            granted = summary.users_granted,
            skipped_zero = summary.users_skipped_zero,
            already_reconciled = summary.users_already_reconciled,
            points = summary.points_granted,
            "Points backfill finished"
        );
        Ok(summary)
    }

    /// Grant one user's retroactive total, retrying storage-level write
    /// conflicts. Returns false when the user was already reconciled.
    ///
    /// A write conflict has two causes that must not be conflated: a
    /// concurrent run claimed the grant slot (the grant exists, skip), or
    /// live ledger traffic touched the same user document (the grant does
    /// not exist yet, try again). Only the event's existence tells them
    /// apart; a run that cannot land the grant fails rather than
    /// under-reporting it as reconciled.
    async fn grant_with_retry(&self, tally: &SubmissionTally, total: i64) -> Result<bool> {
        let mut attempts = 0;
        loop {
            match self.grant(tally, total).await {
                Err(err) if err.is_retryable() => {
                    if self.already_reconciled(&tally.user_id).await? {
                        return Ok(false);
                    }
                    attempts += 1;
                    if attempts >= MAX_GRANT_ATTEMPTS {
                        return Err(err);
                    }
                    debug!(
                        user_id = %tally.user_id,
                        attempt = attempts,
                        "Retrying grant after write conflict"
                    );
                }
                outcome => return outcome,
            }
        }
    }

    async fn already_reconciled(&self, user_id: &str) -> Result<bool> {
        Ok(self
            .events
            .find_one(doc! { "user_id": user_id, "event_name": BACKFILL_EVENT })
            .await?
            .is_some())
    }

    /// Grant one user's retroactive total. Returns false when the user was
    /// already reconciled by an earlier run.
    async fn grant(&self, tally: &SubmissionTally, total: i64) -> Result<bool> {
        let mut session = self.mongo.start_session().await?;
        session.start_transaction().await?;
        let outcome = self.grant_in_txn(&mut session, tally, total).await;
        finish_transaction(session, outcome).await
    }

    async fn grant_in_txn(
        &self,
        session: &mut ClientSession,
        tally: &SubmissionTally,
        total: i64,
    ) -> Result<bool> {
        let already = self
            .events
            .inner()
            .find_one(doc! { "user_id": &tally.user_id, "event_name": BACKFILL_EVENT })
            .session(&mut *session)
            .await?;
        if already.is_some() {
            return Ok(false);
        }

        // Ordinal 0 claims the one-per-user slot; a racing second run hits
        // the unique index and aborts.
        let event = PointEventDoc::new(
            &tally.user_id,
            BACKFILL_EVENT,
            total,
            backfill_snapshot(tally),
        )
        .with_ordinal(0);
        self.events
            .inner()
            .insert_one(&event)
            .session(&mut *session)
            .await
            .map_err(|err| {
                if is_duplicate_key(&err) {
                    crate::types::LedgerError::ConcurrencyConflict(
                        "backfill slot claimed by a concurrent run".into(),
                    )
                } else {
                    err.into()
                }
            })?;

        let now = DateTime::now();
        self.users
            .inner()
            .find_one_and_update(
                doc! { "_id": &tally.user_id },
                doc! {
                    "$inc": { "points": total },
                    "$set": { "updated_at": now },
                    "$setOnInsert": { "created_at": now },
                },
            )
            .upsert(true)
            .return_document(ReturnDocument::After)
            .session(&mut *session)
            .await?;

        Ok(true)
    }
}

/// Retroactive total for one user at the fixed per-item rates
pub(crate) fn retro_total(rates: &BackfillRates, tally: &SubmissionTally) -> i64 {
    tally.experience_count * rates.experience_points
        + tally.salary_work_time_count * rates.salary_work_time_points
}

/// Audit snapshot recording what the grant was computed from
pub(crate) fn backfill_snapshot(tally: &SubmissionTally) -> Document {
    doc! {
        "experience_count": tally.experience_count,
        "salary_work_time_count": tally.salary_work_time_count,
    }
}

/// Tally source that aggregates the submission collections directly
pub struct MongoSubmissionSource {
    mongo: MongoClient,
}

impl MongoSubmissionSource {
    pub fn new(mongo: MongoClient) -> Self {
        Self { mongo }
    }

    /// Count published, non-archived documents per user in one collection
    async fn count_by_user(&self, collection_name: &str) -> Result<Vec<(String, i64)>> {
        let pipeline = vec![
            doc! { "$match": { "status": "published", "archived": { "$ne": true } } },
            doc! { "$group": { "_id": "$user_id", "count": { "$sum": 1 } } },
        ];

        let mut cursor = self
            .mongo
            .database()
            .collection::<Document>(collection_name)
            .aggregate(pipeline)
            .await?;

        let mut rows = Vec::new();
        while let Some(row) = cursor.try_next().await? {
            let user_id = row.get_str("_id").unwrap_or_default().to_string();
            if user_id.is_empty() {
                continue;
            }
            let count = match row.get("count") {
                Some(Bson::Int32(n)) => i64::from(*n),
                Some(Bson::Int64(n)) => *n,
                _ => 0,
            };
            rows.push((user_id, count));
        }
        Ok(rows)
    }
}

#[async_trait]
impl SubmissionSource for MongoSubmissionSource {
    async fn tallies(&self) -> Result<Vec<SubmissionTally>> {
        let mut merged: HashMap<String, SubmissionTally> = HashMap::new();

        for (user_id, count) in self.count_by_user(EXPERIENCE_COLLECTION).await? {
            merged
                .entry(user_id.clone())
                .or_insert_with(|| SubmissionTally {
                    user_id,
                    ..Default::default()
                })
                .experience_count = count;
        }

        for (user_id, count) in self.count_by_user(SALARY_WORK_TIME_COLLECTION).await? {
            merged
                .entry(user_id.clone())
                .or_insert_with(|| SubmissionTally {
                    user_id,
                    ..Default::default()
                })
                .salary_work_time_count = count;
        }

        Ok(merged.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tally(user_id: &str, experiences: i64, salaries: i64) -> SubmissionTally {
        SubmissionTally {
            user_id: user_id.into(),
            experience_count: experiences,
            salary_work_time_count: salaries,
        }
    }

    #[test]
    fn test_retro_total_at_fixed_rates() {
        let rates = BackfillRates::default();

        // 2 published experiences and 1 published salary record
        assert_eq!(retro_total(&rates, &tally("u", 2, 1)), 2500);
        assert_eq!(retro_total(&rates, &tally("u", 0, 0)), 0);
        assert_eq!(retro_total(&rates, &tally("u", 0, 3)), 1500);
    }

    #[test]
    fn test_snapshot_records_counts() {
        let snapshot = backfill_snapshot(&tally("u", 2, 1));
        assert_eq!(snapshot.get_i64("experience_count").unwrap(), 2);
        assert_eq!(snapshot.get_i64("salary_work_time_count").unwrap(), 1);
    }

    #[test]
    fn test_synthetic_event_claims_slot_zero() {
        let t = tally("user-1", 2, 1);
        let event = PointEventDoc::new(&t.user_id, BACKFILL_EVENT, 2500, backfill_snapshot(&t))
            .with_ordinal(0);
        assert_eq!(event.ordinal, Some(0));
        assert_eq!(event.event_name, BACKFILL_EVENT);
        assert_eq!(event.points, 2500);
    }
}
