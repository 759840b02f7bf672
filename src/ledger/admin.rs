//! Administrative corrections
//!
//! The only mutation a point event ever sees after creation: an out-of-band
//! `completed -> admin_canceled` transition, applied with a compensating
//! balance adjustment so the balance keeps equaling the sum of completed
//! deltas. Never invoked by the ledger's own normal-flow operations.

use bson::{doc, oid::ObjectId};
use mongodb::ClientSession;
use tracing::warn;

use crate::db::mongo::finish_transaction;
use crate::db::schemas::{EventStatus, PointEventDoc};
use crate::types::{LedgerError, Result};

use super::PointsLedger;

/// Outcome of an administrative cancellation
#[derive(Debug, Clone)]
pub struct CancelReceipt {
    pub balance: i64,
    pub event_name: String,
    pub reversed_points: i64,
}

impl PointsLedger {
    /// Cancel a completed event and reverse its balance effect.
    ///
    /// Not re-entrant: a second cancel of the same event fails with
    /// `Validation`. A cancel whose reversal would drive the balance
    /// negative fails with `InsufficientBalance` and changes nothing.
    /// Canceling a redemption refunds the points; the unlock itself stays.
    pub async fn admin_cancel(&self, event_id: ObjectId) -> Result<CancelReceipt> {
        let mut session = self.mongo.start_session().await?;
        session.start_transaction().await?;
        let outcome = self.cancel_in_txn(&mut session, event_id).await;
        let receipt = finish_transaction(session, outcome).await?;

        warn!(
            event_id = %event_id.to_hex(),
            event_name = %receipt.event_name,
            reversed_points = receipt.reversed_points,
            balance = receipt.balance,
            "Admin-canceled point event"
        );
        Ok(receipt)
    }

    async fn cancel_in_txn(
        &self,
        session: &mut ClientSession,
        event_id: ObjectId,
    ) -> Result<CancelReceipt> {
        // Conditional on `completed` so the transition can happen once.
        // The ordinal is unset to free the cap slot for re-earning.
        let event: PointEventDoc = match self
            .events
            .inner()
            .find_one_and_update(
                doc! { "_id": event_id, "status": EventStatus::Completed.as_str() },
                doc! {
                    "$set": { "status": EventStatus::AdminCanceled.as_str() },
                    "$unset": { "ordinal": "" },
                },
            )
            .session(&mut *session)
            .await?
        {
            Some(event) => event,
            None => {
                let existing = self
                    .events
                    .inner()
                    .find_one(doc! { "_id": event_id })
                    .session(&mut *session)
                    .await?;
                return Err(match existing {
                    Some(_) => LedgerError::Validation(format!(
                        "event {} is already canceled",
                        event_id.to_hex()
                    )),
                    None => LedgerError::NotFound(format!(
                        "point event {} does not exist",
                        event_id.to_hex()
                    )),
                });
            }
        };

        let user = match self
            .apply_balance_delta(session, &event.user_id, -event.points, false)
            .await?
        {
            Some(user) => user,
            None if event.points > 0 => {
                // The reversal of an award would overdraw the balance
                let available = self
                    .users
                    .inner()
                    .find_one(doc! { "_id": &event.user_id })
                    .session(&mut *session)
                    .await?
                    .map(|user| user.points)
                    .unwrap_or(0);
                return Err(LedgerError::InsufficientBalance {
                    required: event.points,
                    available,
                });
            }
            None => {
                return Err(LedgerError::NotFound(format!(
                    "user '{}' has no balance document",
                    event.user_id
                )));
            }
        };

        Ok(CancelReceipt {
            balance: user.points,
            event_name: event.event_name,
            reversed_points: event.points,
        })
    }
}
