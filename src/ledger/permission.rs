//! Permission window purchases
//!
//! Points convert into a time-bounded viewing permission instead of a
//! content unlock. Accumulation is additive and serial: extending a window
//! that is still open appends to the previous expiry, so unused time
//! compounds instead of resetting.

use bson::{doc, oid::ObjectId, DateTime, Document};
use chrono::Utc;
use mongodb::options::ReturnDocument;
use mongodb::ClientSession;
use tracing::info;

use crate::db::mongo::finish_transaction;
use crate::db::schemas::PointEventDoc;
use crate::types::{LedgerError, Result};

use super::PointsLedger;

/// Event name recorded for permission purchases
pub const PERMISSION_EVENT: &str = "purchase_permission";

/// Outcome of a successful permission purchase
#[derive(Debug, Clone)]
pub struct PermissionReceipt {
    pub balance: i64,
    pub permission_expires_at: chrono::DateTime<Utc>,
    pub event_id: ObjectId,
}

impl PointsLedger {
    /// Purchase `minutes` of viewing permission; one point buys one minute.
    ///
    /// If the current window has expired (or never existed) the new window
    /// starts now; otherwise it extends the existing expiry. Fails with
    /// `InsufficientBalance` and no side effects when the balance is short.
    pub async fn purchase_permission(
        &self,
        user_id: &str,
        minutes: i64,
    ) -> Result<PermissionReceipt> {
        if minutes <= 0 {
            return Err(LedgerError::Validation(
                "permission minutes must be positive".into(),
            ));
        }
        let cost = minutes;

        let mut session = self.mongo.start_session().await?;
        session.start_transaction().await?;
        let outcome = self
            .purchase_in_txn(&mut session, user_id, minutes, cost)
            .await;
        let receipt = finish_transaction(session, outcome).await?;

        info!(
            user_id = %user_id,
            minutes = minutes,
            cost = cost,
            balance = receipt.balance,
            expires_at = %receipt.permission_expires_at,
            "Purchased viewing permission"
        );
        Ok(receipt)
    }

    async fn purchase_in_txn(
        &self,
        session: &mut ClientSession,
        user_id: &str,
        minutes: i64,
        cost: i64,
    ) -> Result<PermissionReceipt> {
        // Balance guard and expiry arithmetic run server-side in one
        // conditional pipeline update, against the server clock ($$NOW).
        let updated = self
            .users
            .inner()
            .find_one_and_update(
                doc! { "_id": user_id, "points": { "$gte": cost } },
                permission_update(cost, minutes),
            )
            .return_document(ReturnDocument::After)
            .session(&mut *session)
            .await?;

        let user = match updated {
            Some(user) => user,
            None => {
                let available = self
                    .users
                    .inner()
                    .find_one(doc! { "_id": user_id })
                    .session(&mut *session)
                    .await?
                    .map(|user| user.points)
                    .unwrap_or(0);
                return Err(LedgerError::InsufficientBalance {
                    required: cost,
                    available,
                });
            }
        };

        let expires_at = user.permission_expires_at.ok_or_else(|| {
            LedgerError::Database("permission expiry missing after update".into())
        })?;

        let event = PointEventDoc::new(
            user_id,
            PERMISSION_EVENT,
            -cost,
            doc! { "minutes": minutes },
        );
        let inserted = self
            .events
            .inner()
            .insert_one(&event)
            .session(&mut *session)
            .await?;
        let event_id = inserted
            .inserted_id
            .as_object_id()
            .ok_or_else(|| LedgerError::Database("inserted event id missing".into()))?;

        Ok(PermissionReceipt {
            balance: user.points,
            permission_expires_at: expires_at.to_chrono(),
            event_id,
        })
    }
}

/// Pipeline update: decrement the balance and extend the permission window.
///
/// An expired or unset window restarts from $$NOW; an open window extends
/// from its previous expiry (additive, never a max() reset).
pub(crate) fn permission_update(cost: i64, minutes: i64) -> Vec<Document> {
    let extension_ms = minutes * 60_000;
    let epoch = DateTime::from_millis(0);

    vec![doc! {
        "$set": {
            "points": { "$subtract": ["$points", cost] },
            "permission_expires_at": {
                "$cond": {
                    "if": {
                        "$gt": [
                            { "$ifNull": ["$permission_expires_at", epoch] },
                            "$$NOW"
                        ]
                    },
                    "then": { "$add": ["$permission_expires_at", extension_ms] },
                    "else": { "$add": ["$$NOW", extension_ms] },
                }
            },
            "updated_at": "$$NOW",
        }
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_pipeline_shape() {
        let stages = permission_update(30, 30);
        assert_eq!(stages.len(), 1);

        let set = stages[0].get_document("$set").unwrap();
        let subtract = set
            .get_document("points")
            .unwrap()
            .get_array("$subtract")
            .unwrap();
        assert_eq!(subtract[1].as_i64().unwrap(), 30);

        // Extension is expressed in milliseconds
        let cond = set
            .get_document("permission_expires_at")
            .unwrap()
            .get_document("$cond")
            .unwrap();
        let then_add = cond.get_document("then").unwrap().get_array("$add").unwrap();
        assert_eq!(then_add[0].as_str().unwrap(), "$permission_expires_at");
        assert_eq!(then_add[1].as_i64().unwrap(), 30 * 60_000);

        // An expired window restarts from the server clock
        let else_add = cond.get_document("else").unwrap().get_array("$add").unwrap();
        assert_eq!(else_add[0].as_str().unwrap(), "$$NOW");
    }
}
