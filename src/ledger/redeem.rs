//! Reward redemption
//!
//! Spending points to unlock one content item, exactly once per
//! (user, content). The balance check, the decrement, and the unlock grant
//! land in a single conditional write on the user document, so two
//! redemptions racing on the same balance serialize at the storage layer.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::ReturnDocument;
use mongodb::ClientSession;
use tracing::info;

use crate::catalog::RewardDefinition;
use crate::content::ContentRef;
use crate::db::mongo::finish_transaction;
use crate::db::schemas::{PointEventDoc, UserDoc};
use crate::types::{LedgerError, Result};

use super::PointsLedger;

/// Outcome of a successful redemption
#[derive(Debug, Clone)]
pub struct RedeemReceipt {
    pub balance: i64,
    pub unlocked: bool,
    pub event_id: ObjectId,
}

impl PointsLedger {
    /// Redeem a reward, unlocking one content item for the user.
    ///
    /// Fails with `InsufficientBalance`, `AlreadyUnlocked`, or `NotFound`
    /// (missing content); every failure leaves state unchanged.
    pub async fn redeem(
        &self,
        user_id: &str,
        reward_name: &str,
        content_id: &str,
    ) -> Result<RedeemReceipt> {
        let reward = self
            .catalog
            .reward(reward_name)
            .ok_or_else(|| LedgerError::Validation(format!("unknown reward '{}'", reward_name)))?
            .clone();

        self.verify_content(None, &ContentRef::new(reward.unlocks, content_id))
            .await?;

        let mut session = self.mongo.start_session().await?;
        session.start_transaction().await?;
        let outcome = self
            .redeem_in_txn(&mut session, user_id, &reward, content_id)
            .await;
        let receipt = finish_transaction(session, outcome).await?;

        info!(
            user_id = %user_id,
            reward = %reward.name,
            content_id = %content_id,
            cost = reward.points_required,
            balance = receipt.balance,
            "Redeemed reward"
        );
        Ok(receipt)
    }

    async fn redeem_in_txn(
        &self,
        session: &mut ClientSession,
        user_id: &str,
        reward: &RewardDefinition,
        content_id: &str,
    ) -> Result<RedeemReceipt> {
        // One conditional write: balance >= price AND content not yet
        // unlocked. MongoDB serializes writes to a single document, which
        // closes both the double-spend and the double-unlock races.
        let updated = self
            .users
            .inner()
            .find_one_and_update(
                redeem_filter(user_id, reward, content_id),
                redeem_update(reward, content_id),
            )
            .return_document(ReturnDocument::After)
            .session(&mut *session)
            .await?;

        let user = match updated {
            Some(user) => user,
            None => {
                let current = self
                    .users
                    .inner()
                    .find_one(doc! { "_id": user_id })
                    .session(&mut *session)
                    .await?;
                return Err(classify_redeem_failure(current.as_ref(), reward, content_id));
            }
        };

        let snapshot = doc! {
            "content_id": content_id,
            "content_type": reward.unlocks.as_str(),
        };
        let event = PointEventDoc::new(user_id, &reward.name, -reward.points_required, snapshot);
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

        Ok(RedeemReceipt {
            balance: user.points,
            unlocked: true,
            event_id,
        })
    }
}

/// Conditional filter: the user has enough points and has not already
/// unlocked this content item.
pub(crate) fn redeem_filter(
    user_id: &str,
    reward: &RewardDefinition,
    content_id: &str,
) -> Document {
    let mut filter = doc! {
        "_id": user_id,
        "points": { "$gte": reward.points_required },
    };
    filter.insert(
        format!("{}.content_id", reward.unlocks.unlock_field()),
        doc! { "$ne": content_id },
    );
    filter
}

/// Decrement the balance and append the unlock entry in one update
pub(crate) fn redeem_update(reward: &RewardDefinition, content_id: &str) -> Document {
    let now = DateTime::now();
    let mut push = Document::new();
    push.insert(
        reward.unlocks.unlock_field(),
        doc! { "content_id": content_id, "unlocked_at": now },
    );

    doc! {
        "$inc": { "points": -reward.points_required },
        "$push": push,
        "$set": { "updated_at": now },
    }
}

/// Decide why the conditional redeem write matched nothing
pub(crate) fn classify_redeem_failure(
    user: Option<&UserDoc>,
    reward: &RewardDefinition,
    content_id: &str,
) -> LedgerError {
    match user {
        Some(user) if user.has_unlocked(reward.unlocks, content_id) => {
            LedgerError::AlreadyUnlocked {
                content_id: content_id.to_string(),
            }
        }
        Some(user) => LedgerError::InsufficientBalance {
            required: reward.points_required,
            available: user.points,
        },
        // No user document means no ledger activity: balance is 0
        None => LedgerError::InsufficientBalance {
            required: reward.points_required,
            available: 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentKind;
    use crate::db::schemas::UnlockEntry;

    fn view_experience() -> RewardDefinition {
        RewardDefinition {
            name: "view_experience".into(),
            points_required: 1000,
            unlocks: ContentKind::Experience,
        }
    }

    #[test]
    fn test_redeem_filter_guards_balance_and_uniqueness() {
        let filter = redeem_filter("user-1", &view_experience(), "exp-1");

        assert_eq!(filter.get_str("_id").unwrap(), "user-1");
        assert_eq!(
            filter.get_document("points").unwrap().get_i64("$gte").unwrap(),
            1000
        );
        let uniq = filter
            .get_document("unlocked_experiences.content_id")
            .unwrap();
        assert_eq!(uniq.get_str("$ne").unwrap(), "exp-1");
    }

    #[test]
    fn test_redeem_update_decrements_and_pushes() {
        let update = redeem_update(&view_experience(), "exp-1");

        let inc = update.get_document("$inc").unwrap();
        assert_eq!(inc.get_i64("points").unwrap(), -1000);

        let push = update.get_document("$push").unwrap();
        let entry = push.get_document("unlocked_experiences").unwrap();
        assert_eq!(entry.get_str("content_id").unwrap(), "exp-1");
        assert!(entry.get_datetime("unlocked_at").is_ok());
    }

    #[test]
    fn test_failure_classification() {
        let reward = view_experience();

        // No user document: treated as a zero balance
        let err = classify_redeem_failure(None, &reward, "exp-1");
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance {
                required: 1000,
                available: 0
            }
        ));

        // Enough history but already unlocked
        let mut user = UserDoc::new("user-1");
        user.points = 5000;
        user.unlocked_experiences.push(UnlockEntry {
            content_id: "exp-1".into(),
            unlocked_at: DateTime::now(),
        });
        let err = classify_redeem_failure(Some(&user), &reward, "exp-1");
        assert!(matches!(err, LedgerError::AlreadyUnlocked { .. }));

        // Not unlocked, just short on points
        let mut poor = UserDoc::new("user-2");
        poor.points = 40;
        let err = classify_redeem_failure(Some(&poor), &reward, "exp-1");
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance {
                required: 1000,
                available: 40
            }
        ));
    }
}
