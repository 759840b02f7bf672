//! User balance document schema
//!
//! One document per user: the live point balance, the unlock sets, and the
//! permission window expiry. Mutated only in lockstep with point event
//! inserts, inside the same transaction.

use bson::{DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::content::ContentKind;
use crate::db::mongo::IntoIndexes;

/// Collection name for user balances
pub const USER_COLLECTION: &str = "users";

/// One unlocked content item
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UnlockEntry {
    pub content_id: String,
    pub unlocked_at: DateTime,
}

/// User balance document stored in MongoDB
///
/// Invariant: `points` always equals the sum of this user's completed
/// point event deltas, and never goes negative.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UserDoc {
    /// Externally authenticated user id
    #[serde(rename = "_id")]
    pub user_id: String,

    /// Current point balance
    #[serde(default)]
    pub points: i64,

    /// Experiences this user has paid to view, unique per content id
    #[serde(default)]
    pub unlocked_experiences: Vec<UnlockEntry>,

    /// Salary/work-time records this user has paid to view
    #[serde(default)]
    pub unlocked_salary_work_times: Vec<UnlockEntry>,

    /// End of the purchased viewing-permission window, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_expires_at: Option<DateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,
}

impl UserDoc {
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = DateTime::now();
        Self {
            user_id: user_id.into(),
            points: 0,
            unlocked_experiences: Vec::new(),
            unlocked_salary_work_times: Vec::new(),
            permission_expires_at: None,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    /// The unlock set for one content kind
    pub fn unlocks(&self, kind: ContentKind) -> &[UnlockEntry] {
        match kind {
            ContentKind::Experience => &self.unlocked_experiences,
            ContentKind::SalaryWorkTime => &self.unlocked_salary_work_times,
        }
    }

    pub fn has_unlocked(&self, kind: ContentKind, content_id: &str) -> bool {
        self.unlocks(kind)
            .iter()
            .any(|entry| entry.content_id == content_id)
    }

    /// Whether the permission window is active at `now`
    pub fn permission_active(&self, now: DateTime) -> bool {
        self.permission_expires_at
            .map(|expires| expires > now)
            .unwrap_or(false)
    }
}

impl IntoIndexes for UserDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        // Keyed by _id only; unlock uniqueness is enforced by the
        // conditional update filter on the single user document.
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_user_starts_empty() {
        let user = UserDoc::new("user-1");
        assert_eq!(user.points, 0);
        assert!(user.unlocked_experiences.is_empty());
        assert!(user.unlocked_salary_work_times.is_empty());
        assert!(user.permission_expires_at.is_none());
    }

    #[test]
    fn test_has_unlocked_checks_the_right_set() {
        let mut user = UserDoc::new("user-1");
        user.unlocked_experiences.push(UnlockEntry {
            content_id: "exp-1".into(),
            unlocked_at: DateTime::now(),
        });

        assert!(user.has_unlocked(ContentKind::Experience, "exp-1"));
        assert!(!user.has_unlocked(ContentKind::SalaryWorkTime, "exp-1"));
        assert!(!user.has_unlocked(ContentKind::Experience, "exp-2"));
    }

    #[test]
    fn test_permission_active() {
        let mut user = UserDoc::new("user-1");
        let now = DateTime::now();
        assert!(!user.permission_active(now));

        user.permission_expires_at = Some(DateTime::from_millis(now.timestamp_millis() + 60_000));
        assert!(user.permission_active(now));

        user.permission_expires_at = Some(DateTime::from_millis(now.timestamp_millis() - 1));
        assert!(!user.permission_active(now));
    }

    #[test]
    fn test_user_doc_round_trips_through_bson() {
        let user = UserDoc::new("user-1");
        let doc = bson::to_document(&user).unwrap();
        // The user id serializes as the document key
        assert_eq!(doc.get_str("_id").unwrap(), "user-1");

        let back: UserDoc = bson::from_document(doc).unwrap();
        assert_eq!(back.user_id, "user-1");
        assert_eq!(back.points, 0);
    }
}
