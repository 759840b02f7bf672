//! Content collaborator contracts
//!
//! The ledger never reads submitted salary or experience records itself;
//! callers hand it a content reference and it consults an existence lookup
//! before committing anything.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::types::Result;

/// The two kinds of gated content a user can unlock
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Experience,
    SalaryWorkTime,
}

impl ContentKind {
    /// Name of the unlock set on the user document
    pub fn unlock_field(&self) -> &'static str {
        match self {
            Self::Experience => "unlocked_experiences",
            Self::SalaryWorkTime => "unlocked_salary_work_times",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Experience => "experience",
            Self::SalaryWorkTime => "salary_work_time",
        }
    }
}

/// Reference to one content item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRef {
    pub kind: ContentKind,
    pub content_id: String,
}

impl ContentRef {
    pub fn new(kind: ContentKind, content_id: impl Into<String>) -> Self {
        Self {
            kind,
            content_id: content_id.into(),
        }
    }
}

/// Existence lookup consulted before any award or redemption that
/// references content.
///
/// Implemented by the document-store query layer in production; the ledger
/// only depends on this contract.
#[async_trait]
pub trait ContentLookup: Send + Sync {
    /// Returns the owner's user id when the content exists, `None` otherwise.
    async fn exists(&self, kind: ContentKind, content_id: &str) -> Result<Option<String>>;
}

/// In-memory lookup for tests and local development
#[derive(Debug, Default)]
pub struct InMemoryContentLookup {
    entries: DashMap<(ContentKind, String), String>,
}

impl InMemoryContentLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a content item with its owner
    pub fn insert(&self, kind: ContentKind, content_id: &str, owner_user_id: &str) {
        self.entries
            .insert((kind, content_id.to_string()), owner_user_id.to_string());
    }
}

#[async_trait]
impl ContentLookup for InMemoryContentLookup {
    async fn exists(&self, kind: ContentKind, content_id: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .get(&(kind, content_id.to_string()))
            .map(|owner| owner.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlock_fields_match_user_schema() {
        assert_eq!(ContentKind::Experience.unlock_field(), "unlocked_experiences");
        assert_eq!(
            ContentKind::SalaryWorkTime.unlock_field(),
            "unlocked_salary_work_times"
        );
    }

    #[test]
    fn test_in_memory_lookup() {
        let lookup = InMemoryContentLookup::new();
        lookup.insert(ContentKind::Experience, "exp-1", "user-a");

        let found = tokio_test::block_on(lookup.exists(ContentKind::Experience, "exp-1")).unwrap();
        assert_eq!(found.as_deref(), Some("user-a"));

        // Same id under a different kind is a different item
        let missing =
            tokio_test::block_on(lookup.exists(ContentKind::SalaryWorkTime, "exp-1")).unwrap();
        assert!(missing.is_none());
    }
}
