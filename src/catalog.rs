//! Task and reward catalog
//!
//! Immutable, process-wide configuration: which actions earn points, which
//! rewards cost points, and the fixed per-item values used by the backfill
//! job. Loaded once at startup and passed explicitly into the ledger, never
//! read as ambient global state.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::content::ContentKind;
use crate::types::Result;

/// A gamified, capped user action that earns points once verified
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TaskDefinition {
    pub name: String,
    pub points_awarded: i64,
    /// Maximum completed runs per user; 0 means unbounded
    #[serde(default)]
    pub max_run_count: u32,
}

impl TaskDefinition {
    pub fn is_capped(&self) -> bool {
        self.max_run_count > 0
    }

    /// Whether `completed` runs already exhaust this task's cap
    pub fn cap_reached(&self, completed: u64) -> bool {
        self.is_capped() && completed >= u64::from(self.max_run_count)
    }
}

/// A catalog item purchasable with accumulated points
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RewardDefinition {
    pub name: String,
    pub points_required: i64,
    /// Which unlock set a successful redemption populates
    pub unlocks: ContentKind,
}

/// Fixed per-item values for the one-time retroactive grant
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BackfillRates {
    pub experience_points: i64,
    pub salary_work_time_points: i64,
}

impl Default for BackfillRates {
    fn default() -> Self {
        Self {
            experience_points: 1000,
            salary_work_time_points: 500,
        }
    }
}

/// Immutable catalog of task and reward definitions
#[derive(Debug, Clone)]
pub struct Catalog {
    tasks: HashMap<String, TaskDefinition>,
    rewards: HashMap<String, RewardDefinition>,
    backfill: BackfillRates,
}

/// On-disk catalog layout (JSON)
#[derive(Deserialize, Default)]
struct CatalogFile {
    #[serde(default)]
    tasks: Vec<TaskDefinition>,
    #[serde(default)]
    rewards: Vec<RewardDefinition>,
    #[serde(default)]
    backfill: BackfillRates,
}

impl Catalog {
    pub fn new(
        tasks: Vec<TaskDefinition>,
        rewards: Vec<RewardDefinition>,
        backfill: BackfillRates,
    ) -> Self {
        Self {
            tasks: tasks.into_iter().map(|t| (t.name.clone(), t)).collect(),
            rewards: rewards.into_iter().map(|r| (r.name.clone(), r)).collect(),
            backfill,
        }
    }

    /// Built-in production defaults
    pub fn builtin() -> Self {
        Self::new(
            vec![
                TaskDefinition {
                    name: "submit_salary_work_time".into(),
                    points_awarded: 500,
                    max_run_count: 0,
                },
                TaskDefinition {
                    name: "write_experience".into(),
                    points_awarded: 1000,
                    max_run_count: 0,
                },
                TaskDefinition {
                    name: "share_site".into(),
                    points_awarded: 100,
                    max_run_count: 1,
                },
            ],
            vec![
                RewardDefinition {
                    name: "view_experience".into(),
                    points_required: 1000,
                    unlocks: ContentKind::Experience,
                },
                RewardDefinition {
                    name: "view_salary_work_time".into(),
                    points_required: 500,
                    unlocks: ContentKind::SalaryWorkTime,
                },
            ],
            BackfillRates::default(),
        )
    }

    /// Load catalog definitions from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let file: CatalogFile = serde_json::from_str(&raw)?;
        Ok(Self::new(file.tasks, file.rewards, file.backfill))
    }

    pub fn task(&self, name: &str) -> Option<&TaskDefinition> {
        self.tasks.get(name)
    }

    pub fn reward(&self, name: &str) -> Option<&RewardDefinition> {
        self.rewards.get(name)
    }

    pub fn backfill_rates(&self) -> &BackfillRates {
        &self.backfill
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookups() {
        let catalog = Catalog::builtin();

        let task = catalog.task("share_site").unwrap();
        assert_eq!(task.points_awarded, 100);
        assert_eq!(task.max_run_count, 1);

        let reward = catalog.reward("view_experience").unwrap();
        assert_eq!(reward.points_required, 1000);
        assert_eq!(reward.unlocks, ContentKind::Experience);

        assert!(catalog.task("no_such_task").is_none());
        assert!(catalog.reward("no_such_reward").is_none());
    }

    #[test]
    fn test_cap_semantics() {
        let capped = TaskDefinition {
            name: "share_site".into(),
            points_awarded: 100,
            max_run_count: 1,
        };
        assert!(capped.is_capped());
        assert!(!capped.cap_reached(0));
        assert!(capped.cap_reached(1));
        assert!(capped.cap_reached(2));

        // max_run_count = 0 means unbounded: the cap is never reached
        let unbounded = TaskDefinition {
            name: "write_experience".into(),
            points_awarded: 1000,
            max_run_count: 0,
        };
        assert!(!unbounded.is_capped());
        assert!(!unbounded.cap_reached(0));
        assert!(!unbounded.cap_reached(1_000_000));
    }

    #[test]
    fn test_catalog_json_parsing() {
        let raw = r#"{
            "tasks": [
                {"name": "share_site", "points_awarded": 100, "max_run_count": 1},
                {"name": "write_experience", "points_awarded": 1000}
            ],
            "rewards": [
                {"name": "view_experience", "points_required": 1000, "unlocks": "experience"}
            ],
            "backfill": {"experience_points": 1000, "salary_work_time_points": 500}
        }"#;

        let file: CatalogFile = serde_json::from_str(raw).unwrap();
        let catalog = Catalog::new(file.tasks, file.rewards, file.backfill);

        // max_run_count defaults to 0 (unbounded) when omitted
        assert_eq!(catalog.task("write_experience").unwrap().max_run_count, 0);
        assert_eq!(
            catalog.reward("view_experience").unwrap().unlocks,
            ContentKind::Experience
        );
        assert_eq!(catalog.backfill_rates().salary_work_time_points, 500);
    }

    #[test]
    fn test_backfill_rate_defaults() {
        let rates = BackfillRates::default();
        assert_eq!(rates.experience_points, 1000);
        assert_eq!(rates.salary_work_time_points, 500);
    }
}
