//! Work-item entities: epics, stories, tasks, and structured failures.
//!
//! Epics and stories are created once by the decomposition stage and are
//! immutable afterwards. Tasks are the unit of executable work; their ids
//! are derived deterministically from (epic ordinal, story ordinal) so that
//! regenerating the same story produces the same ids, which is what makes
//! merge-by-id safe across crash recovery.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod accumulate;

pub use accumulate::{accumulate, fix_count, is_story_complete, story_key, tasks_for_story};

/// Top-level scope unit. Ordinals are 1-based and assigned at
/// decomposition time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Epic {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub ordinal: u32,
}

/// A user-facing increment of functionality within an epic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Story {
    pub id: i64,
    pub epic_id: i64,
    pub title: String,
    pub narrative: String,
    pub points: u32,
    pub ordinal: u32,
}

/// Priority of a task. Corrective tasks are always forced to `High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    High,
    Medium,
    Low,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(format!("Invalid task priority: {}", s)),
        }
    }
}

/// Role that owns a task during the development loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRole {
    Developer,
    Reviewer,
    Tester,
}

impl TaskRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Developer => "developer",
            Self::Reviewer => "reviewer",
            Self::Tester => "tester",
        }
    }
}

impl std::fmt::Display for TaskRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "developer" => Ok(Self::Developer),
            "reviewer" => Ok(Self::Reviewer),
            "tester" => Ok(Self::Tester),
            _ => Err(format!("Invalid task role: {}", s)),
        }
    }
}

/// Lifecycle of a task: `pending -> developing -> reviewing -> testing ->
/// completed`, or `failed` on any stage rejection. A `failed` task is only
/// ever reset to `pending` by an explicit resume action, never
/// automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Developing,
    Reviewing,
    Testing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Developing => "developing",
            Self::Reviewing => "reviewing",
            Self::Testing => "testing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Check if the task finished successfully.
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "developing" => Ok(Self::Developing),
            "reviewing" => Ok(Self::Reviewing),
            "testing" => Ok(Self::Testing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

/// Smallest schedulable unit of implementation work.
///
/// `id` is stable across regenerations of the same story:
/// `task-{epic}-{story}-{n}` for decomposed work, with a `-fix-{n}` suffix
/// for corrective tasks. Epic- and project-scope corrective tasks use the
/// `task-epic-{e}-fix-{k}` and `task-integration-fix-{k}` namespaces, with
/// `epic_ordinal` 0 where no single epic applies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub priority: TaskPriority,
    pub role: TaskRole,
    #[serde(default)]
    pub status: TaskStatus,
    pub epic_ordinal: u32,
    pub story_ordinal: u32,
    /// Position within the story's task list. Corrective tasks get a high
    /// sequence so they sort after the original decomposition.
    pub sequence: u32,
}

impl Task {
    /// Deterministic id for the `n`-th task (1-based) of a story.
    pub fn derive_id(epic_ordinal: u32, story_ordinal: u32, n: u32) -> String {
        format!("task-{}-{}-{}", epic_ordinal, story_ordinal, n)
    }

    /// Deterministic id for the `n`-th corrective task of a story.
    pub fn derive_fix_id(epic_ordinal: u32, story_ordinal: u32, n: u32) -> String {
        format!("task-{}-{}-fix-{}", epic_ordinal, story_ordinal, n)
    }

    /// Deterministic id for the `k`-th epic-scope corrective task.
    pub fn derive_epic_fix_id(epic_ordinal: u32, k: u32) -> String {
        format!("task-epic-{}-fix-{}", epic_ordinal, k)
    }

    /// Deterministic id for the `k`-th project-scope corrective task.
    pub fn derive_integration_fix_id(k: u32) -> String {
        format!("task-integration-fix-{}", k)
    }
}

/// Severity of a reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(format!("Invalid severity: {}", s)),
        }
    }
}

/// Category of a reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureCategory {
    Ui,
    Api,
    Database,
    Integration,
    EdgeCase,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ui => "ui",
            Self::Api => "api",
            Self::Database => "database",
            Self::Integration => "integration",
            Self::EdgeCase => "edge-case",
        }
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ui" => Ok(Self::Ui),
            "api" => Ok(Self::Api),
            "database" => Ok(Self::Database),
            "integration" => Ok(Self::Integration),
            "edge-case" => Ok(Self::EdgeCase),
            _ => Err(format!("Invalid failure category: {}", s)),
        }
    }
}

/// A structured defect report produced by the reviewer or tester roles.
///
/// Failures never mutate tasks directly; they are inputs to generating new
/// corrective tasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Failure {
    pub severity: Severity,
    pub category: FailureCategory,
    pub scenario: String,
    pub expected_behavior: String,
    pub actual_behavior: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub evidence: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_roundtrip() {
        for s in &[
            "pending",
            "developing",
            "reviewing",
            "testing",
            "completed",
            "failed",
        ] {
            let parsed: TaskStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("invalid".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_task_priority_roundtrip() {
        for s in &["high", "medium", "low"] {
            let parsed: TaskPriority = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("critical".parse::<TaskPriority>().is_err());
    }

    #[test]
    fn test_task_role_roundtrip() {
        for s in &["developer", "reviewer", "tester"] {
            let parsed: TaskRole = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("planner".parse::<TaskRole>().is_err());
    }

    #[test]
    fn test_failure_category_roundtrip() {
        for s in &["ui", "api", "database", "integration", "edge-case"] {
            let parsed: FailureCategory = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("edge_case".parse::<FailureCategory>().is_err());
    }

    #[test]
    fn test_serde_uses_wire_casing() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Developing).unwrap(),
            "\"developing\""
        );
        assert_eq!(
            serde_json::to_string(&FailureCategory::EdgeCase).unwrap(),
            "\"edge-case\""
        );
        assert_eq!(
            serde_json::from_str::<FailureCategory>("\"edge-case\"").unwrap(),
            FailureCategory::EdgeCase
        );
        assert_eq!(serde_json::to_string(&Severity::High).unwrap(), "\"high\"");
    }

    #[test]
    fn test_task_id_derivation_is_deterministic() {
        assert_eq!(Task::derive_id(2, 3, 1), "task-2-3-1");
        assert_eq!(Task::derive_id(2, 3, 1), Task::derive_id(2, 3, 1));
        assert_eq!(Task::derive_fix_id(2, 3, 4), "task-2-3-fix-4");
        assert_eq!(Task::derive_epic_fix_id(5, 2), "task-epic-5-fix-2");
        assert_eq!(Task::derive_integration_fix_id(7), "task-integration-fix-7");
    }

    #[test]
    fn test_task_status_predicates() {
        assert!(TaskStatus::Completed.is_complete());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Failed.is_complete());
        assert!(!TaskStatus::Reviewing.is_terminal());
        assert_eq!(TaskStatus::default(), TaskStatus::Pending);
    }
}
