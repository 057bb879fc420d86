//! The history store: append-only execution records and their typed
//! output payloads.
//!
//! Every agent invocation creates exactly one record in `running` state;
//! the same record is mutated exactly once at completion (to `completed`
//! plus an output, or `failed` plus an error). Closed records are never
//! rewritten, which is what lets the phase engine treat the log as the
//! sole source of truth.
//!
//! Role outputs are a discriminated union, not free-form JSON: a payload
//! whose variant does not match its role is rejected at the persistence
//! boundary with a `StoreError::OutputMismatch` instead of propagating
//! untyped data deeper into the pipeline.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::engine::Phase;
use crate::errors::StoreError;
use crate::model::{Failure, Task, TaskStatus};
use crate::orchestrator::RoleId;

pub mod db;

pub use db::{DbHandle, HistoryDb};

/// Status of one agent invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid execution status: {}", s)),
        }
    }
}

/// Scope at which the tester role ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestScope {
    Story,
    Epic,
    Integration,
}

impl TestScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Story => "story",
            Self::Epic => "epic",
            Self::Integration => "integration",
        }
    }
}

impl std::fmt::Display for TestScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a test or review pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    pub fn passed(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// Rollup counters carried on every scrum output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
}

impl TaskSummary {
    pub fn from_tasks(tasks: &[Task]) -> Self {
        Self {
            total_tasks: tasks.len(),
            completed_tasks: tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Completed)
                .count(),
            failed_tasks: tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Failed)
                .count(),
        }
    }
}

/// Output of a scrum-master invocation: the derived phase, the full
/// project-to-date task set, and (when the engine wants a test run) a
/// request marker telling the tester which scope to execute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScrumOutput {
    pub current_phase: Phase,
    pub current_epic: Option<u32>,
    pub current_story: Option<u32>,
    pub tasks: Vec<Task>,
    pub summary: TaskSummary,
    #[serde(default)]
    pub test_request: Option<TestScope>,
}

/// Output of a tester invocation at some scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TesterOutput {
    pub test_type: TestScope,
    pub test_result: Verdict,
    pub overall_score: f32,
    pub failures: Vec<Failure>,
    pub successes: Vec<String>,
    /// Epic the run targeted; 0 for integration scope.
    pub epic_ordinal: u32,
    /// Story the run targeted; 0 above story scope.
    pub story_ordinal: u32,
}

/// Output of a reviewer invocation against one task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewOutput {
    pub result: Verdict,
    pub task_id: String,
    pub failures: Vec<Failure>,
    pub epic_ordinal: u32,
    pub story_ordinal: u32,
}

/// Output of a developer invocation against one task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerOutput {
    pub task_id: String,
    pub notes: String,
}

/// Discriminated union of per-role output payloads.
///
/// Roles outside the development loop (analysis, packaging, deployment,
/// notification, escalation) return `Opaque` payloads; the core treats
/// them as "completed/failed with an output object" and nothing more.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum RoleOutput {
    Scrum(ScrumOutput),
    Test(TesterOutput),
    Review(ReviewOutput),
    Worker(WorkerOutput),
    Opaque(serde_json::Value),
}

impl RoleOutput {
    /// Validate that this payload variant is legal for `role`. Called at
    /// the persistence boundary on both write and read.
    pub fn validate_for(&self, role: RoleId) -> Result<(), StoreError> {
        let ok = match self {
            Self::Scrum(_) => role == RoleId::ScrumMaster,
            Self::Test(_) => role == RoleId::Tester,
            Self::Review(_) => role == RoleId::Reviewer,
            Self::Worker(_) => role == RoleId::Developer,
            Self::Opaque(_) => !matches!(
                role,
                RoleId::ScrumMaster | RoleId::Tester | RoleId::Reviewer | RoleId::Developer
            ),
        };
        if ok {
            Ok(())
        } else {
            Err(StoreError::OutputMismatch {
                role,
                message: format!("unexpected payload variant {}", self.kind()),
            })
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Scrum(_) => "scrum",
            Self::Test(_) => "test",
            Self::Review(_) => "review",
            Self::Worker(_) => "worker",
            Self::Opaque(_) => "opaque",
        }
    }

    pub fn as_scrum(&self) -> Option<&ScrumOutput> {
        match self {
            Self::Scrum(out) => Some(out),
            _ => None,
        }
    }

    pub fn as_test(&self) -> Option<&TesterOutput> {
        match self {
            Self::Test(out) => Some(out),
            _ => None,
        }
    }

    pub fn as_review(&self) -> Option<&ReviewOutput> {
        match self {
            Self::Review(out) => Some(out),
            _ => None,
        }
    }
}

/// One agent invocation, as persisted. Append-only: once `status` leaves
/// `running` the record is closed for good.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: i64,
    pub project_id: i64,
    pub role: RoleId,
    pub role_name: String,
    pub status: ExecutionStatus,
    pub input: Option<serde_json::Value>,
    pub output: Option<RoleOutput>,
    pub error: Option<String>,
    pub started_at: String,
    pub completed_at: Option<String>,
}

impl ExecutionRecord {
    /// True for a reviewer record that rejected its task.
    pub fn is_review_failure(&self) -> bool {
        self.role == RoleId::Reviewer
            && match (&self.status, &self.output) {
                (ExecutionStatus::Failed, _) => true,
                (_, Some(RoleOutput::Review(r))) => !r.result.passed(),
                _ => false,
            }
    }

    /// The tester output, if this record is a closed tester run.
    pub fn tester_output(&self) -> Option<&TesterOutput> {
        if self.role == RoleId::Tester && self.status != ExecutionStatus::Running {
            self.output.as_ref().and_then(|o| o.as_test())
        } else {
            None
        }
    }
}

/// A registered project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub requirements: String,
    /// Deployment target; its absence makes the packaging/deployment tail
    /// optional-on-precondition.
    pub target_repo: Option<String>,
    pub created_at: String,
}

/// Per-project liveness and intent state, persisted alongside the history
/// so that pause and the active-loop flag survive process restarts.
/// Activation goes through a compare-and-set on `active_since`, closing
/// the check-then-act race between two concurrent restart requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineControl {
    pub project_id: i64,
    pub paused: bool,
    pub active_since: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TaskPriority, TaskRole};

    fn sample_task(status: TaskStatus) -> Task {
        Task {
            id: "task-1-1-1".into(),
            title: "Wire login form".into(),
            description: String::new(),
            priority: TaskPriority::Medium,
            role: TaskRole::Developer,
            status,
            epic_ordinal: 1,
            story_ordinal: 1,
            sequence: 1,
        }
    }

    #[test]
    fn test_execution_status_roundtrip() {
        for s in &["running", "completed", "failed"] {
            let parsed: ExecutionStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("queued".parse::<ExecutionStatus>().is_err());
    }

    #[test]
    fn test_summary_counts_tasks_by_status() {
        let tasks = vec![
            sample_task(TaskStatus::Completed),
            sample_task(TaskStatus::Failed),
            sample_task(TaskStatus::Pending),
        ];
        let summary = TaskSummary::from_tasks(&tasks);
        assert_eq!(summary.total_tasks, 3);
        assert_eq!(summary.completed_tasks, 1);
        assert_eq!(summary.failed_tasks, 1);
    }

    #[test]
    fn test_scrum_output_only_valid_for_scrum_master() {
        let out = RoleOutput::Scrum(ScrumOutput {
            current_phase: Phase::TaskCreation,
            current_epic: Some(1),
            current_story: Some(1),
            tasks: vec![],
            summary: TaskSummary::default(),
            test_request: None,
        });
        assert!(out.validate_for(RoleId::ScrumMaster).is_ok());
        let err = out.validate_for(RoleId::Developer).unwrap_err();
        assert!(matches!(err, StoreError::OutputMismatch { .. }));
    }

    #[test]
    fn test_opaque_output_rejected_for_loop_roles() {
        let out = RoleOutput::Opaque(serde_json::json!({"report": "done"}));
        assert!(out.validate_for(RoleId::Notifier).is_ok());
        assert!(out.validate_for(RoleId::ReleasePackager).is_ok());
        assert!(out.validate_for(RoleId::Tester).is_err());
    }

    #[test]
    fn test_role_output_serde_is_tagged() {
        let out = RoleOutput::Worker(WorkerOutput {
            task_id: "task-1-1-1".into(),
            notes: "implemented".into(),
        });
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["kind"], "worker");
        assert_eq!(json["data"]["task_id"], "task-1-1-1");
        let back: RoleOutput = serde_json::from_value(json).unwrap();
        assert_eq!(back, out);
    }

    #[test]
    fn test_review_failure_detection() {
        let mut record = ExecutionRecord {
            id: 1,
            project_id: 1,
            role: RoleId::Reviewer,
            role_name: RoleId::Reviewer.display_name().into(),
            status: ExecutionStatus::Completed,
            input: None,
            output: Some(RoleOutput::Review(ReviewOutput {
                result: Verdict::Fail,
                task_id: "task-1-1-1".into(),
                failures: vec![],
                epic_ordinal: 1,
                story_ordinal: 1,
            })),
            error: None,
            started_at: "2026-01-01T00:00:00Z".into(),
            completed_at: Some("2026-01-01T00:01:00Z".into()),
        };
        assert!(record.is_review_failure());

        record.output = Some(RoleOutput::Review(ReviewOutput {
            result: Verdict::Pass,
            task_id: "task-1-1-1".into(),
            failures: vec![],
            epic_ordinal: 1,
            story_ordinal: 1,
        }));
        assert!(!record.is_review_failure());

        record.status = ExecutionStatus::Failed;
        assert!(record.is_review_failure(), "hard failure counts as rejection");
    }
}
