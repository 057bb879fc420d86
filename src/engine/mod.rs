//! The phase engine: derives the pipeline's current phase from the
//! execution history and produces the next unit of work.
//!
//! The engine holds no state of its own. Every invocation replays the
//! append-only history against the epic/story catalog and recomputes both
//! the merged task set and the current phase, which is what makes crash
//! recovery trivial: there is nothing to restore, only to recompute.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::EngineError;
use crate::model::{self, Epic, Story, Task, TaskStatus};
use crate::store::{ExecutionRecord, ExecutionStatus, RoleOutput, TestScope, Verdict};
use crate::orchestrator::RoleId;

pub mod scrum;

pub use scrum::run_scrum_step;

/// Macro-state of the development loop for one project.
///
/// Never stored: always recomputed from history by [`determine_phase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    TaskCreation,
    ReviewAnalysis,
    TestAnalysis,
    EpicTesting,
    IntegrationTesting,
    Completed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskCreation => "task-creation",
            Self::ReviewAnalysis => "review-analysis",
            Self::TestAnalysis => "test-analysis",
            Self::EpicTesting => "epic-testing",
            Self::IntegrationTesting => "integration-testing",
            Self::Completed => "completed",
        }
    }

    /// The terminal phase is idempotent and safe to re-enter.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task-creation" => Ok(Self::TaskCreation),
            "review-analysis" => Ok(Self::ReviewAnalysis),
            "test-analysis" => Ok(Self::TestAnalysis),
            "epic-testing" => Ok(Self::EpicTesting),
            "integration-testing" => Ok(Self::IntegrationTesting),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Invalid phase: {}", s)),
        }
    }
}

/// The immutable epic/story catalog produced by decomposition, ordered by
/// ordinal.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    epics: Vec<(Epic, Vec<Story>)>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_epic(&mut self, epic: Epic, stories: Vec<Story>) {
        self.epics.push((epic, stories));
    }

    pub fn is_empty(&self) -> bool {
        self.epics.is_empty()
    }

    pub fn epics(&self) -> Vec<&Epic> {
        self.epics.iter().map(|(e, _)| e).collect()
    }

    pub fn stories_for(&self, epic_ordinal: u32) -> Option<&[Story]> {
        self.epics
            .iter()
            .find(|(e, _)| e.ordinal == epic_ordinal)
            .map(|(_, stories)| stories.as_slice())
    }

    pub fn epic(&self, ordinal: u32) -> Option<&Epic> {
        self.epics.iter().map(|(e, _)| e).find(|e| e.ordinal == ordinal)
    }

    pub fn story(&self, epic_ordinal: u32, story_ordinal: u32) -> Option<&Story> {
        self.stories_for(epic_ordinal)?
            .iter()
            .find(|s| s.ordinal == story_ordinal)
    }

    pub fn last_epic_ordinal(&self) -> Option<u32> {
        self.epics.iter().map(|(e, _)| e.ordinal).max()
    }

    pub fn is_last_epic(&self, ordinal: u32) -> bool {
        self.last_epic_ordinal() == Some(ordinal)
    }

    /// Validate that a task's (epic, story) location resolves against this
    /// catalog. Ordinal 0 marks "not applicable to a single epic/story"
    /// and is always legal.
    fn check_location(&self, epic_ordinal: u32, story_ordinal: u32) -> Result<(), EngineError> {
        if epic_ordinal == 0 {
            return Ok(());
        }
        if self.epic(epic_ordinal).is_none()
            || (story_ordinal > 0 && self.story(epic_ordinal, story_ordinal).is_none())
        {
            return Err(EngineError::InconsistentCatalog {
                epic_ordinal,
                story_ordinal,
            });
        }
        Ok(())
    }

    /// First (epic, story) pair, in catalog order, whose accumulated task
    /// set is not complete. `None` means every story is done.
    pub fn first_incomplete_story(&self, tasks: &[Task]) -> Option<(u32, u32)> {
        for (epic, stories) in &self.epics {
            for story in stories {
                let story_tasks = model::tasks_for_story(tasks, epic.ordinal, story.ordinal);
                if !model::is_story_complete(&story_tasks) {
                    return Some((epic.ordinal, story.ordinal));
                }
            }
        }
        None
    }

    /// True iff every story of the epic has a non-empty, fully completed
    /// task set.
    pub fn is_epic_complete(&self, epic_ordinal: u32, tasks: &[Task]) -> bool {
        match self.stories_for(epic_ordinal) {
            Some(stories) if !stories.is_empty() => stories.iter().all(|s| {
                model::is_story_complete(&model::tasks_for_story(tasks, epic_ordinal, s.ordinal))
            }),
            _ => false,
        }
    }
}

/// Ephemeral view derived from the history: the current phase and the
/// replayed task set.
#[derive(Debug, Clone)]
pub struct DerivedState {
    pub phase: Phase,
    pub tasks: Vec<Task>,
}

/// Pure function from event history to phase. See [`derive_state`] for the
/// full view including the replayed task set.
pub fn determine_phase(
    history: &[ExecutionRecord],
    catalog: &Catalog,
) -> Result<Phase, EngineError> {
    Ok(derive_state(history, catalog)?.phase)
}

/// Replay the closed development-loop records oldest-first, producing the
/// merged task set and classifying the current phase from the latest
/// significant record.
pub fn derive_state(
    history: &[ExecutionRecord],
    catalog: &Catalog,
) -> Result<DerivedState, EngineError> {
    let closed: Vec<&ExecutionRecord> = history
        .iter()
        .filter(|r| r.status != ExecutionStatus::Running)
        .collect();

    let tasks = replay_tasks(&closed, catalog)?;
    let phase = classify(&closed, catalog, &tasks)?;
    Ok(DerivedState { phase, tasks })
}

/// Fold the history into the current task set.
///
/// Scrum records contribute whole task sets (merged by id, completion
/// sticky). Worker records advance individual task statuses along the
/// lifecycle; each transition is guarded by the expected prior status so
/// replaying old records over newer state is a no-op.
fn replay_tasks(
    closed: &[&ExecutionRecord],
    catalog: &Catalog,
) -> Result<Vec<Task>, EngineError> {
    let mut tasks: Vec<Task> = Vec::new();

    for record in closed {
        match (&record.role, &record.output, &record.status) {
            (RoleId::ScrumMaster, Some(RoleOutput::Scrum(out)), ExecutionStatus::Completed) => {
                for task in &out.tasks {
                    catalog.check_location(task.epic_ordinal, task.story_ordinal)?;
                }
                tasks = model::accumulate([tasks.as_slice(), out.tasks.as_slice()]);
            }
            (RoleId::Developer, Some(RoleOutput::Worker(out)), ExecutionStatus::Completed) => {
                advance(&mut tasks, &out.task_id, TaskStatus::Reviewing, |s| {
                    matches!(s, TaskStatus::Pending | TaskStatus::Developing)
                });
            }
            (RoleId::Developer, _, ExecutionStatus::Failed) => {
                if let Some(task_id) = record
                    .input
                    .as_ref()
                    .and_then(|i| i.get("task_id"))
                    .and_then(|v| v.as_str())
                {
                    advance(&mut tasks, task_id, TaskStatus::Failed, |s| {
                        matches!(s, TaskStatus::Pending | TaskStatus::Developing)
                    });
                }
            }
            (RoleId::Reviewer, Some(RoleOutput::Review(out)), ExecutionStatus::Completed) => {
                if out.result.passed() {
                    advance(&mut tasks, &out.task_id, TaskStatus::Testing, |s| {
                        matches!(s, TaskStatus::Reviewing)
                    });
                }
                // A rejection leaves the task untouched; corrective tasks
                // carry the remediation.
            }
            (RoleId::Tester, Some(RoleOutput::Test(out)), ExecutionStatus::Completed) => {
                if out.test_result.passed() {
                    complete_scope(&mut tasks, out.test_type, out.epic_ordinal, out.story_ordinal);
                }
            }
            _ => {}
        }
    }
    Ok(tasks)
}

fn advance(
    tasks: &mut [Task],
    task_id: &str,
    to: TaskStatus,
    from: impl Fn(TaskStatus) -> bool,
) {
    if let Some(task) = tasks.iter_mut().find(|t| t.id == task_id)
        && from(task.status)
    {
        task.status = to;
    }
}

/// A passing test closes every task the scope covers: the story's tasks
/// for story scope, the epic's fix tasks for epic scope, the integration
/// fix tasks for integration scope.
fn complete_scope(tasks: &mut [Task], scope: TestScope, epic_ordinal: u32, story_ordinal: u32) {
    for task in tasks.iter_mut() {
        let in_scope = match scope {
            TestScope::Story => {
                task.epic_ordinal == epic_ordinal && task.story_ordinal == story_ordinal
            }
            TestScope::Epic => {
                task.id.starts_with(&format!("task-epic-{}-fix-", epic_ordinal))
            }
            TestScope::Integration => task.id.starts_with("task-integration-fix-"),
        };
        if in_scope && task.status == TaskStatus::Testing {
            task.status = TaskStatus::Completed;
        }
    }
}

/// The phase transition table from the latest significant record.
///
/// Reviewer rejections and tester results are the signals; a scrum record
/// means "generation/analysis already happened, continue with task work"
/// (or terminal, if it recorded completion). Developer records and
/// reviewer passes route back to the task-creation check.
fn classify(
    closed: &[&ExecutionRecord],
    catalog: &Catalog,
    tasks: &[Task],
) -> Result<Phase, EngineError> {
    let latest = match closed.last() {
        Some(record) => record,
        None => return Ok(Phase::TaskCreation),
    };

    if latest.is_review_failure() {
        return Ok(Phase::ReviewAnalysis);
    }

    if let Some(test) = latest.tester_output() {
        catalog.check_location(test.epic_ordinal, test.story_ordinal)?;
        return Ok(match (test.test_type, test.test_result) {
            (TestScope::Story, Verdict::Fail) => Phase::TestAnalysis,
            (TestScope::Story, Verdict::Pass) => {
                if !catalog.is_epic_complete(test.epic_ordinal, tasks) {
                    Phase::TaskCreation
                } else if catalog.is_last_epic(test.epic_ordinal) {
                    // The final epic goes straight to whole-project
                    // testing; there is no separate epic-level run for it.
                    Phase::IntegrationTesting
                } else {
                    Phase::EpicTesting
                }
            }
            (TestScope::Epic, Verdict::Fail) => Phase::EpicTesting,
            (TestScope::Epic, Verdict::Pass) => {
                if catalog.is_last_epic(test.epic_ordinal) {
                    Phase::IntegrationTesting
                } else {
                    Phase::TaskCreation
                }
            }
            (TestScope::Integration, Verdict::Fail) => Phase::IntegrationTesting,
            (TestScope::Integration, Verdict::Pass) => Phase::Completed,
        });
    }

    if latest.role == RoleId::ScrumMaster
        && let Some(RoleOutput::Scrum(out)) = &latest.output
    {
        if out.current_phase.is_terminal() {
            return Ok(Phase::Completed);
        }
        // A pending test-request marker keeps the engine in the testing
        // phase until the tester record lands.
        match out.test_request {
            Some(TestScope::Epic) => return Ok(Phase::EpicTesting),
            Some(TestScope::Integration) => return Ok(Phase::IntegrationTesting),
            Some(TestScope::Story) | None => return Ok(Phase::TaskCreation),
        }
    }

    Ok(Phase::TaskCreation)
}
