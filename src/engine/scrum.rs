//! Scrum-master transition actions.
//!
//! One invocation = derive the current phase, perform that phase's action
//! (reuse or generate tasks, or request a test run), and return the full
//! merged task set as a [`ScrumOutput`] for the caller to persist. Actions
//! are idempotent: re-running against the same history produces the same
//! output, and corrective task ids are derived from counts already in the
//! accumulated set so a crash between generation and persistence cannot
//! mint colliding ids.

use tracing::{debug, info};

use crate::errors::EngineError;
use crate::llm::{self, Generator, RetryPolicy, TaskDraft};
use crate::model::{self, Failure, Story, Task, TaskPriority, TaskRole, TaskStatus};
use crate::store::{ExecutionRecord, RoleOutput, ScrumOutput, TaskSummary, TestScope};

use super::{derive_state, Catalog, Phase};

/// Corrective tasks sort after any plausible story decomposition.
const FIX_SEQUENCE_BASE: u32 = 1000;

/// Run one scrum-master step: classify the phase and produce the next
/// task set (and, when a scope's tasks are all staged, a test request).
pub async fn run_scrum_step(
    catalog: &Catalog,
    history: &[ExecutionRecord],
    generator: &dyn Generator,
    retry: &RetryPolicy,
) -> Result<ScrumOutput, EngineError> {
    let state = derive_state(history, catalog)?;
    debug!(phase = %state.phase, tasks = state.tasks.len(), "derived pipeline state");

    match state.phase {
        Phase::TaskCreation => task_creation(catalog, state.tasks, generator, retry).await,
        Phase::ReviewAnalysis => {
            review_analysis(catalog, history, state.tasks, generator, retry).await
        }
        Phase::TestAnalysis => test_analysis(catalog, history, state.tasks, generator, retry).await,
        Phase::EpicTesting => scoped_testing(
            catalog,
            history,
            state.tasks,
            generator,
            retry,
            TestScope::Epic,
        )
        .await,
        Phase::IntegrationTesting => scoped_testing(
            catalog,
            history,
            state.tasks,
            generator,
            retry,
            TestScope::Integration,
        )
        .await,
        Phase::Completed => Ok(terminal_output(&state.tasks)),
    }
}

fn output(
    phase: Phase,
    epic: Option<u32>,
    story: Option<u32>,
    tasks: Vec<Task>,
    test_request: Option<TestScope>,
) -> ScrumOutput {
    let summary = TaskSummary::from_tasks(&tasks);
    ScrumOutput {
        current_phase: phase,
        current_epic: epic,
        current_story: story,
        tasks,
        summary,
        test_request,
    }
}

/// The terminal record carries an empty task list; the summary still
/// reflects the finished set for reporting.
fn terminal_output(tasks: &[Task]) -> ScrumOutput {
    ScrumOutput {
        current_phase: Phase::Completed,
        current_epic: None,
        current_story: None,
        tasks: Vec::new(),
        summary: TaskSummary::from_tasks(tasks),
        test_request: None,
    }
}

/// Find or create the current story's task set.
///
/// Scoped corrective work (epic / integration fix tasks) takes precedence
/// over advancing to the next story. An existing non-empty set is reused
/// as-is; generation happens at most once per story.
async fn task_creation(
    catalog: &Catalog,
    tasks: Vec<Task>,
    generator: &dyn Generator,
    retry: &RetryPolicy,
) -> Result<ScrumOutput, EngineError> {
    if let Some(out) = pending_fix_work(&tasks, TestScope::Epic) {
        return Ok(out);
    }
    if let Some(out) = pending_fix_work(&tasks, TestScope::Integration) {
        return Ok(out);
    }

    let (epic_ordinal, story_ordinal) = match catalog.first_incomplete_story(&tasks) {
        Some(pair) => pair,
        None => {
            info!("all stories complete, no work remains");
            return Ok(terminal_output(&tasks));
        }
    };

    let story_tasks = model::tasks_for_story(&tasks, epic_ordinal, story_ordinal);
    if story_tasks.is_empty() {
        let story = catalog
            .story(epic_ordinal, story_ordinal)
            .ok_or(EngineError::InconsistentCatalog {
                epic_ordinal,
                story_ordinal,
            })?;
        info!(epic = epic_ordinal, story = story_ordinal, "generating tasks for story");
        let drafts = generate_drafts(generator, retry, &story_prompt(story)).await?;
        let fresh: Vec<Task> = drafts
            .into_iter()
            .enumerate()
            .map(|(i, draft)| {
                let n = i as u32 + 1;
                Task {
                    id: Task::derive_id(epic_ordinal, story_ordinal, n),
                    title: draft.title,
                    description: draft.description,
                    priority: draft.priority,
                    role: TaskRole::Developer,
                    status: TaskStatus::Pending,
                    epic_ordinal,
                    story_ordinal,
                    sequence: n,
                }
            })
            .collect();
        let merged = model::accumulate([tasks.as_slice(), fresh.as_slice()]);
        return Ok(output(
            Phase::TaskCreation,
            Some(epic_ordinal),
            Some(story_ordinal),
            merged,
            None,
        ));
    }

    // Every task staged for testing means the story is ready for its
    // story-scope test run.
    let request = story_tasks
        .iter()
        .all(|t| t.status == TaskStatus::Testing)
        .then_some(TestScope::Story);
    Ok(output(
        Phase::TaskCreation,
        Some(epic_ordinal),
        Some(story_ordinal),
        tasks,
        request,
    ))
}

/// Route unfinished epic- or integration-scope corrective tasks: keep
/// developing them, or request the re-test once they are all staged.
fn pending_fix_work(tasks: &[Task], scope: TestScope) -> Option<ScrumOutput> {
    let open: Vec<&Task> = tasks
        .iter()
        .filter(|t| in_fix_scope(t, scope) && t.status != TaskStatus::Completed)
        .collect();
    let first = open.first()?;
    let epic = (scope == TestScope::Epic).then_some(first.epic_ordinal);
    let request = open
        .iter()
        .all(|t| t.status == TaskStatus::Testing)
        .then_some(scope);
    Some(output(
        match scope {
            TestScope::Epic => Phase::EpicTesting,
            _ => Phase::IntegrationTesting,
        },
        epic,
        None,
        tasks.to_vec(),
        request,
    ))
}

fn in_fix_scope(task: &Task, scope: TestScope) -> bool {
    match scope {
        TestScope::Epic => task.id.starts_with("task-epic-"),
        TestScope::Integration => task.id.starts_with("task-integration-fix-"),
        TestScope::Story => false,
    }
}

/// Generate corrective tasks from the reviewer's failure list. The fix
/// sequence continues from what the accumulated set already holds, so a
/// replay regenerates the same ids and the merge dedups them.
async fn review_analysis(
    catalog: &Catalog,
    history: &[ExecutionRecord],
    tasks: Vec<Task>,
    generator: &dyn Generator,
    retry: &RetryPolicy,
) -> Result<ScrumOutput, EngineError> {
    let review = latest_closed(history).and_then(|r| r.output.as_ref().and_then(|o| o.as_review()));
    let (epic_ordinal, story_ordinal, failures) = match review {
        Some(out) => (out.epic_ordinal, out.story_ordinal, out.failures.clone()),
        None => fallback_target(catalog, &tasks),
    };
    corrective_step(
        Phase::ReviewAnalysis,
        epic_ordinal,
        story_ordinal,
        &failures,
        "review",
        tasks,
        generator,
        retry,
    )
    .await
}

/// Generate corrective tasks from the story-scope test failures.
async fn test_analysis(
    catalog: &Catalog,
    history: &[ExecutionRecord],
    tasks: Vec<Task>,
    generator: &dyn Generator,
    retry: &RetryPolicy,
) -> Result<ScrumOutput, EngineError> {
    let (epic_ordinal, story_ordinal, failures) = match latest_closed(history) {
        Some(record) => match record.tester_output() {
            Some(out) => (out.epic_ordinal, out.story_ordinal, out.failures.clone()),
            None => fallback_target(catalog, &tasks),
        },
        None => fallback_target(catalog, &tasks),
    };
    corrective_step(
        Phase::TestAnalysis,
        epic_ordinal,
        story_ordinal,
        &failures,
        "story test",
        tasks,
        generator,
        retry,
    )
    .await
}

/// A failure record without a usable payload still needs a remediation
/// target: the story currently in flight.
fn fallback_target(catalog: &Catalog, tasks: &[Task]) -> (u32, u32, Vec<Failure>) {
    let (e, s) = catalog.first_incomplete_story(tasks).unwrap_or((0, 0));
    (e, s, Vec::new())
}

#[allow(clippy::too_many_arguments)]
async fn corrective_step(
    phase: Phase,
    epic_ordinal: u32,
    story_ordinal: u32,
    failures: &[Failure],
    source: &str,
    tasks: Vec<Task>,
    generator: &dyn Generator,
    retry: &RetryPolicy,
) -> Result<ScrumOutput, EngineError> {
    let prefix = format!("task-{}-{}-fix-", epic_ordinal, story_ordinal);
    let base = model::fix_count(&tasks, &prefix);
    info!(
        epic = epic_ordinal,
        story = story_ordinal,
        failures = failures.len(),
        "generating corrective tasks after {} failure",
        source
    );
    let drafts = generate_drafts(generator, retry, &corrective_prompt(source, failures)).await?;
    let fixes: Vec<Task> = drafts
        .into_iter()
        .enumerate()
        .map(|(i, draft)| {
            let n = base + i as u32 + 1;
            Task {
                id: Task::derive_fix_id(epic_ordinal, story_ordinal, n),
                title: draft.title,
                description: draft.description,
                // Corrective work always jumps the queue.
                priority: TaskPriority::High,
                role: TaskRole::Developer,
                status: TaskStatus::Pending,
                epic_ordinal,
                story_ordinal,
                sequence: FIX_SEQUENCE_BASE + n,
            }
        })
        .collect();
    let merged = model::accumulate([tasks.as_slice(), fixes.as_slice()]);
    Ok(output(
        phase,
        Some(epic_ordinal),
        Some(story_ordinal),
        merged,
        None,
    ))
}

/// Epic- and integration-testing actions share a shape: a fresh failure
/// spawns scoped corrective tasks, open corrective work keeps developing,
/// and otherwise the action emits (or re-emits) the test request marker.
async fn scoped_testing(
    catalog: &Catalog,
    history: &[ExecutionRecord],
    tasks: Vec<Task>,
    generator: &dyn Generator,
    retry: &RetryPolicy,
    scope: TestScope,
) -> Result<ScrumOutput, EngineError> {
    let epic_ordinal = target_epic(catalog, history, scope);

    // A failure being the latest record means no remediation exists yet.
    let fresh_failure = latest_closed(history)
        .and_then(|r| r.tester_output())
        .filter(|t| t.test_type == scope && !t.test_result.passed())
        .map(|t| t.failures.clone());

    if let Some(failures) = fresh_failure {
        let (prefix, phase) = match scope {
            TestScope::Epic => (format!("task-epic-{}-fix-", epic_ordinal), Phase::EpicTesting),
            _ => ("task-integration-fix-".to_string(), Phase::IntegrationTesting),
        };
        let base = model::fix_count(&tasks, &prefix);
        info!(scope = %scope, epic = epic_ordinal, failures = failures.len(), "generating scoped corrective tasks");
        let drafts =
            generate_drafts(generator, retry, &corrective_prompt(scope.as_str(), &failures))
                .await?;
        let fixes: Vec<Task> = drafts
            .into_iter()
            .enumerate()
            .map(|(i, draft)| {
                let n = base + i as u32 + 1;
                Task {
                    id: match scope {
                        TestScope::Epic => Task::derive_epic_fix_id(epic_ordinal, n),
                        _ => Task::derive_integration_fix_id(n),
                    },
                    title: draft.title,
                    description: draft.description,
                    priority: TaskPriority::High,
                    role: TaskRole::Developer,
                    status: TaskStatus::Pending,
                    epic_ordinal: if scope == TestScope::Epic { epic_ordinal } else { 0 },
                    story_ordinal: 0,
                    sequence: FIX_SEQUENCE_BASE + n,
                }
            })
            .collect();
        let merged = model::accumulate([tasks.as_slice(), fixes.as_slice()]);
        let epic = (scope == TestScope::Epic).then_some(epic_ordinal);
        return Ok(output(phase, epic, None, merged, None));
    }

    if let Some(out) = pending_fix_work(&tasks, scope) {
        return Ok(out);
    }

    let epic = (scope == TestScope::Epic).then_some(epic_ordinal);
    let phase = match scope {
        TestScope::Epic => Phase::EpicTesting,
        _ => Phase::IntegrationTesting,
    };
    Ok(output(phase, epic, None, tasks, Some(scope)))
}

/// The epic under test: taken from whichever record put the engine into
/// this phase.
fn target_epic(catalog: &Catalog, history: &[ExecutionRecord], scope: TestScope) -> u32 {
    if scope == TestScope::Integration {
        return 0;
    }
    if let Some(record) = latest_closed(history) {
        if let Some(test) = record.tester_output() {
            return test.epic_ordinal;
        }
        if let Some(RoleOutput::Scrum(out)) = &record.output
            && let Some(e) = out.current_epic
        {
            return e;
        }
    }
    catalog.last_epic_ordinal().unwrap_or(0)
}

fn latest_closed(history: &[ExecutionRecord]) -> Option<&ExecutionRecord> {
    history
        .iter()
        .rev()
        .find(|r| r.status != crate::store::ExecutionStatus::Running)
}

async fn generate_drafts(
    generator: &dyn Generator,
    retry: &RetryPolicy,
    prompt: &str,
) -> Result<Vec<TaskDraft>, EngineError> {
    let raw = llm::with_retry(retry, || generator.generate(prompt)).await?;
    Ok(llm::parse_task_drafts(&raw)?)
}

fn story_prompt(story: &Story) -> String {
    format!(
        "Decompose the following user story into implementation tasks sized \
         for {} story points. Respond with a JSON array of objects with \
         \"title\", \"description\" and \"priority\" (high, medium or low) \
         fields and nothing else.\n\nStory: {}\n\n{}",
        story.points, story.title, story.narrative
    )
}

fn corrective_prompt(source: &str, failures: &[Failure]) -> String {
    let mut prompt = format!(
        "The following {} failures were reported. Produce one corrective \
         implementation task per failure. Respond with a JSON array of \
         objects with \"title\", \"description\" and \"priority\" fields \
         and nothing else.\n",
        source
    );
    for failure in failures {
        prompt.push_str(&format!(
            "\n- [{}] {}: expected {}, got {}",
            failure.severity, failure.scenario, failure.expected_behavior, failure.actual_behavior
        ));
    }
    prompt
}
