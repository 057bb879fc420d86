//! The pipeline runner: sequences roles across the macro-pipeline and
//! drives the development loop until the engine reports completion.
//!
//! Every role invocation is bracketed by an execution record: started
//! before the role runs, closed exactly once with its output or its
//! error. The runner itself keeps no task or phase state between
//! iterations; it re-derives everything from the store, which is what
//! lets a killed process pick up mid-story with nothing lost.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::engine::{self, Catalog, Phase};
use crate::errors::PipelineError;
use crate::llm::{self, Generator, RetryPolicy};
use crate::model::{Failure, Task, TaskStatus};
use crate::store::{
    DbHandle, Project, ReviewOutput, RoleOutput, TesterOutput, TestScope, Verdict, WorkerOutput,
};

use super::{control, RoleId};

/// Operating limits for one run.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub retry: RetryPolicy,
    /// Wall-clock ceiling per role invocation.
    pub role_timeout: Duration,
    /// Upper bound on development-loop iterations before giving up.
    pub iteration_cap: u32,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            role_timeout: Duration::from_secs(600),
            iteration_cap: 200,
        }
    }
}

/// How a run ended, short of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Integration passed and the delivery tail finished.
    Completed,
    /// A pause flag stopped the loop at a task boundary.
    Paused,
}

pub struct PipelineRunner {
    db: DbHandle,
    generator: Arc<dyn Generator>,
    options: RunnerOptions,
}

/// Verdict payload the reviewer role is prompted to return.
#[derive(Deserialize)]
struct ReviewDraft {
    result: Verdict,
    #[serde(default)]
    failures: Vec<Failure>,
}

/// Result payload the tester role is prompted to return.
#[derive(Deserialize)]
struct TestDraft {
    test_result: Verdict,
    #[serde(default)]
    overall_score: f32,
    #[serde(default)]
    failures: Vec<Failure>,
    #[serde(default)]
    successes: Vec<String>,
}

impl PipelineRunner {
    pub fn new(db: DbHandle, generator: Arc<dyn Generator>, options: RunnerOptions) -> Self {
        Self {
            db,
            generator,
            options,
        }
    }

    /// Run the full pipeline for a project. Exactly one runner can be
    /// active per project; the activation flag is always released, even
    /// on error.
    pub async fn run(&self, project_id: i64) -> Result<RunOutcome, PipelineError> {
        control::activate(&self.db, project_id).await?;
        let result = self.run_inner(project_id).await;
        if let Err(e) = control::deactivate(&self.db, project_id).await {
            warn!(project_id, error = %e, "failed to release activation flag");
        }
        result
    }

    async fn run_inner(&self, project_id: i64) -> Result<RunOutcome, PipelineError> {
        let project = self.db.call(move |db| db.get_project(project_id)).await?;
        info!(project_id, name = %project.name, "starting pipeline");

        let mut catalog = self.db.call(move |db| db.load_catalog(project_id)).await?;
        if catalog.is_empty() {
            catalog = self.bootstrap(&project).await?;
        }
        if catalog.is_empty() {
            return Err(crate::errors::EngineError::MissingCatalog { project_id }.into());
        }

        match self.development_loop(&project, &catalog).await? {
            RunOutcome::Paused => return Ok(RunOutcome::Paused),
            RunOutcome::Completed => {}
        }

        self.delivery_tail(&project).await?;
        info!(project_id, "pipeline complete");
        Ok(RunOutcome::Completed)
    }

    /// Analysis and decomposition: requirements in, persisted epic/story
    /// catalog out.
    async fn bootstrap(&self, project: &Project) -> Result<Catalog, PipelineError> {
        if project.requirements.trim().is_empty() {
            return Err(PipelineError::MissingPrecondition {
                role: RoleId::RequirementsAnalyst,
                message: "project has no requirements document".into(),
            });
        }

        let analysis = self
            .opaque_step(
                project.id,
                RoleId::RequirementsAnalyst,
                format!(
                    "Analyze the following product requirements. Identify the core \
                     capabilities, constraints and risks.\n\n{}",
                    project.requirements
                ),
            )
            .await?;

        let architecture = self
            .opaque_step(
                project.id,
                RoleId::SolutionArchitect,
                format!(
                    "Propose a technical architecture for these requirements and \
                     analysis.\n\nRequirements:\n{}\n\nAnalysis:\n{}",
                    project.requirements, analysis
                ),
            )
            .await?;

        let role = RoleId::BacklogPlanner;
        let record_id = self.start(project.id, role, None).await?;
        let raw = match self
            .generate(
                role,
                format!(
                    "Decompose this project into epics and user stories. Respond with \
                     JSON: {{\"epics\": [{{\"title\", \"description\", \"stories\": \
                     [{{\"title\", \"narrative\", \"points\"}}]}}]}} and nothing \
                     else.\n\nRequirements:\n{}\n\nArchitecture:\n{}",
                    project.requirements, architecture
                ),
            )
            .await
        {
            Ok(raw) => raw,
            Err(e) => return Err(self.close_failed(project.id, record_id, role, e).await),
        };
        let epics = match llm::parse_backlog(&raw) {
            Ok(epics) => epics,
            Err(e) => {
                let err = PipelineError::RoleFailed {
                    role,
                    message: e.to_string(),
                };
                return Err(self.close_failed(project.id, record_id, role, err).await);
            }
        };

        let project_id = project.id;
        let catalog = self
            .db
            .call(move |db| {
                let mut catalog = Catalog::new();
                for (i, draft) in epics.into_iter().enumerate() {
                    let epic =
                        db.create_epic(project_id, &draft.title, &draft.description, i as u32 + 1)?;
                    let mut stories = Vec::with_capacity(draft.stories.len());
                    for (j, story) in draft.stories.into_iter().enumerate() {
                        stories.push(db.create_story(
                            epic.id,
                            &story.title,
                            &story.narrative,
                            story.points,
                            j as u32 + 1,
                        )?);
                    }
                    catalog.push_epic(epic, stories);
                }
                Ok(catalog)
            })
            .await?;

        let summary = json!({
            "epics": catalog.epics().len(),
            "stories": catalog.epics().iter().map(|e| catalog.stories_for(e.ordinal).map_or(0, <[_]>::len)).sum::<usize>(),
        });
        self.db
            .call(move |db| db.complete_record(record_id, &RoleOutput::Opaque(summary)))
            .await?;
        info!(project_id, "backlog decomposition persisted");
        Ok(catalog)
    }

    /// The scrum-driven loop: derive, act, work one task or test run,
    /// repeat. Pause is checked at every iteration boundary.
    async fn development_loop(
        &self,
        project: &Project,
        catalog: &Catalog,
    ) -> Result<RunOutcome, PipelineError> {
        let project_id = project.id;

        for _ in 0..self.options.iteration_cap {
            let control = control::status(&self.db, project_id).await?;
            if control.paused {
                info!(project_id, "pause flag set, stopping at task boundary");
                return Ok(RunOutcome::Paused);
            }

            let history = self
                .db
                .call(move |db| db.history(project_id, RoleId::development_loop()))
                .await?;

            let role = RoleId::ScrumMaster;
            let record_id = self.start(project_id, role, None).await?;
            let scrum = match tokio::time::timeout(
                self.options.role_timeout,
                engine::run_scrum_step(catalog, &history, self.generator.as_ref(), &self.options.retry),
            )
            .await
            {
                Err(_) => {
                    let err = PipelineError::RoleTimeout {
                        role,
                        limit_secs: self.options.role_timeout.as_secs(),
                    };
                    return Err(self.close_failed(project_id, record_id, role, err).await);
                }
                Ok(Err(e)) => {
                    return Err(self.close_failed(project_id, record_id, role, e.into()).await)
                }
                Ok(Ok(out)) => out,
            };
            let output = RoleOutput::Scrum(scrum.clone());
            self.db
                .call(move |db| db.complete_record(record_id, &output))
                .await?;

            if scrum.current_phase == Phase::Completed {
                return Ok(RunOutcome::Completed);
            }

            if let Some(scope) = scrum.test_request {
                self.run_tester(project_id, catalog, &scrum.tasks, scope, &scrum)
                    .await?;
                continue;
            }

            if let Some(task) = next_to_develop(&scrum.tasks) {
                self.run_developer(project_id, &task).await?;
                continue;
            }
            if let Some(task) = next_to_review(&scrum.tasks) {
                self.run_reviewer(project_id, &task).await?;
                continue;
            }
            if scrum.tasks.iter().any(|t| t.status == TaskStatus::Failed) {
                // Failed tasks are only ever re-attempted by an explicit
                // resume, never silently.
                return Err(PipelineError::Other(anyhow::anyhow!(
                    "project {} has failed tasks; resume it to re-attempt them",
                    project_id
                )));
            }
            // Nothing actionable this round; the next derivation decides.
        }

        Err(PipelineError::IterationCapExceeded {
            iterations: self.options.iteration_cap,
        })
    }

    async fn run_developer(&self, project_id: i64, task: &Task) -> Result<(), PipelineError> {
        let role = RoleId::Developer;
        let input = json!({"task_id": task.id});
        let record_id = self.start(project_id, role, Some(input)).await?;
        info!(project_id, task = %task.id, "developing task");

        let prompt = format!(
            "Implement the following task. Describe the changes you made.\n\n\
             Task: {}\n{}",
            task.title, task.description
        );
        match self.generate(role, prompt).await {
            Ok(notes) => {
                let output = RoleOutput::Worker(WorkerOutput {
                    task_id: task.id.clone(),
                    notes,
                });
                self.db
                    .call(move |db| db.complete_record(record_id, &output))
                    .await?;
                Ok(())
            }
            Err(e) => Err(self.close_failed(project_id, record_id, role, e).await),
        }
    }

    async fn run_reviewer(&self, project_id: i64, task: &Task) -> Result<(), PipelineError> {
        let role = RoleId::Reviewer;
        let input = json!({"task_id": task.id});
        let record_id = self.start(project_id, role, Some(input)).await?;
        info!(project_id, task = %task.id, "reviewing task");

        let prompt = format!(
            "Review the implementation of this task. Respond with JSON: \
             {{\"result\": \"pass\"|\"fail\", \"failures\": [{{\"severity\", \
             \"category\", \"scenario\", \"expected_behavior\", \
             \"actual_behavior\"}}]}} and nothing else.\n\nTask: {}\n{}",
            task.title, task.description
        );
        let draft: ReviewDraft = match self.generate_parsed(role, prompt).await {
            Ok(d) => d,
            Err(e) => return Err(self.close_failed(project_id, record_id, role, e).await),
        };

        // A rejection is still a completed invocation; the verdict in the
        // output is what routes the engine to review analysis.
        if !draft.result.passed() {
            warn!(project_id, task = %task.id, failures = draft.failures.len(), "review rejected task");
        }
        let output = RoleOutput::Review(ReviewOutput {
            result: draft.result,
            task_id: task.id.clone(),
            failures: draft.failures,
            epic_ordinal: task.epic_ordinal,
            story_ordinal: task.story_ordinal,
        });
        self.db
            .call(move |db| db.complete_record(record_id, &output))
            .await?;
        Ok(())
    }

    async fn run_tester(
        &self,
        project_id: i64,
        catalog: &Catalog,
        tasks: &[Task],
        scope: TestScope,
        scrum: &crate::store::ScrumOutput,
    ) -> Result<(), PipelineError> {
        let role = RoleId::Tester;
        let (epic_ordinal, story_ordinal) = match scope {
            TestScope::Story => (
                scrum.current_epic.unwrap_or_default(),
                scrum.current_story.unwrap_or_default(),
            ),
            TestScope::Epic => (scrum.current_epic.unwrap_or_default(), 0),
            TestScope::Integration => (0, 0),
        };
        let input = json!({"scope": scope, "epic": epic_ordinal, "story": story_ordinal});
        let record_id = self.start(project_id, role, Some(input)).await?;
        info!(project_id, scope = %scope, epic = epic_ordinal, story = story_ordinal, "running tests");

        let subject = match scope {
            TestScope::Story => catalog
                .story(epic_ordinal, story_ordinal)
                .map(|s| format!("Story: {}\n{}", s.title, s.narrative))
                .unwrap_or_default(),
            TestScope::Epic => catalog
                .epic(epic_ordinal)
                .map(|e| format!("Epic: {}\n{}", e.title, e.description))
                .unwrap_or_default(),
            TestScope::Integration => "The whole project, end to end.".to_string(),
        };
        let completed = tasks
            .iter()
            .filter(|t| t.status != TaskStatus::Pending)
            .map(|t| format!("- {}: {}", t.id, t.title))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Test the following at {} scope. Respond with JSON: \
             {{\"test_result\": \"pass\"|\"fail\", \"overall_score\": 0.0-1.0, \
             \"failures\": [...], \"successes\": [...]}} and nothing else.\n\n\
             {}\n\nImplemented tasks:\n{}",
            scope, subject, completed
        );
        let draft: TestDraft = match self.generate_parsed(role, prompt).await {
            Ok(d) => d,
            Err(e) => return Err(self.close_failed(project_id, record_id, role, e).await),
        };

        let output = RoleOutput::Test(TesterOutput {
            test_type: scope,
            test_result: draft.test_result,
            overall_score: draft.overall_score,
            failures: draft.failures,
            successes: draft.successes,
            epic_ordinal,
            story_ordinal,
        });
        self.db
            .call(move |db| db.complete_record(record_id, &output))
            .await?;
        Ok(())
    }

    /// Packaging, publication, deployment and verification, then the
    /// completion notice. Deployment roles need a target repository and
    /// are skipped, not failed, when the project has none.
    async fn delivery_tail(&self, project: &Project) -> Result<(), PipelineError> {
        let tail = [
            RoleId::ReleasePackager,
            RoleId::RepoPublisher,
            RoleId::SiteDeployer,
            RoleId::DeployVerifier,
        ];
        for role in tail {
            if role.requires_target_repo() && project.target_repo.is_none() {
                info!(role = %role, "skipping: project has no target repository");
                continue;
            }
            let repo = project.target_repo.as_deref().unwrap_or("");
            self.opaque_step(
                project.id,
                role,
                format!(
                    "Perform the {} step for project '{}' targeting {}. Report what \
                     was done.",
                    role.display_name(),
                    project.name,
                    repo
                ),
            )
            .await?;
        }

        self.opaque_step(
            project.id,
            RoleId::Notifier,
            format!(
                "Compose a completion notice for project '{}'.",
                project.name
            ),
        )
        .await?;
        Ok(())
    }

    /// One record-bracketed free-text role invocation.
    async fn opaque_step(
        &self,
        project_id: i64,
        role: RoleId,
        prompt: String,
    ) -> Result<String, PipelineError> {
        let record_id = self.start(project_id, role, None).await?;
        match self.generate(role, prompt).await {
            Ok(text) => {
                let output = RoleOutput::Opaque(json!({"text": text}));
                self.db
                    .call(move |db| db.complete_record(record_id, &output))
                    .await?;
                Ok(text)
            }
            Err(e) => Err(self.close_failed(project_id, record_id, role, e).await),
        }
    }

    async fn start(
        &self,
        project_id: i64,
        role: RoleId,
        input: Option<serde_json::Value>,
    ) -> Result<i64, PipelineError> {
        let record = self
            .db
            .call(move |db| db.start_record(project_id, role, input.as_ref()))
            .await?;
        Ok(record.id)
    }

    /// Generation with retry and the per-role wall-clock ceiling.
    async fn generate(&self, role: RoleId, prompt: String) -> Result<String, PipelineError> {
        let fut = llm::with_retry(&self.options.retry, || self.generator.generate(&prompt));
        match tokio::time::timeout(self.options.role_timeout, fut).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(PipelineError::RoleFailed {
                role,
                message: e.to_string(),
            }),
            Err(_) => Err(PipelineError::RoleTimeout {
                role,
                limit_secs: self.options.role_timeout.as_secs(),
            }),
        }
    }

    async fn generate_parsed<T: serde::de::DeserializeOwned>(
        &self,
        role: RoleId,
        prompt: String,
    ) -> Result<T, PipelineError> {
        let raw = self.generate(role, prompt).await?;
        llm::parse_payload(&raw).map_err(|e| PipelineError::RoleFailed {
            role,
            message: e.to_string(),
        })
    }

    /// Close a record as failed, escalate through the issue reporter,
    /// and hand the original error back for propagation.
    async fn close_failed(
        &self,
        project_id: i64,
        record_id: i64,
        role: RoleId,
        err: PipelineError,
    ) -> PipelineError {
        error!(project_id, role = %role, error = %err, "role invocation failed");
        let message = err.to_string();
        if let Err(store_err) = self
            .db
            .call(move |db| db.fail_record(record_id, &message))
            .await
        {
            warn!(project_id, error = %store_err, "failed to close record");
        }
        self.report_issue(project_id, role, &err).await;
        err
    }

    /// Escalation is best effort: a broken reporter must never mask the
    /// original failure.
    async fn report_issue(&self, project_id: i64, failed_role: RoleId, err: &PipelineError) {
        let role = RoleId::IssueReporter;
        let record = match self
            .db
            .call(move |db| db.start_record(project_id, role, None))
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(project_id, error = %e, "could not open issue-reporter record");
                return;
            }
        };
        let output = RoleOutput::Opaque(json!({
            "failed_role": failed_role.as_str(),
            "error": err.to_string(),
        }));
        let record_id = record.id;
        if let Err(e) = self
            .db
            .call(move |db| db.complete_record(record_id, &output))
            .await
        {
            warn!(project_id, error = %e, "could not close issue-reporter record");
        }
    }
}

/// First task awaiting development, in accumulated order.
fn next_to_develop(tasks: &[Task]) -> Option<Task> {
    tasks
        .iter()
        .find(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Developing))
        .cloned()
}

/// First task awaiting a review verdict, in accumulated order.
fn next_to_review(tasks: &[Task]) -> Option<Task> {
    tasks
        .iter()
        .find(|t| t.status == TaskStatus::Reviewing)
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TaskPriority, TaskRole};

    fn task(id: &str, status: TaskStatus, sequence: u32) -> Task {
        Task {
            id: id.into(),
            title: id.into(),
            description: String::new(),
            priority: TaskPriority::Medium,
            role: TaskRole::Developer,
            status,
            epic_ordinal: 1,
            story_ordinal: 1,
            sequence,
        }
    }

    #[test]
    fn development_comes_before_review() {
        let tasks = vec![
            task("task-1-1-1", TaskStatus::Reviewing, 1),
            task("task-1-1-2", TaskStatus::Pending, 2),
        ];
        assert_eq!(next_to_develop(&tasks).unwrap().id, "task-1-1-2");
        assert_eq!(next_to_review(&tasks).unwrap().id, "task-1-1-1");
    }

    #[test]
    fn staged_tasks_are_not_actionable() {
        let tasks = vec![
            task("task-1-1-1", TaskStatus::Testing, 1),
            task("task-1-1-2", TaskStatus::Completed, 2),
        ];
        assert!(next_to_develop(&tasks).is_none());
        assert!(next_to_review(&tasks).is_none());
    }
}
