//! Pause, resume and activation control for the development loop.
//!
//! All control state lives in the store's `pipeline_control` row, never
//! in process memory: a pause survives a crash, and activation is a
//! compare-and-set on that row so two processes restarting the same
//! project cannot both win the loop.

use tracing::info;

use crate::engine;
use crate::errors::PipelineError;
use crate::model::TaskStatus;
use crate::store::{DbHandle, PipelineControl, RoleOutput, ScrumOutput, TaskSummary};

use super::RoleId;

/// What a resume actually did, for operator feedback.
#[derive(Debug, Clone, Copy)]
pub struct ResumeReport {
    pub reset_tasks: usize,
}

/// Read the control row.
pub async fn status(db: &DbHandle, project_id: i64) -> Result<PipelineControl, PipelineError> {
    Ok(db.call(move |db| db.control(project_id)).await?)
}

/// Set the pause flag. The running loop observes it at the next task
/// boundary; a loop started later observes it before doing anything.
pub async fn pause(db: &DbHandle, project_id: i64) -> Result<(), PipelineError> {
    db.call(move |db| db.set_paused(project_id, true)).await?;
    info!(project_id, "pipeline paused");
    Ok(())
}

/// Clear the pause flag and reset any failed tasks back to pending.
///
/// The reset is recorded as a new scrum-master record carrying the
/// amended task set, so the history shows exactly which tasks a human
/// chose to re-attempt and when. Nothing else about the history changes.
pub async fn resume(db: &DbHandle, project_id: i64) -> Result<ResumeReport, PipelineError> {
    db.call(move |db| db.set_paused(project_id, false)).await?;

    let (catalog, history) = db
        .call(move |db| {
            let catalog = db.load_catalog(project_id)?;
            let history = db.history(project_id, RoleId::development_loop())?;
            Ok((catalog, history))
        })
        .await?;
    let state = engine::derive_state(&history, &catalog)?;

    let mut tasks = state.tasks;
    let mut reset = 0usize;
    for task in &mut tasks {
        if task.status == TaskStatus::Failed {
            task.status = TaskStatus::Pending;
            reset += 1;
        }
    }

    if reset > 0 {
        let phase = state.phase;
        db.call(move |db| {
            let summary = TaskSummary::from_tasks(&tasks);
            let record = db.start_record(project_id, RoleId::ScrumMaster, None)?;
            let output = RoleOutput::Scrum(ScrumOutput {
                current_phase: phase,
                current_epic: None,
                current_story: None,
                tasks,
                summary,
                test_request: None,
            });
            db.complete_record(record.id, &output)
        })
        .await?;
    }

    info!(project_id, reset_tasks = reset, "pipeline resumed");
    Ok(ResumeReport { reset_tasks: reset })
}

/// Claim the activation flag for this process. Exactly one caller wins
/// per project; everyone else gets [`PipelineError::AlreadyActive`].
pub async fn activate(db: &DbHandle, project_id: i64) -> Result<(), PipelineError> {
    let won = db.call(move |db| db.try_activate(project_id)).await?;
    if !won {
        return Err(PipelineError::AlreadyActive { project_id });
    }
    Ok(())
}

/// Release the activation flag. Safe to call when not held.
pub async fn deactivate(db: &DbHandle, project_id: i64) -> Result<(), PipelineError> {
    db.call(move |db| db.deactivate(project_id)).await?;
    Ok(())
}
