//! Inspection commands — `shipwright status` and `shipwright history`.

use std::path::Path;

use anyhow::Result;

use shipwright::config::Config;
use shipwright::engine;
use shipwright::model::TaskStatus;
use shipwright::orchestrator::RoleId;

pub async fn cmd_status(project_dir: &Path, project_id: i64) -> Result<()> {
    let config = Config::load_or_default(project_dir)?;
    let db = crate::cmd::open_db(project_dir, &config)?;

    let (project, control, catalog, history) = db
        .call(move |db| {
            Ok((
                db.get_project(project_id)?,
                db.control(project_id)?,
                db.load_catalog(project_id)?,
                db.history(project_id, RoleId::development_loop())?,
            ))
        })
        .await?;

    println!("{}", console::style(&project.name).bold().cyan());
    println!("Created: {}", project.created_at);
    if let Some(repo) = &project.target_repo {
        println!("Target repo: {}", repo);
    }
    if control.paused {
        println!("{}", console::style("Paused").yellow().bold());
    }
    if let Some(since) = &control.active_since {
        println!("Loop active since: {}", since);
    }

    if catalog.is_empty() {
        println!();
        println!("No backlog yet. 'shipwright run {}' will decompose it.", project_id);
        return Ok(());
    }

    let state = engine::derive_state(&history, &catalog)?;
    println!();
    println!("Phase: {}", console::style(state.phase).bold());
    println!(
        "Epics: {}   Stories: {}",
        catalog.epics().len(),
        catalog
            .epics()
            .iter()
            .map(|e| catalog.stories_for(e.ordinal).map_or(0, |s| s.len()))
            .sum::<usize>()
    );

    let done = state
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .count();
    let failed = state
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Failed)
        .count();
    println!("Tasks: {} total, {} completed, {} failed", state.tasks.len(), done, failed);

    if failed > 0 {
        println!();
        for task in state.tasks.iter().filter(|t| t.status == TaskStatus::Failed) {
            println!("  {} {} {}", console::style("failed").red(), task.id, task.title);
        }
        println!("'shipwright resume {}' resets failed tasks to pending.", project_id);
    }
    Ok(())
}

pub async fn cmd_history(project_dir: &Path, project_id: i64, limit: u32) -> Result<()> {
    let config = Config::load_or_default(project_dir)?;
    let db = crate::cmd::open_db(project_dir, &config)?;
    let records = db
        .call(move |db| db.latest_records(project_id, RoleId::all(), limit))
        .await?;

    if records.is_empty() {
        println!("No execution records for project {}.", project_id);
        return Ok(());
    }

    println!(
        "{:<6} {:<22} {:<10} {:<22} Completed",
        "ID", "Role", "Status", "Started"
    );
    for record in records {
        let status = match record.status {
            shipwright::store::ExecutionStatus::Completed => {
                console::style(record.status.as_str()).green()
            }
            shipwright::store::ExecutionStatus::Failed => {
                console::style(record.status.as_str()).red()
            }
            shipwright::store::ExecutionStatus::Running => {
                console::style(record.status.as_str()).yellow()
            }
        };
        println!(
            "{:<6} {:<22} {:<10} {:<22} {}",
            record.id,
            record.role_name,
            status,
            record.started_at,
            record.completed_at.as_deref().unwrap_or("-")
        );
        if let Some(error) = &record.error {
            println!("       {}", console::style(error).red().dim());
        }
    }
    Ok(())
}
