//! Pipeline execution and control commands — `shipwright run`, `pause`,
//! `resume`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use shipwright::config::Config;
use shipwright::errors::PipelineError;
use shipwright::llm::HttpGenerator;
use shipwright::orchestrator::{control, PipelineRunner, RunOutcome};

pub async fn cmd_run(project_dir: &Path, project_id: i64) -> Result<()> {
    let config = Config::load_or_default(project_dir)?;
    let db = crate::cmd::open_db(project_dir, &config)?;
    let api_key = config.api_key()?;
    let options = config.runner_options();
    let generator = HttpGenerator::new(
        config.generation.endpoint.clone(),
        config.generation.model.clone(),
        api_key,
        // Leave headroom under the role ceiling for retries.
        Duration::from_secs(config.pipeline.role_timeout_secs.max(30) / 3),
    )?;

    let runner = PipelineRunner::new(db, Arc::new(generator), options);
    match runner.run(project_id).await {
        Ok(RunOutcome::Completed) => {
            println!(
                "{} project {} delivered",
                console::style("Done.").green().bold(),
                project_id
            );
            Ok(())
        }
        Ok(RunOutcome::Paused) => {
            println!(
                "{} stopped at a task boundary; 'shipwright resume {}' to continue",
                console::style("Paused.").yellow().bold(),
                project_id
            );
            Ok(())
        }
        Err(PipelineError::AlreadyActive { project_id }) => {
            println!(
                "{} a development loop is already active for project {}",
                console::style("Refused:").red().bold(),
                project_id
            );
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn cmd_pause(project_dir: &Path, project_id: i64) -> Result<()> {
    let config = Config::load_or_default(project_dir)?;
    let db = crate::cmd::open_db(project_dir, &config)?;
    control::pause(&db, project_id).await?;
    println!(
        "{} project {} will stop at the next task boundary",
        console::style("Paused.").yellow().bold(),
        project_id
    );
    Ok(())
}

pub async fn cmd_resume(project_dir: &Path, project_id: i64) -> Result<()> {
    let config = Config::load_or_default(project_dir)?;
    let db = crate::cmd::open_db(project_dir, &config)?;
    let report = control::resume(&db, project_id).await?;
    println!(
        "{} {} failed task(s) reset to pending",
        console::style("Resumed.").green().bold(),
        report.reset_tasks
    );
    println!("Run 'shipwright run {}' to restart the pipeline.", project_id);
    Ok(())
}
