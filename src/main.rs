use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "shipwright")]
#[command(version, about = "LLM-driven software delivery orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding shipwright.toml and the history database
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default shipwright.toml and create the history database
    Init,
    /// Manage projects
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Run the pipeline for a project until completion or pause
    Run {
        project_id: i64,
    },
    /// Show phase, backlog and task progress for a project
    Status {
        project_id: i64,
    },
    /// Ask the running pipeline to stop at the next task boundary
    Pause {
        project_id: i64,
    },
    /// Clear the pause flag and reset failed tasks to pending
    Resume {
        project_id: i64,
    },
    /// Show recent execution records
    History {
        project_id: i64,
        /// Maximum records to show
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },
}

#[derive(Subcommand)]
pub enum ProjectCommands {
    /// Register a project from a requirements file
    Add {
        name: String,
        /// Path to the requirements document
        requirements: PathBuf,
        /// Repository the delivery tail should publish to
        #[arg(long)]
        target_repo: Option<String>,
    },
    /// List registered projects
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("shipwright={}", default_level))),
        )
        .init();

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Project { command } => match command {
            ProjectCommands::Add {
                name,
                requirements,
                target_repo,
            } => {
                cmd::cmd_project_add(&project_dir, name, requirements, target_repo.as_deref())
                    .await?
            }
            ProjectCommands::List => cmd::cmd_project_list(&project_dir).await?,
        },
        Commands::Run { project_id } => cmd::cmd_run(&project_dir, *project_id).await?,
        Commands::Status { project_id } => cmd::cmd_status(&project_dir, *project_id).await?,
        Commands::Pause { project_id } => cmd::cmd_pause(&project_dir, *project_id).await?,
        Commands::Resume { project_id } => cmd::cmd_resume(&project_dir, *project_id).await?,
        Commands::History { project_id, limit } => {
            cmd::cmd_history(&project_dir, *project_id, *limit).await?
        }
    }

    Ok(())
}
