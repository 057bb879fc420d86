//! Project setup commands — `shipwright init` and `shipwright project`.

use std::path::Path;

use anyhow::{Context, Result};

use shipwright::config::Config;

pub fn cmd_init(project_dir: &Path) -> Result<()> {
    let config = Config::default();
    let path = config.save(project_dir)?;
    crate::cmd::open_db(project_dir, &config)?;
    println!(
        "{} wrote {}",
        console::style("Initialized.").green().bold(),
        path.display()
    );
    println!(
        "Set the {} environment variable before running a pipeline.",
        config.generation.api_key_env
    );
    Ok(())
}

pub async fn cmd_project_add(
    project_dir: &Path,
    name: &str,
    requirements_file: &Path,
    target_repo: Option<&str>,
) -> Result<()> {
    let requirements = std::fs::read_to_string(requirements_file)
        .with_context(|| format!("Failed to read {}", requirements_file.display()))?;
    let config = Config::load_or_default(project_dir)?;
    let db = crate::cmd::open_db(project_dir, &config)?;

    let name = name.to_string();
    let repo = target_repo.map(String::from);
    let project = db
        .call(move |db| db.create_project(&name, &requirements, repo.as_deref()))
        .await?;
    println!(
        "{} project {} ({})",
        console::style("Created").green().bold(),
        project.id,
        project.name
    );
    if project.target_repo.is_none() {
        println!("No target repository set; deployment steps will be skipped.");
    }
    Ok(())
}

pub async fn cmd_project_list(project_dir: &Path) -> Result<()> {
    let config = Config::load_or_default(project_dir)?;
    let db = crate::cmd::open_db(project_dir, &config)?;
    let projects = db.call(|db| db.list_projects()).await?;

    if projects.is_empty() {
        println!("No projects yet. Add one with 'shipwright project add'.");
        return Ok(());
    }

    println!("{:<6} {:<24} {:<20} Created", "ID", "Name", "Target repo");
    for project in projects {
        println!(
            "{:<6} {:<24} {:<20} {}",
            project.id,
            project.name,
            project.target_repo.as_deref().unwrap_or("-"),
            project.created_at
        );
    }
    Ok(())
}
