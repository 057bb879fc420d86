//! CLI command implementations.
//!
//! | Module    | Commands handled                       |
//! |-----------|----------------------------------------|
//! | `project` | `Init`, `Project add`, `Project list`  |
//! | `run`     | `Run`, `Pause`, `Resume`               |
//! | `status`  | `Status`, `History`                    |

use std::path::Path;

use anyhow::Result;

use shipwright::config::Config;
use shipwright::store::{DbHandle, HistoryDb};

pub mod project;
pub mod run;
pub mod status;

pub use project::{cmd_init, cmd_project_add, cmd_project_list};
pub use run::{cmd_pause, cmd_resume, cmd_run};
pub use status::{cmd_history, cmd_status};

/// Open (creating if needed) the history database the config points at.
fn open_db(project_dir: &Path, config: &Config) -> Result<DbHandle> {
    let path = if config.store.path.is_absolute() {
        config.store.path.clone()
    } else {
        project_dir.join(&config.store.path)
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(DbHandle::new(HistoryDb::new(&path)?))
}
