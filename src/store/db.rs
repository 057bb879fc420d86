//! SQLite persistence for projects, the epic/story catalog, execution
//! records, and the pipeline-control row.
//!
//! The store is append-mostly: execution records receive exactly one
//! mutation after insertion (the close at completion), and closed records
//! are never rewritten. Catalog rows are written once by decomposition and
//! are read-only afterwards.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use super::{ExecutionRecord, ExecutionStatus, PipelineControl, Project, RoleOutput};
use crate::engine::Catalog;
use crate::errors::StoreError;
use crate::model::{Epic, Story};
use crate::orchestrator::RoleId;

type Result<T> = std::result::Result<T, StoreError>;

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(anyhow::Error::new(err))
    }
}

/// Async-safe handle to the history store.
///
/// Wraps `HistoryDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, preventing synchronous
/// SQLite I/O from tying up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<HistoryDb>>,
}

impl DbHandle {
    pub fn new(db: HistoryDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&HistoryDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Database(anyhow::anyhow!("DB task panicked: {}", e)))?
    }

    /// Acquire the database mutex synchronously. For startup
    /// initialization and tests only; never call from a hot async path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, HistoryDb>> {
        self.inner.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

pub struct HistoryDb {
    conn: Connection,
}

impl HistoryDb {
    /// Open (or create) a SQLite database at the given path and run
    /// migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .context("Failed to open SQLite database")
            .map_err(StoreError::Database)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .context("Failed to open in-memory SQLite database")
            .map_err(StoreError::Database)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.run_migrations()?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS projects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                requirements TEXT NOT NULL DEFAULT '',
                target_repo TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS epics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                ordinal INTEGER NOT NULL,
                UNIQUE (project_id, ordinal)
            );

            CREATE TABLE IF NOT EXISTS stories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                epic_id INTEGER NOT NULL REFERENCES epics(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                narrative TEXT NOT NULL DEFAULT '',
                points INTEGER NOT NULL DEFAULT 0,
                ordinal INTEGER NOT NULL,
                UNIQUE (epic_id, ordinal)
            );

            CREATE TABLE IF NOT EXISTS execution_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                role_name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'running',
                input TEXT,
                output TEXT,
                error TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_records_project_role
                ON execution_records (project_id, role, started_at DESC);

            CREATE TABLE IF NOT EXISTS pipeline_control (
                project_id INTEGER PRIMARY KEY REFERENCES projects(id) ON DELETE CASCADE,
                paused INTEGER NOT NULL DEFAULT 0,
                active_since TEXT
            );
            ",
        )?;
        Ok(())
    }

    // ---- projects ----

    pub fn create_project(
        &self,
        name: &str,
        requirements: &str,
        target_repo: Option<&str>,
    ) -> Result<Project> {
        let created_at = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO projects (name, requirements, target_repo, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![name, requirements, target_repo, created_at],
        )?;
        let id = self.conn.last_insert_rowid();
        // One control row per project, created up front so pause/activate
        // never have to upsert.
        self.conn.execute(
            "INSERT INTO pipeline_control (project_id, paused, active_since)
             VALUES (?1, 0, NULL)",
            params![id],
        )?;
        Ok(Project {
            id,
            name: name.to_string(),
            requirements: requirements.to_string(),
            target_repo: target_repo.map(str::to_string),
            created_at,
        })
    }

    pub fn get_project(&self, id: i64) -> Result<Project> {
        self.conn
            .query_row(
                "SELECT id, name, requirements, target_repo, created_at
                 FROM projects WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Project {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        requirements: row.get(2)?,
                        target_repo: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()?
            .ok_or(StoreError::ProjectNotFound { id })
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, requirements, target_repo, created_at
             FROM projects ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Project {
                id: row.get(0)?,
                name: row.get(1)?,
                requirements: row.get(2)?,
                target_repo: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    // ---- catalog ----

    pub fn create_epic(
        &self,
        project_id: i64,
        title: &str,
        description: &str,
        ordinal: u32,
    ) -> Result<Epic> {
        self.conn.execute(
            "INSERT INTO epics (project_id, title, description, ordinal)
             VALUES (?1, ?2, ?3, ?4)",
            params![project_id, title, description, ordinal],
        )?;
        Ok(Epic {
            id: self.conn.last_insert_rowid(),
            title: title.to_string(),
            description: description.to_string(),
            ordinal,
        })
    }

    pub fn create_story(
        &self,
        epic_id: i64,
        title: &str,
        narrative: &str,
        points: u32,
        ordinal: u32,
    ) -> Result<Story> {
        self.conn.execute(
            "INSERT INTO stories (epic_id, title, narrative, points, ordinal)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![epic_id, title, narrative, points, ordinal],
        )?;
        Ok(Story {
            id: self.conn.last_insert_rowid(),
            epic_id,
            title: title.to_string(),
            narrative: narrative.to_string(),
            points,
            ordinal,
        })
    }

    /// Load the full epic/story catalog for a project, ordered by ordinal.
    pub fn load_catalog(&self, project_id: i64) -> Result<Catalog> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, description, ordinal
             FROM epics WHERE project_id = ?1 ORDER BY ordinal",
        )?;
        let epics: Vec<Epic> = stmt
            .query_map(params![project_id], |row| {
                Ok(Epic {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    description: row.get(2)?,
                    ordinal: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<_, _>>()?;

        let mut catalog = Catalog::new();
        for epic in epics {
            let mut stmt = self.conn.prepare(
                "SELECT id, epic_id, title, narrative, points, ordinal
                 FROM stories WHERE epic_id = ?1 ORDER BY ordinal",
            )?;
            let stories: Vec<Story> = stmt
                .query_map(params![epic.id], |row| {
                    Ok(Story {
                        id: row.get(0)?,
                        epic_id: row.get(1)?,
                        title: row.get(2)?,
                        narrative: row.get(3)?,
                        points: row.get(4)?,
                        ordinal: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<_, _>>()?;
            catalog.push_epic(epic, stories);
        }
        Ok(catalog)
    }

    // ---- execution records ----

    /// Open a new execution record in `running` state.
    ///
    /// Enforces the ordering guarantee: at most one open record per
    /// (project, role) at a time.
    pub fn start_record(
        &self,
        project_id: i64,
        role: RoleId,
        input: Option<&serde_json::Value>,
    ) -> Result<ExecutionRecord> {
        let open: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM execution_records
                 WHERE project_id = ?1 AND role = ?2 AND status = 'running'",
                params![project_id, role.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if open.is_some() {
            return Err(StoreError::OpenRecordExists { project_id, role });
        }

        let started_at = Utc::now().to_rfc3339();
        let input_json = input.map(|v| v.to_string());
        self.conn.execute(
            "INSERT INTO execution_records (project_id, role, role_name, status, input, started_at)
             VALUES (?1, ?2, ?3, 'running', ?4, ?5)",
            params![
                project_id,
                role.as_str(),
                role.display_name(),
                input_json,
                started_at
            ],
        )?;
        Ok(ExecutionRecord {
            id: self.conn.last_insert_rowid(),
            project_id,
            role,
            role_name: role.display_name().to_string(),
            status: ExecutionStatus::Running,
            input: input.cloned(),
            output: None,
            error: None,
            started_at,
            completed_at: None,
        })
    }

    /// Close a running record as `completed` with a validated output.
    /// The record must still be `running`; closed records are immutable.
    pub fn complete_record(&self, id: i64, output: &RoleOutput) -> Result<()> {
        let (project_id, role) = self.open_record_role(id)?;
        output.validate_for(role)?;
        let output_json = serde_json::to_string(output)
            .map_err(|e| StoreError::Database(anyhow::Error::new(e)))?;
        let changed = self.conn.execute(
            "UPDATE execution_records
             SET status = 'completed', output = ?1, completed_at = ?2
             WHERE id = ?3 AND status = 'running'",
            params![output_json, Utc::now().to_rfc3339(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NoOpenRecord { project_id, role });
        }
        Ok(())
    }

    /// Close a running record as `failed` with an error message.
    pub fn fail_record(&self, id: i64, error: &str) -> Result<()> {
        let (project_id, role) = self.open_record_role(id)?;
        let changed = self.conn.execute(
            "UPDATE execution_records
             SET status = 'failed', error = ?1, completed_at = ?2
             WHERE id = ?3 AND status = 'running'",
            params![error, Utc::now().to_rfc3339(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NoOpenRecord { project_id, role });
        }
        Ok(())
    }

    fn open_record_role(&self, id: i64) -> Result<(i64, RoleId)> {
        let row: Option<(i64, String)> = self
            .conn
            .query_row(
                "SELECT project_id, role FROM execution_records WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (project_id, role_str) = row.ok_or(StoreError::RecordNotFound { id })?;
        let role = RoleId::from_str(&role_str)
            .map_err(|e| StoreError::Database(anyhow::anyhow!(e)))?;
        Ok((project_id, role))
    }

    pub fn get_record(&self, id: i64) -> Result<ExecutionRecord> {
        let mut stmt = self.conn.prepare(
            "SELECT id, project_id, role, role_name, status, input, output, error,
                    started_at, completed_at
             FROM execution_records WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], Self::map_record)?;
        match rows.next() {
            Some(row) => Self::decode_record(row?),
            None => Err(StoreError::RecordNotFound { id }),
        }
    }

    /// Full history for (project, role-set), oldest first. This is the
    /// view the phase engine consumes.
    pub fn history(&self, project_id: i64, roles: &[RoleId]) -> Result<Vec<ExecutionRecord>> {
        let records = self.query_records(
            project_id,
            roles,
            "ORDER BY started_at ASC, id ASC",
            None,
        )?;
        Ok(records)
    }

    /// Latest N records for (project, role-set), ordered by start time
    /// descending.
    pub fn latest_records(
        &self,
        project_id: i64,
        roles: &[RoleId],
        limit: u32,
    ) -> Result<Vec<ExecutionRecord>> {
        self.query_records(
            project_id,
            roles,
            "ORDER BY started_at DESC, id DESC",
            Some(limit),
        )
    }

    fn query_records(
        &self,
        project_id: i64,
        roles: &[RoleId],
        order: &str,
        limit: Option<u32>,
    ) -> Result<Vec<ExecutionRecord>> {
        if roles.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; roles.len()].join(", ");
        let mut sql = format!(
            "SELECT id, project_id, role, role_name, status, input, output, error,
                    started_at, completed_at
             FROM execution_records
             WHERE project_id = ? AND role IN ({}) {}",
            placeholders, order
        );
        if let Some(n) = limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }
        let mut stmt = self.conn.prepare(&sql)?;
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(project_id)];
        for role in roles {
            values.push(Box::new(role.as_str().to_string()));
        }
        let params_ref: Vec<&dyn rusqlite::ToSql> =
            values.iter().map(|v| v.as_ref()).collect();
        let rows = stmt.query_map(params_ref.as_slice(), Self::map_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(Self::decode_record(row?)?);
        }
        Ok(records)
    }

    #[allow(clippy::type_complexity)]
    fn map_record(
        row: &rusqlite::Row<'_>,
    ) -> rusqlite::Result<(
        i64,
        i64,
        String,
        String,
        String,
        Option<String>,
        Option<String>,
        Option<String>,
        String,
        Option<String>,
    )> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
            row.get(8)?,
            row.get(9)?,
        ))
    }

    fn decode_record(
        row: (
            i64,
            i64,
            String,
            String,
            String,
            Option<String>,
            Option<String>,
            Option<String>,
            String,
            Option<String>,
        ),
    ) -> Result<ExecutionRecord> {
        let (id, project_id, role_str, role_name, status_str, input, output, error, started_at, completed_at) =
            row;
        let role = RoleId::from_str(&role_str)
            .map_err(|e| StoreError::Database(anyhow::anyhow!(e)))?;
        let status = ExecutionStatus::from_str(&status_str)
            .map_err(|e| StoreError::Database(anyhow::anyhow!(e)))?;
        let input = input
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| StoreError::Database(anyhow::Error::new(e)))?;
        // Schema mismatch on read is rejected here, at the boundary,
        // rather than handing untyped data to the engine.
        let output: Option<RoleOutput> = output
            .map(|s| {
                serde_json::from_str(&s).map_err(|e| StoreError::OutputMismatch {
                    role,
                    message: e.to_string(),
                })
            })
            .transpose()?;
        if let Some(ref out) = output {
            out.validate_for(role)?;
        }
        Ok(ExecutionRecord {
            id,
            project_id,
            role,
            role_name,
            status,
            input,
            output,
            error,
            started_at,
            completed_at,
        })
    }

    // ---- pipeline control ----

    pub fn control(&self, project_id: i64) -> Result<PipelineControl> {
        self.conn
            .query_row(
                "SELECT project_id, paused, active_since
                 FROM pipeline_control WHERE project_id = ?1",
                params![project_id],
                |row| {
                    Ok(PipelineControl {
                        project_id: row.get(0)?,
                        paused: row.get::<_, i64>(1)? != 0,
                        active_since: row.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or(StoreError::ProjectNotFound { id: project_id })
    }

    pub fn set_paused(&self, project_id: i64, paused: bool) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE pipeline_control SET paused = ?1 WHERE project_id = ?2",
            params![paused as i64, project_id],
        )?;
        if changed == 0 {
            return Err(StoreError::ProjectNotFound { id: project_id });
        }
        Ok(())
    }

    /// Compare-and-set activation of the development loop. Returns true
    /// if this caller won the flag; false if a loop is already active.
    pub fn try_activate(&self, project_id: i64) -> Result<bool> {
        self.get_project(project_id)?;
        let changed = self.conn.execute(
            "UPDATE pipeline_control SET active_since = ?1
             WHERE project_id = ?2 AND active_since IS NULL",
            params![Utc::now().to_rfc3339(), project_id],
        )?;
        Ok(changed == 1)
    }

    pub fn deactivate(&self, project_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE pipeline_control SET active_since = NULL WHERE project_id = ?1",
            params![project_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ScrumOutput, TaskSummary};
    use crate::engine::Phase;

    fn db_with_project() -> (HistoryDb, i64) {
        let db = HistoryDb::new_in_memory().unwrap();
        let project = db.create_project("webshop", "Build a webshop", None).unwrap();
        (db, project.id)
    }

    fn scrum_output() -> RoleOutput {
        RoleOutput::Scrum(ScrumOutput {
            current_phase: Phase::TaskCreation,
            current_epic: Some(1),
            current_story: Some(1),
            tasks: vec![],
            summary: TaskSummary::default(),
            test_request: None,
        })
    }

    #[test]
    fn test_create_and_get_project() {
        let (db, id) = db_with_project();
        let project = db.get_project(id).unwrap();
        assert_eq!(project.name, "webshop");
        assert!(project.target_repo.is_none());
        assert!(matches!(
            db.get_project(999).unwrap_err(),
            StoreError::ProjectNotFound { id: 999 }
        ));
    }

    #[test]
    fn test_catalog_roundtrip_preserves_ordinals() {
        let (db, id) = db_with_project();
        let epic = db.create_epic(id, "Checkout", "Checkout flows", 1).unwrap();
        db.create_story(epic.id, "Cart", "As a buyer...", 3, 1).unwrap();
        db.create_story(epic.id, "Payment", "As a buyer...", 5, 2).unwrap();

        let catalog = db.load_catalog(id).unwrap();
        assert_eq!(catalog.epics().len(), 1);
        let stories = catalog.stories_for(1).unwrap();
        assert_eq!(stories.len(), 2);
        assert_eq!(stories[0].title, "Cart");
        assert_eq!(stories[1].ordinal, 2);
    }

    #[test]
    fn test_start_record_rejects_second_open_record_for_role() {
        let (db, id) = db_with_project();
        db.start_record(id, RoleId::ScrumMaster, None).unwrap();
        let err = db.start_record(id, RoleId::ScrumMaster, None).unwrap_err();
        assert!(matches!(err, StoreError::OpenRecordExists { .. }));
        // A different role is unaffected.
        db.start_record(id, RoleId::Developer, None).unwrap();
    }

    #[test]
    fn test_complete_record_closes_exactly_once() {
        let (db, id) = db_with_project();
        let record = db.start_record(id, RoleId::ScrumMaster, None).unwrap();
        db.complete_record(record.id, &scrum_output()).unwrap();

        let loaded = db.get_record(record.id).unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Completed);
        assert!(loaded.completed_at.is_some());
        assert!(loaded.output.unwrap().as_scrum().is_some());

        // Closed records are immutable.
        let err = db.complete_record(record.id, &scrum_output()).unwrap_err();
        assert!(matches!(err, StoreError::NoOpenRecord { .. }));
    }

    #[test]
    fn test_fail_record_persists_error_detail() {
        let (db, id) = db_with_project();
        let record = db.start_record(id, RoleId::Developer, None).unwrap();
        db.fail_record(record.id, "generation failed after 3 attempts").unwrap();
        let loaded = db.get_record(record.id).unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Failed);
        assert_eq!(
            loaded.error.as_deref(),
            Some("generation failed after 3 attempts")
        );
    }

    #[test]
    fn test_complete_record_rejects_mismatched_payload() {
        let (db, id) = db_with_project();
        let record = db.start_record(id, RoleId::Developer, None).unwrap();
        let err = db.complete_record(record.id, &scrum_output()).unwrap_err();
        assert!(matches!(err, StoreError::OutputMismatch { .. }));
        // The record stays open; the proper payload still closes it.
        let loaded = db.get_record(record.id).unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Running);
    }

    #[test]
    fn test_history_is_oldest_first_and_filtered_by_role() {
        let (db, id) = db_with_project();
        let r1 = db.start_record(id, RoleId::ScrumMaster, None).unwrap();
        db.complete_record(r1.id, &scrum_output()).unwrap();
        let r2 = db.start_record(id, RoleId::Developer, None).unwrap();
        db.fail_record(r2.id, "boom").unwrap();
        let r3 = db.start_record(id, RoleId::RequirementsAnalyst, None).unwrap();
        db.complete_record(r3.id, &RoleOutput::Opaque(serde_json::json!({})))
            .unwrap();

        let history = db
            .history(id, &[RoleId::ScrumMaster, RoleId::Developer])
            .unwrap();
        assert_eq!(history.len(), 2, "analyst record must be filtered out");
        assert_eq!(history[0].id, r1.id);
        assert_eq!(history[1].id, r2.id);
    }

    #[test]
    fn test_latest_records_orders_descending_with_limit() {
        let (db, id) = db_with_project();
        for _ in 0..3 {
            let r = db.start_record(id, RoleId::ScrumMaster, None).unwrap();
            db.complete_record(r.id, &scrum_output()).unwrap();
        }
        let latest = db.latest_records(id, &[RoleId::ScrumMaster], 2).unwrap();
        assert_eq!(latest.len(), 2);
        assert!(latest[0].id > latest[1].id);
    }

    #[test]
    fn test_control_row_created_with_project() {
        let (db, id) = db_with_project();
        let control = db.control(id).unwrap();
        assert!(!control.paused);
        assert!(control.active_since.is_none());
    }

    #[test]
    fn test_pause_roundtrip() {
        let (db, id) = db_with_project();
        db.set_paused(id, true).unwrap();
        assert!(db.control(id).unwrap().paused);
        db.set_paused(id, false).unwrap();
        assert!(!db.control(id).unwrap().paused);
    }

    #[test]
    fn test_try_activate_is_compare_and_set() {
        let (db, id) = db_with_project();
        assert!(db.try_activate(id).unwrap(), "first caller wins the flag");
        assert!(!db.try_activate(id).unwrap(), "second caller must lose");
        db.deactivate(id).unwrap();
        assert!(db.try_activate(id).unwrap(), "flag is reusable after deactivate");
    }
}
