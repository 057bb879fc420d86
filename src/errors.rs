//! Typed error hierarchy for the Shipwright orchestrator.
//!
//! Four top-level enums cover the four subsystems:
//! - `StoreError` — history store and catalog persistence failures
//! - `GenerationError` — external generation capability failures, with
//!   transient/permanent classification for the retry executor
//! - `EngineError` — phase derivation and transition failures
//! - `PipelineError` — orchestrator sequencing failures

use thiserror::Error;

use crate::orchestrator::RoleId;

/// Errors from the history store and catalog persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Project {id} not found")]
    ProjectNotFound { id: i64 },

    #[error("Execution record {id} not found")]
    RecordNotFound { id: i64 },

    #[error("No running execution record for role {role} in project {project_id}")]
    NoOpenRecord { project_id: i64, role: RoleId },

    #[error("Role {role} already has a running execution record in project {project_id}")]
    OpenRecordExists { project_id: i64, role: RoleId },

    #[error("Output payload for role {role} does not match its schema: {message}")]
    OutputMismatch { role: RoleId, message: String },

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,
}

/// Broad classification of a generation failure, carried through retry
/// exhaustion so callers can distinguish "needs a human" from
/// "infrastructure blip, safe to re-trigger later".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        })
    }
}

/// Errors from the external generation capability.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generation endpoint returned HTTP {code}: {message}")]
    Status { code: u16, message: String },

    #[error("Generation request timed out")]
    Timeout,

    #[error("Connection to generation endpoint failed: {message}")]
    Connect { message: String },

    #[error("Generation output failed to parse: {message}")]
    Malformed { message: String },

    #[error("Generation failed after {attempts} attempts ({classification}): {message}")]
    RetriesExhausted {
        attempts: u32,
        classification: ErrorClass,
        message: String,
    },
}

impl GenerationError {
    /// An error is retryable iff it is a server-side (5xx) error or a
    /// recognized transient network condition. Malformed output is never
    /// retried: a parse error rarely heals and retrying risks masking a
    /// prompt or schema defect.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { code, .. } => *code >= 500,
            Self::Timeout | Self::Connect { .. } => true,
            Self::Malformed { .. } | Self::RetriesExhausted { .. } => false,
        }
    }

    pub fn classification(&self) -> ErrorClass {
        if self.is_retryable() {
            ErrorClass::Transient
        } else if let Self::RetriesExhausted { classification, .. } = self {
            *classification
        } else {
            ErrorClass::Permanent
        }
    }
}

/// Errors from phase derivation and transition actions.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No epic/story catalog exists for project {project_id}; run decomposition first")]
    MissingCatalog { project_id: i64 },

    #[error(
        "History references epic {epic_ordinal} story {story_ordinal}, absent from the catalog"
    )]
    InconsistentCatalog {
        epic_ordinal: u32,
        story_ordinal: u32,
    },

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the pipeline orchestrator.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("A development loop is already active for project {project_id}")]
    AlreadyActive { project_id: i64 },

    #[error("Role {role} is missing a required precondition: {message}")]
    MissingPrecondition { role: RoleId, message: String },

    #[error("Role {role} failed: {message}")]
    RoleFailed { role: RoleId, message: String },

    #[error("Role {role} exceeded its {limit_secs}s wall-clock ceiling")]
    RoleTimeout { role: RoleId, limit_secs: u64 },

    #[error("Development loop exceeded {iterations} iterations without completing")]
    IterationCapExceeded { iterations: u32 },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::RoleId;

    #[test]
    fn generation_error_5xx_is_retryable() {
        let err = GenerationError::Status {
            code: 503,
            message: "overloaded".into(),
        };
        assert!(err.is_retryable());
        assert_eq!(err.classification(), ErrorClass::Transient);
    }

    #[test]
    fn generation_error_4xx_is_not_retryable() {
        let err = GenerationError::Status {
            code: 401,
            message: "bad key".into(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.classification(), ErrorClass::Permanent);
    }

    #[test]
    fn generation_error_network_conditions_are_retryable() {
        assert!(GenerationError::Timeout.is_retryable());
        assert!(
            GenerationError::Connect {
                message: "connection reset".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn generation_error_malformed_is_permanent() {
        let err = GenerationError::Malformed {
            message: "expected JSON array".into(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.classification(), ErrorClass::Permanent);
    }

    #[test]
    fn retries_exhausted_preserves_inner_classification() {
        let err = GenerationError::RetriesExhausted {
            attempts: 3,
            classification: ErrorClass::Transient,
            message: "Generation request timed out".into(),
        };
        assert!(!err.is_retryable(), "an exhausted call is not retried again");
        assert_eq!(err.classification(), ErrorClass::Transient);
        assert!(err.to_string().contains("3 attempts"));
        assert!(err.to_string().contains("transient"));
    }

    #[test]
    fn store_error_open_record_exists_carries_role() {
        let err = StoreError::OpenRecordExists {
            project_id: 7,
            role: RoleId::Developer,
        };
        assert!(err.to_string().contains("developer"));
        assert!(err.to_string().contains('7'));
    }

    #[test]
    fn engine_error_converts_from_generation_error() {
        let inner = GenerationError::Timeout;
        let engine_err: EngineError = inner.into();
        assert!(matches!(engine_err, EngineError::Generation(_)));
    }

    #[test]
    fn pipeline_error_inconsistent_catalog_propagates() {
        let engine_err = EngineError::InconsistentCatalog {
            epic_ordinal: 4,
            story_ordinal: 2,
        };
        let pipeline_err: PipelineError = engine_err.into();
        assert!(pipeline_err.to_string().contains("epic 4 story 2"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&StoreError::LockPoisoned);
        assert_std_error(&GenerationError::Timeout);
        assert_std_error(&EngineError::MissingCatalog { project_id: 1 });
        assert_std_error(&PipelineError::AlreadyActive { project_id: 1 });
    }
}
