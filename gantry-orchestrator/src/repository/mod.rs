//! Repository Module
//!
//! Persistence contract for the orchestrator and its backends.
//! [`MemoryStore`] keeps everything in process; [`PgStore`] persists to
//! PostgreSQL. Both are interchangeable behind [`Store`].

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use gantry_core::domain::run::WorkflowRun;
use gantry_core::domain::workflow::Workflow;
use thiserror::Error;

/// Store error type
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} '{key}' not found")]
    NotFound { kind: &'static str, key: String },

    #[error("run '{0}' has already finished")]
    RunFinished(String),

    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl StoreError {
    pub fn workflow_not_found(name: &str) -> Self {
        StoreError::NotFound {
            kind: "workflow",
            key: name.to_string(),
        }
    }

    pub fn run_not_found(id: &str) -> Self {
        StoreError::NotFound {
            kind: "run",
            key: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Persistence(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Storage for workflows and their runs
///
/// Every operation is safe to call concurrently. Reads return independent
/// copies; nothing handed out aliases the stored state.
#[async_trait]
pub trait Store: Send + Sync {
    /// Inserts or replaces a workflow by name
    async fn save_workflow(&self, workflow: &Workflow) -> Result<()>;

    async fn get_workflow(&self, name: &str) -> Result<Workflow>;

    async fn list_workflows(&self) -> Result<Vec<Workflow>>;

    async fn delete_workflow(&self, name: &str) -> Result<()>;

    /// Inserts or replaces a run by id
    ///
    /// Fails with `RunFinished` when the stored run is already terminal.
    async fn save_run(&self, run: &WorkflowRun) -> Result<()>;

    async fn get_run(&self, id: &str) -> Result<WorkflowRun>;

    /// All runs, newest first
    async fn list_runs(&self) -> Result<Vec<WorkflowRun>>;

    /// Overwrites an existing run
    ///
    /// Fails with `NotFound` when the run was never saved and with
    /// `RunFinished` when the stored run is already terminal. A run never
    /// changes workflow; a snapshot naming another one is rejected.
    async fn update_run(&self, run: &WorkflowRun) -> Result<()>;

    /// Removes every run of a workflow; removing none is not an error
    async fn delete_runs_by_workflow(&self, workflow_name: &str) -> Result<()>;
}
