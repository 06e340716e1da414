//! Workflow Service
//!
//! Ingestion, lookup, removal and run statistics of workflows.

use gantry_core::domain::run::WorkflowRun;
use gantry_core::domain::workflow::Workflow;
use gantry_core::dto::workflow::WorkflowStats;
use gantry_core::parser::{self, ParseError, ValidationError};
use std::sync::Arc;
use thiserror::Error;

use crate::repository::{Store, StoreError};

/// Service error type
#[derive(Debug, Error)]
pub enum WorkflowServiceError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("invalid workflow: {0}")]
    Validation(#[from] ValidationError),

    #[error("workflow '{0}' not found")]
    NotFound(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for WorkflowServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { key, .. } => WorkflowServiceError::NotFound(key),
            other => WorkflowServiceError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkflowServiceError>;

#[derive(Clone)]
pub struct WorkflowService {
    store: Arc<dyn Store>,
}

impl WorkflowService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Parses, validates and stores a workflow document
    ///
    /// Nothing is stored unless the document parses and validates.
    pub async fn create_workflow(&self, source: &str) -> Result<Workflow> {
        let workflow = parser::parse_workflow(source)?;
        parser::validate_workflow(&workflow)?;

        self.store.save_workflow(&workflow).await?;

        tracing::info!(
            "Workflow stored: {} ({} job(s))",
            workflow.name,
            workflow.jobs.len()
        );

        Ok(workflow)
    }

    pub async fn get_workflow(&self, name: &str) -> Result<Workflow> {
        Ok(self.store.get_workflow(name).await?)
    }

    pub async fn list_workflows(&self) -> Result<Vec<Workflow>> {
        Ok(self.store.list_workflows().await?)
    }

    /// Deletes a workflow together with its run history
    ///
    /// The workflow goes first so that a concurrent trigger either sees it
    /// gone or saved its run before the runs are swept. Runs are swept even
    /// when the workflow was already absent; failing to delete them is
    /// logged only.
    pub async fn delete_workflow(&self, name: &str) -> Result<()> {
        let deleted = self.store.delete_workflow(name).await;

        if let Err(e) = self.store.delete_runs_by_workflow(name).await {
            tracing::warn!("Failed to delete runs of workflow {}: {}", name, e);
        }

        deleted?;

        tracing::info!("Workflow deleted: {}", name);

        Ok(())
    }

    /// Runs of one workflow, newest first
    pub async fn list_workflow_runs(&self, name: &str) -> Result<Vec<WorkflowRun>> {
        self.store.get_workflow(name).await?;

        let runs = self.store.list_runs().await?;
        Ok(runs
            .into_iter()
            .filter(|run| run.workflow_name == name)
            .collect())
    }

    pub async fn workflow_stats(&self, name: &str) -> Result<WorkflowStats> {
        let runs = self.list_workflow_runs(name).await?;
        Ok(WorkflowStats::from_runs(&runs))
    }
}
