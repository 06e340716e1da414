//! In-memory store
//!
//! Volatile backend: contents live as long as the process. The table locks
//! only guard map structure; each run's content sits behind its own
//! [`RunRecord`] lock, so updates to one run never serialize another.

use async_trait::async_trait;
use gantry_core::domain::run::{RunRecord, TransitionError, WorkflowRun};
use gantry_core::domain::workflow::Workflow;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::{Result, Store, StoreError};

#[derive(Debug, Default)]
pub struct MemoryStore {
    workflows: RwLock<HashMap<String, Workflow>>,
    runs: RwLock<HashMap<String, Arc<RunRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, id: &str) -> Result<Arc<RunRecord>> {
        self.runs
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::run_not_found(id))
    }

    fn records(&self) -> Vec<Arc<RunRecord>> {
        self.runs.read().values().cloned().collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_workflow(&self, workflow: &Workflow) -> Result<()> {
        self.workflows
            .write()
            .insert(workflow.name.clone(), workflow.clone());
        Ok(())
    }

    async fn get_workflow(&self, name: &str) -> Result<Workflow> {
        self.workflows
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::workflow_not_found(name))
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>> {
        let mut workflows: Vec<Workflow> = self.workflows.read().values().cloned().collect();
        workflows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(workflows)
    }

    async fn delete_workflow(&self, name: &str) -> Result<()> {
        self.workflows
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::workflow_not_found(name))
    }

    async fn save_run(&self, run: &WorkflowRun) -> Result<()> {
        let mut runs = self.runs.write();
        if runs.get(&run.id).is_some_and(|existing| existing.is_finished()) {
            return Err(StoreError::RunFinished(run.id.clone()));
        }
        runs.insert(run.id.clone(), Arc::new(RunRecord::new(run.clone())));
        Ok(())
    }

    async fn get_run(&self, id: &str) -> Result<WorkflowRun> {
        Ok(self.record(id)?.snapshot())
    }

    async fn list_runs(&self) -> Result<Vec<WorkflowRun>> {
        let mut runs: Vec<WorkflowRun> = self
            .records()
            .iter()
            .map(|record| record.snapshot())
            .collect();
        runs.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(runs)
    }

    async fn update_run(&self, run: &WorkflowRun) -> Result<()> {
        let record = self.record(&run.id)?;
        record.replace(run.clone()).map_err(|err| match err {
            TransitionError::RunFinished(id) => StoreError::RunFinished(id),
            other => StoreError::Persistence(other.to_string()),
        })
    }

    async fn delete_runs_by_workflow(&self, workflow_name: &str) -> Result<()> {
        self.runs
            .write()
            .retain(|_, record| record.workflow_name() != workflow_name);
        Ok(())
    }
}
