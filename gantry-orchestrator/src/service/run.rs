//! Run Service
//!
//! Triggers workflow runs and drives them to completion.
//!
//! Every triggered run gets one background task that executes its jobs in
//! `job_order`, one at a time, and persists the run after each transition.
//! The task reports back only through the store: callers poll
//! [`RunService::get_run`] to observe progress.

use chrono::Utc;
use gantry_core::domain::job::{Job, JobOutcome};
use gantry_core::domain::run::{RunRecord, WorkflowRun};
use gantry_runner::{ExecutionBackend, ExecutionContext, ExecutionError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::repository::{Store, StoreError};

/// Service error type
#[derive(Debug, Error)]
pub enum RunServiceError {
    #[error("workflow '{0}' not found")]
    WorkflowNotFound(String),

    #[error("run '{0}' not found")]
    RunNotFound(String),

    #[error("orchestrator is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, RunServiceError>;

pub struct RunService {
    store: Arc<dyn Store>,
    backend: Arc<dyn ExecutionBackend>,
    run_timeout: Duration,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl RunService {
    /// Creates a run service
    ///
    /// # Arguments
    /// * `store` - Where workflows are read from and runs are persisted
    /// * `backend` - Executes one job at a time
    /// * `run_timeout` - Upper bound for a whole run, independent of callers
    pub fn new(
        store: Arc<dyn Store>,
        backend: Arc<dyn ExecutionBackend>,
        run_timeout: Duration,
    ) -> Self {
        Self {
            store,
            backend,
            run_timeout,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Starts a run of the named workflow and returns it without waiting
    ///
    /// The returned run is `running` with every job `pending`.
    pub async fn trigger_workflow(&self, name: &str) -> Result<WorkflowRun> {
        if self.shutdown.is_cancelled() {
            return Err(RunServiceError::ShuttingDown);
        }

        let workflow = self.store.get_workflow(name).await.map_err(|e| {
            if e.is_not_found() {
                RunServiceError::WorkflowNotFound(name.to_string())
            } else {
                RunServiceError::Store(e)
            }
        })?;

        let run = WorkflowRun::new(&workflow);
        self.store.save_run(&run).await?;

        // A delete that raced with this trigger may have swept the runs
        // before ours was saved
        match self.store.get_workflow(name).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                warn!(
                    "Workflow {} was deleted while run {} was being created",
                    name, run.id
                );
                if let Err(e) = self.store.delete_runs_by_workflow(name).await {
                    warn!("Failed to delete runs of workflow {}: {}", name, e);
                }
                return Err(RunServiceError::WorkflowNotFound(name.to_string()));
            }
            Err(e) => return Err(RunServiceError::Store(e)),
        }

        info!(
            "Run {} of workflow {} created ({} job(s))",
            run.id,
            run.workflow_name,
            run.job_order.len()
        );

        let driver = RunDriver {
            store: Arc::clone(&self.store),
            backend: Arc::clone(&self.backend),
            record: RunRecord::new(run.clone()),
            ctx: ExecutionContext::new(
                run.id.clone(),
                self.shutdown.child_token(),
                self.run_timeout,
            ),
        };
        self.tracker.spawn(driver.drive());

        Ok(run)
    }

    pub async fn get_run(&self, id: &str) -> Result<WorkflowRun> {
        self.store.get_run(id).await.map_err(|e| {
            if e.is_not_found() {
                RunServiceError::RunNotFound(id.to_string())
            } else {
                RunServiceError::Store(e)
            }
        })
    }

    /// All runs, newest first
    pub async fn list_runs(&self) -> Result<Vec<WorkflowRun>> {
        Ok(self.store.list_runs().await?)
    }

    /// Cancels in-flight runs and waits for their tasks to finish
    ///
    /// Interrupted runs still reach a terminal state before this returns.
    pub async fn shutdown(&self) {
        info!("Cancelling {} in-flight run(s)", self.tracker.len());
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("All runs finished");
    }
}

// =============================================================================
// Run Driver
// =============================================================================

/// Owns a run while its background task executes it
struct RunDriver {
    store: Arc<dyn Store>,
    backend: Arc<dyn ExecutionBackend>,
    record: RunRecord,
    ctx: ExecutionContext,
}

impl RunDriver {
    async fn drive(self) {
        let run_id = self.record.id().to_string();
        let order = self.record.snapshot().job_order;

        for job_name in &order {
            let job = match self
                .record
                .mutate(|run| run.start_job(job_name, Utc::now()))
            {
                Ok(job) => job,
                Err(e) => {
                    error!("Run {}: cannot start job {}: {}", run_id, job_name, e);
                    break;
                }
            };
            debug!("Run {}: job {} started", run_id, job_name);
            self.persist_progress().await;

            let outcome = self.execute(job_name, job).await;
            let succeeded = outcome.succeeded;

            if let Err(e) = self
                .record
                .mutate(|run| run.finish_job(job_name, outcome, Utc::now()))
            {
                error!("Run {}: cannot finish job {}: {}", run_id, job_name, e);
                break;
            }
            self.persist_progress().await;

            if !succeeded {
                info!(
                    "Run {}: job {} failed, skipping remaining jobs",
                    run_id, job_name
                );
                break;
            }
        }

        match self.record.mutate(|run| run.complete(Utc::now())) {
            Ok(status) => info!("Run {} finished with status {}", run_id, status),
            Err(e) => error!("Run {}: cannot complete: {}", run_id, e),
        }

        if let Err(e) = self.store.update_run(&self.record.snapshot()).await {
            error!("Run {}: failed to persist final state: {}", run_id, e);
        }
    }

    /// Runs one job on the backend
    ///
    /// The backend call gets its own task so that a panic inside it fails
    /// the job instead of leaving the run unfinished.
    async fn execute(&self, job_name: &str, job: Job) -> JobOutcome {
        let backend = Arc::clone(&self.backend);
        let ctx = self.ctx.clone();
        let name = job_name.to_string();

        let handle =
            tokio::spawn(async move { backend.execute(&name, &job, &ctx).await });

        match handle.await {
            Ok(Ok(output)) => JobOutcome::success(output),
            Ok(Err(e)) => {
                error!("Run {}: job {} failed: {}", self.ctx.run_id, job_name, e);
                JobOutcome::failure(failure_output(&e))
            }
            Err(e) => {
                error!("Run {}: job {} aborted: {}", self.ctx.run_id, job_name, e);
                JobOutcome::failure(format!("error: job execution aborted: {}\n", e))
            }
        }
    }

    /// Progress bookkeeping never interrupts the job itself
    async fn persist_progress(&self) {
        if let Err(e) = self.store.update_run(&self.record.snapshot()).await {
            warn!(
                "Run {}: failed to persist progress: {}",
                self.record.id(),
                e
            );
        }
    }
}

/// Captured output followed by one `error:` line describing the failure
fn failure_output(err: &ExecutionError) -> String {
    let mut output = err.output().to_string();
    if !output.is_empty() && !output.ends_with('\n') {
        output.push('\n');
    }
    output.push_str(&format!("error: {}\n", err));
    output
}
