//! Workflow run domain types
//!
//! A run is one execution of a workflow. [`WorkflowRun`] is the plain,
//! serializable state (and the projection observers receive);
//! [`RunRecord`] is the lock-protected live record that the orchestrator
//! mutates and stores hand out snapshots of.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::job::{Job, JobOutcome, JobStatus};
use crate::domain::workflow::Workflow;

/// Run execution status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Success => write!(f, "success"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Rejected state-machine transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("run '{0}' has already finished")]
    RunFinished(String),

    #[error("run '{run_id}' has no job named '{job}'")]
    UnknownJob { run_id: String, job: String },

    #[error("job '{job}' cannot move from {from} to {to}")]
    InvalidJobState {
        job: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("snapshot for run '{found}' cannot replace run '{expected}'")]
    IdMismatch { expected: String, found: String },

    #[error("run '{run_id}' belongs to workflow '{expected}', not '{found}'")]
    WorkflowMismatch {
        run_id: String,
        expected: String,
        found: String,
    },
}

/// One execution instance of a workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: String,
    pub workflow_name: String,
    pub status: RunStatus,
    pub jobs: HashMap<String, Job>,
    pub job_order: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    /// Creates a running run for `workflow`
    ///
    /// Every job is copied in `pending` state together with the job order,
    /// so later edits to the workflow never reach this run.
    pub fn new(workflow: &Workflow) -> Self {
        let now = Utc::now();
        let jobs = workflow
            .ordered_jobs()
            .map(|(name, job)| (name.to_string(), job.pending()))
            .collect();

        Self {
            id: generate_run_id(now),
            workflow_name: workflow.name.clone(),
            status: RunStatus::Running,
            jobs,
            job_order: workflow
                .ordered_jobs()
                .map(|(name, _)| name.to_string())
                .collect(),
            started_at: now,
            completed_at: None,
        }
    }

    /// True once the run reached a terminal status and has a completion time
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal() && self.completed_at.is_some()
    }

    /// Wall-clock duration of a finished run
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|end| end - self.started_at)
    }

    /// Marks a pending job as running and returns its snapshot
    pub fn start_job(&mut self, name: &str, at: DateTime<Utc>) -> Result<Job, TransitionError> {
        self.ensure_active()?;
        let run_id = self.id.clone();
        let job = self
            .jobs
            .get_mut(name)
            .ok_or_else(|| TransitionError::UnknownJob {
                run_id,
                job: name.to_string(),
            })?;

        if job.status != JobStatus::Pending {
            return Err(TransitionError::InvalidJobState {
                job: name.to_string(),
                from: job.status,
                to: JobStatus::Running,
            });
        }

        job.status = JobStatus::Running;
        job.started_at = Some(at);
        job.ended_at = None;
        Ok(job.clone())
    }

    /// Records the outcome of a running job
    pub fn finish_job(
        &mut self,
        name: &str,
        outcome: JobOutcome,
        at: DateTime<Utc>,
    ) -> Result<JobStatus, TransitionError> {
        self.ensure_active()?;
        let run_id = self.id.clone();
        let job = self
            .jobs
            .get_mut(name)
            .ok_or_else(|| TransitionError::UnknownJob {
                run_id,
                job: name.to_string(),
            })?;

        let status = if outcome.succeeded {
            JobStatus::Success
        } else {
            JobStatus::Failed
        };

        if job.status != JobStatus::Running {
            return Err(TransitionError::InvalidJobState {
                job: name.to_string(),
                from: job.status,
                to: status,
            });
        }

        job.status = status;
        job.output = outcome.output;
        job.ended_at = Some(at);
        Ok(status)
    }

    /// Moves the run to its terminal status and sets `completed_at`
    ///
    /// The run succeeds only if no executed job failed. A job still marked
    /// running was interrupted and is failed here.
    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<RunStatus, TransitionError> {
        self.ensure_active()?;

        let mut failed = false;
        for job in self.jobs.values_mut() {
            match job.status {
                JobStatus::Failed => failed = true,
                JobStatus::Running => {
                    job.status = JobStatus::Failed;
                    job.ended_at = Some(at);
                    failed = true;
                }
                JobStatus::Pending | JobStatus::Success => {}
            }
        }

        self.status = if failed {
            RunStatus::Failed
        } else {
            RunStatus::Success
        };
        self.completed_at = Some(at.max(self.started_at));
        Ok(self.status)
    }

    fn ensure_active(&self) -> Result<(), TransitionError> {
        if self.is_finished() {
            return Err(TransitionError::RunFinished(self.id.clone()));
        }
        Ok(())
    }
}

/// Time-ordered run id with a random disambiguator
fn generate_run_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("run-{}-{}", now.timestamp_millis(), &suffix[..8])
}

/// Live, lock-protected run record
///
/// All access goes through a single per-run mutex: readers get a deep copy,
/// writers apply a scoped mutation that either fully lands or leaves the
/// record untouched.
#[derive(Debug)]
pub struct RunRecord {
    id: String,
    workflow_name: String,
    run: Mutex<WorkflowRun>,
}

impl RunRecord {
    pub fn new(run: WorkflowRun) -> Self {
        Self {
            id: run.id.clone(),
            workflow_name: run.workflow_name.clone(),
            run: Mutex::new(run),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn workflow_name(&self) -> &str {
        &self.workflow_name
    }

    /// Independent copy of the current state
    pub fn snapshot(&self) -> WorkflowRun {
        self.run.lock().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.run.lock().is_finished()
    }

    /// Applies `f` atomically
    ///
    /// `f` works on a draft; the draft replaces the record only when `f`
    /// returns `Ok`. Finished runs reject every mutation.
    pub fn mutate<T>(
        &self,
        f: impl FnOnce(&mut WorkflowRun) -> Result<T, TransitionError>,
    ) -> Result<T, TransitionError> {
        let mut guard = self.run.lock();
        if guard.is_finished() {
            return Err(TransitionError::RunFinished(self.id.clone()));
        }

        let mut draft = guard.clone();
        let value = f(&mut draft)?;
        self.check_identity(&draft)?;

        *guard = draft;
        Ok(value)
    }

    /// Overwrites the record with a newer snapshot of the same run
    pub fn replace(&self, run: WorkflowRun) -> Result<(), TransitionError> {
        self.check_identity(&run)?;

        let mut guard = self.run.lock();
        if guard.is_finished() {
            return Err(TransitionError::RunFinished(self.id.clone()));
        }
        *guard = run;
        Ok(())
    }

    /// Id and workflow name are fixed for the lifetime of a record
    fn check_identity(&self, run: &WorkflowRun) -> Result<(), TransitionError> {
        if run.id != self.id {
            return Err(TransitionError::IdMismatch {
                expected: self.id.clone(),
                found: run.id.clone(),
            });
        }
        if run.workflow_name != self.workflow_name {
            return Err(TransitionError::WorkflowMismatch {
                run_id: self.id.clone(),
                expected: self.workflow_name.clone(),
                found: run.workflow_name.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::Step;
    use std::sync::Arc;

    fn workflow(names: &[&str]) -> Workflow {
        Workflow::new(
            "demo",
            names
                .iter()
                .map(|name| {
                    (
                        name.to_string(),
                        Job::new("ubuntu", vec![Step::new("step", "echo ok")]),
                    )
                })
                .collect(),
        )
    }

    #[test]
    fn test_new_run_copies_jobs_as_pending() {
        let wf = workflow(&["lint", "test"]);
        let run = WorkflowRun::new(&wf);

        assert!(run.id.starts_with("run-"));
        assert_eq!(run.workflow_name, "demo");
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.job_order, vec!["lint", "test"]);
        assert_eq!(run.jobs.len(), 2);
        assert!(run.jobs.values().all(|job| job.status == JobStatus::Pending));
        assert!(run.completed_at.is_none());
    }

    #[test]
    fn test_run_ids_are_distinct() {
        let wf = workflow(&["a"]);
        let ids: std::collections::HashSet<String> =
            (0..100).map(|_| WorkflowRun::new(&wf).id).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn test_job_lifecycle() {
        let mut run = WorkflowRun::new(&workflow(&["build"]));
        let started = Utc::now();

        let job = run.start_job("build", started).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.started_at, Some(started));

        let status = run
            .finish_job("build", JobOutcome::success("done"), Utc::now())
            .unwrap();
        assert_eq!(status, JobStatus::Success);
        assert_eq!(run.jobs["build"].output, "done");
        assert!(run.jobs["build"].ended_at.is_some());
    }

    #[test]
    fn test_start_unknown_job_fails() {
        let mut run = WorkflowRun::new(&workflow(&["build"]));
        let err = run.start_job("deploy", Utc::now()).unwrap_err();
        assert!(matches!(err, TransitionError::UnknownJob { .. }));
    }

    #[test]
    fn test_job_cannot_start_twice() {
        let mut run = WorkflowRun::new(&workflow(&["build"]));
        run.start_job("build", Utc::now()).unwrap();
        let err = run.start_job("build", Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            TransitionError::InvalidJobState {
                from: JobStatus::Running,
                ..
            }
        ));
    }

    #[test]
    fn test_finish_requires_running_job() {
        let mut run = WorkflowRun::new(&workflow(&["build"]));
        let err = run
            .finish_job("build", JobOutcome::success(""), Utc::now())
            .unwrap_err();
        assert!(matches!(err, TransitionError::InvalidJobState { .. }));
    }

    #[test]
    fn test_complete_with_failed_job_fails_run() {
        let mut run = WorkflowRun::new(&workflow(&["a", "b", "c"]));
        run.start_job("a", Utc::now()).unwrap();
        run.finish_job("a", JobOutcome::success("ok"), Utc::now())
            .unwrap();
        run.start_job("b", Utc::now()).unwrap();
        run.finish_job("b", JobOutcome::failure("boom"), Utc::now())
            .unwrap();

        assert_eq!(run.complete(Utc::now()).unwrap(), RunStatus::Failed);
        assert_eq!(run.jobs["a"].status, JobStatus::Success);
        assert_eq!(run.jobs["b"].status, JobStatus::Failed);
        assert_eq!(run.jobs["c"].status, JobStatus::Pending);
    }

    #[test]
    fn test_complete_fails_interrupted_job() {
        let mut run = WorkflowRun::new(&workflow(&["a"]));
        run.start_job("a", Utc::now()).unwrap();

        assert_eq!(run.complete(Utc::now()).unwrap(), RunStatus::Failed);
        assert_eq!(run.jobs["a"].status, JobStatus::Failed);
        assert!(run.jobs["a"].ended_at.is_some());
    }

    #[test]
    fn test_complete_is_final() {
        let mut run = WorkflowRun::new(&workflow(&["a"]));
        run.start_job("a", Utc::now()).unwrap();
        run.finish_job("a", JobOutcome::success(""), Utc::now())
            .unwrap();

        assert_eq!(run.complete(Utc::now()).unwrap(), RunStatus::Success);
        let completed_at = run.completed_at.unwrap();
        assert!(completed_at >= run.started_at);

        assert!(matches!(
            run.complete(Utc::now()),
            Err(TransitionError::RunFinished(_))
        ));
        assert!(matches!(
            run.start_job("a", Utc::now()),
            Err(TransitionError::RunFinished(_))
        ));
        assert_eq!(run.completed_at, Some(completed_at));
        assert_eq!(run.status, RunStatus::Success);
    }

    #[test]
    fn test_record_snapshot_is_independent() {
        let record = RunRecord::new(WorkflowRun::new(&workflow(&["a"])));
        let mut snapshot = record.snapshot();
        snapshot.status = RunStatus::Failed;
        snapshot.jobs.clear();

        let fresh = record.snapshot();
        assert_eq!(fresh.status, RunStatus::Running);
        assert_eq!(fresh.jobs.len(), 1);
    }

    #[test]
    fn test_record_mutation_is_all_or_nothing() {
        let record = RunRecord::new(WorkflowRun::new(&workflow(&["a"])));

        let result = record.mutate(|run| {
            run.status = RunStatus::Failed;
            run.start_job("missing", Utc::now())
        });
        assert!(result.is_err());
        assert_eq!(record.snapshot().status, RunStatus::Running);
    }

    #[test]
    fn test_record_rejects_changes_after_completion() {
        let record = RunRecord::new(WorkflowRun::new(&workflow(&["a"])));
        record.mutate(|run| run.complete(Utc::now())).unwrap();
        assert!(record.is_finished());

        let stale = record.snapshot();
        assert!(matches!(
            record.mutate(|run| run.start_job("a", Utc::now())),
            Err(TransitionError::RunFinished(_))
        ));
        assert!(matches!(
            record.replace(stale),
            Err(TransitionError::RunFinished(_))
        ));
    }

    #[test]
    fn test_record_replace_checks_id() {
        let wf = workflow(&["a"]);
        let record = RunRecord::new(WorkflowRun::new(&wf));
        let other = WorkflowRun::new(&wf);

        assert!(matches!(
            record.replace(other),
            Err(TransitionError::IdMismatch { .. })
        ));
    }

    #[test]
    fn test_record_keeps_workflow_name() {
        let record = RunRecord::new(WorkflowRun::new(&workflow(&["a"])));

        let mut renamed = record.snapshot();
        renamed.workflow_name = "elsewhere".to_string();
        assert!(matches!(
            record.replace(renamed),
            Err(TransitionError::WorkflowMismatch { expected, found, .. })
                if expected == "demo" && found == "elsewhere"
        ));

        let result = record.mutate(|run| {
            run.workflow_name = "elsewhere".to_string();
            Ok(())
        });
        assert!(matches!(result, Err(TransitionError::WorkflowMismatch { .. })));
        assert_eq!(record.snapshot().workflow_name, "demo");
        assert_eq!(record.workflow_name(), "demo");
    }

    #[test]
    fn test_concurrent_snapshots_are_never_torn() {
        let wf = workflow(&["a", "b", "c", "d"]);
        let record = Arc::new(RunRecord::new(WorkflowRun::new(&wf)));

        std::thread::scope(|scope| {
            let writer = Arc::clone(&record);
            scope.spawn(move || {
                for name in ["a", "b", "c", "d"] {
                    writer
                        .mutate(|run| run.start_job(name, Utc::now()))
                        .unwrap();
                    writer
                        .mutate(|run| run.finish_job(name, JobOutcome::success(name), Utc::now()))
                        .unwrap();
                }
                writer.mutate(|run| run.complete(Utc::now())).unwrap();
            });

            for _ in 0..4 {
                let reader = Arc::clone(&record);
                scope.spawn(move || {
                    for _ in 0..500 {
                        let snapshot = reader.snapshot();
                        assert_eq!(snapshot.jobs.len(), snapshot.job_order.len());
                        let running = snapshot
                            .jobs
                            .values()
                            .filter(|job| job.status == JobStatus::Running)
                            .count();
                        assert!(running <= 1);
                    }
                });
            }
        });

        assert_eq!(record.snapshot().status, RunStatus::Success);
    }
}
