//! Execution backend contract
//!
//! The orchestrator hands one job at a time to an [`ExecutionBackend`] and
//! gets back the captured output, or an [`ExecutionError`] that still carries
//! whatever output was captured before the failure.

use async_trait::async_trait;
use gantry_core::domain::job::Job;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Service trait for running a job's script in an isolated sandbox
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Runs every step of `job` as one script and returns its combined output
    ///
    /// # Arguments
    /// * `job_name` - Name of the job within its run
    /// * `job` - Job definition (target label and steps)
    /// * `ctx` - Cancellation and deadline for this run
    async fn execute(
        &self,
        job_name: &str,
        job: &Job,
        ctx: &ExecutionContext,
    ) -> Result<String, ExecutionError>;
}

/// Per-run execution context
///
/// Independent from whatever request triggered the run: the deadline is the
/// long upper bound for the whole run and the token is cancelled only on
/// shutdown.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub run_id: String,
    pub cancel: CancellationToken,
    pub deadline: Instant,
}

impl ExecutionContext {
    pub fn new(run_id: impl Into<String>, cancel: CancellationToken, timeout: Duration) -> Self {
        Self {
            run_id: run_id.into(),
            cancel,
            deadline: Instant::now() + timeout,
        }
    }

    /// Time left before the run deadline
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Sandbox sub-operation, each bounded by its own timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pull,
    Create,
    Start,
    Wait,
    Logs,
    Remove,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Pull => write!(f, "image pull"),
            Phase::Create => write!(f, "container create"),
            Phase::Start => write!(f, "container start"),
            Phase::Wait => write!(f, "container wait"),
            Phase::Logs => write!(f, "log collection"),
            Phase::Remove => write!(f, "container removal"),
        }
    }
}

/// A job did not complete successfully
///
/// Every variant keeps the output captured so far; it is empty when the
/// failure happened before the script started.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("{phase} failed: {message}")]
    Sandbox {
        phase: Phase,
        message: String,
        output: String,
    },

    #[error("{phase} timed out after {}s", .limit.as_secs())]
    Timeout {
        phase: Phase,
        limit: Duration,
        output: String,
    },

    #[error("script exited with status {exit_code}")]
    NonZeroExit { exit_code: i64, output: String },

    #[error("job cancelled during {phase}")]
    Cancelled { phase: Phase, output: String },
}

impl ExecutionError {
    pub fn sandbox(phase: Phase, message: impl Into<String>) -> Self {
        ExecutionError::Sandbox {
            phase,
            message: message.into(),
            output: String::new(),
        }
    }

    /// Output captured before the failure
    pub fn output(&self) -> &str {
        match self {
            ExecutionError::Sandbox { output, .. }
            | ExecutionError::Timeout { output, .. }
            | ExecutionError::NonZeroExit { output, .. }
            | ExecutionError::Cancelled { output, .. } => output,
        }
    }

    /// Attaches output collected after the failure was detected
    pub fn with_output(mut self, captured: String) -> Self {
        match &mut self {
            ExecutionError::Sandbox { output, .. }
            | ExecutionError::Timeout { output, .. }
            | ExecutionError::NonZeroExit { output, .. }
            | ExecutionError::Cancelled { output, .. } => *output = captured,
        }
        self
    }
}
