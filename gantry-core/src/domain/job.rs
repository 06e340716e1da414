//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named unit of sequential steps executed as one script in one sandbox
///
/// The same structure is used for the definition stored with a workflow
/// (execution fields left at their defaults) and for the snapshot a run
/// mutates while it executes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Sandbox environment label, e.g. `ubuntu` or `alpine`
    #[serde(default, alias = "runs-on", alias = "runs_on")]
    pub target: String,

    #[serde(default)]
    pub steps: Vec<Step>,

    #[serde(default)]
    pub status: JobStatus,

    /// Combined stdout/stderr captured from the sandbox
    #[serde(default)]
    pub output: String,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a pending job definition
    pub fn new(target: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            target: target.into(),
            steps,
            status: JobStatus::Pending,
            output: String::new(),
            started_at: None,
            ended_at: None,
        }
    }

    /// Returns a copy of the definition with all execution fields cleared
    pub fn pending(&self) -> Self {
        Self::new(self.target.clone(), self.steps.clone())
    }
}

/// A single named shell command within a job's script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub run: String,
}

impl Step {
    pub fn new(name: impl Into<String>, run: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            run: run.into(),
        }
    }
}

/// Job execution status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Success => write!(f, "success"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// What the execution backend reported for one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub output: String,
    pub succeeded: bool,
}

impl JobOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            succeeded: true,
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            succeeded: false,
        }
    }
}
