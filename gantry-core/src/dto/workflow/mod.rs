//! Workflow DTOs

use serde::{Deserialize, Serialize};

use crate::domain::run::{RunStatus, WorkflowRun};

/// Acknowledgement returned after a workflow definition is stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowUploaded {
    pub message: String,
    pub name: String,
}

impl WorkflowUploaded {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            message: "Workflow uploaded successfully".to_string(),
            name: name.into(),
        }
    }
}

/// Aggregated run history of one workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStats {
    pub total_runs: usize,
    pub successful_runs: usize,
    pub failed_runs: usize,
    /// Mean wall-clock duration of completed runs
    pub average_duration_secs: f64,
    /// Percentage of successful runs, absent when there are no runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_rate: Option<f64>,
}

impl WorkflowStats {
    pub fn from_runs<'a>(runs: impl IntoIterator<Item = &'a WorkflowRun>) -> Self {
        let mut total_runs = 0;
        let mut successful_runs = 0;
        let mut failed_runs = 0;
        let mut completed = 0u32;
        let mut total_millis = 0i64;

        for run in runs {
            total_runs += 1;
            match run.status {
                RunStatus::Success => successful_runs += 1,
                RunStatus::Failed => failed_runs += 1,
                RunStatus::Pending | RunStatus::Running => {}
            }
            if let Some(duration) = run.duration() {
                completed += 1;
                total_millis += duration.num_milliseconds();
            }
        }

        let average_duration_secs = if completed == 0 {
            0.0
        } else {
            total_millis as f64 / 1000.0 / f64::from(completed)
        };

        let success_rate = (total_runs > 0)
            .then(|| successful_runs as f64 / total_runs as f64 * 100.0);

        Self {
            total_runs,
            successful_runs,
            failed_runs,
            average_duration_secs,
            success_rate,
        }
    }
}
