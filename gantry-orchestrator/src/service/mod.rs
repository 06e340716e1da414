//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services sit between the API handlers and the [`Store`](crate::repository::Store).

pub mod run;
pub mod workflow;

pub use run::{RunService, RunServiceError};
pub use workflow::{WorkflowService, WorkflowServiceError};
