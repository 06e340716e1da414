//! Core domain types
//!
//! This module contains the structures shared between the orchestrator
//! (which persists and mutates them) and the runner (which executes jobs).

pub mod job;
pub mod run;
pub mod workflow;
