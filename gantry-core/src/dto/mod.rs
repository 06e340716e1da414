//! Data Transfer Objects
//!
//! Lightweight shapes returned to observers of the orchestrator that are not
//! domain entities themselves.

pub mod workflow;
