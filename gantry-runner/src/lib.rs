//! Gantry runner
//!
//! The contract a job runs against ([`ExecutionBackend`]) and its container
//! implementation ([`ContainerBackend`]).

pub mod backend;
pub mod config;
pub mod podman;
pub mod script;

pub use backend::{ExecutionBackend, ExecutionContext, ExecutionError, Phase};
pub use config::ContainerConfig;
pub use podman::{ContainerBackend, check_runtime_available};
