//! Gantry orchestrator
//!
//! Stores workflows, triggers runs and drives them through an
//! [`ExecutionBackend`](gantry_runner::ExecutionBackend), exposing both over HTTP.

pub mod api;
pub mod config;
pub mod db;
pub mod repository;
pub mod service;
