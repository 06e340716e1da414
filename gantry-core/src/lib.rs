//! Gantry Core
//!
//! Core types for the Gantry workflow runner.
//!
//! This crate contains:
//! - Domain types: workflows, jobs, steps and the run state machine
//! - The workflow document parser and validator
//! - DTOs returned to observers

pub mod domain;
pub mod dto;
pub mod parser;
