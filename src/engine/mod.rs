// src/engine/mod.rs

//! Orchestration engine for bddrun.
//!
//! This module ties together:
//! - request validation and feature selection ([`plan`])
//! - the execution registry of in-flight processes ([`registry`])
//! - the orchestrator entry points `start` / `cancel` / `status`
//!   ([`orchestrator`])
//! - the per-run task with its heartbeat and watchdog ([`run`])
//!
//! Planning is pure and synchronous; everything that touches a process
//! lives in `orchestrator` and `run`.

pub mod ids;
pub mod orchestrator;
pub mod plan;
pub mod registry;
pub mod run;

pub use ids::{ExecutionIdGenerator, ID_PREFIX};
pub use orchestrator::{Collaborators, Orchestrator, RunSettings, RunTicket};
pub use plan::{Plan, RunRequest, Selection};
pub use registry::{ExecutionRegistry, RunningSnapshot, Termination, TerminationFlag};
