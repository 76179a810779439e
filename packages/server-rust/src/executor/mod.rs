//! Executor tracking for running tasks and requests.
//!
//! - `registry`: per-process id -> executor table with RAII registration
//! - `command`: routing terminate/cancel/stack commands to a live executor
//! - `recovery`: once-per-process termination of orphaned work items
//! - `runner`: runs a claimed work item under tracking

pub mod command;
pub mod recovery;
pub mod registry;
pub mod runner;

pub use command::{
    deliver, CommandOutcome, CommandReply, CooperativeHandle, ExecutorCommand, ExecutorHandle,
};
pub use recovery::OrphanSweep;
pub use registry::{ExecutorInfo, ExecutorRegistration, ExecutorRegistry, RegistryError};
pub use runner::{run_tracked, LoggingRunner, RunOutcome, WorkRunner};
