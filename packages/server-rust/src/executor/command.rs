//! Out-of-band commands aimed at a single running work item.
//!
//! Admin surfaces resolve a work-item id through the [`ExecutorRegistry`] and
//! hand the command to the registered [`ExecutorHandle`]. Handles only signal
//! intent; a running executor observes its token and exits on its own.

use std::fmt;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::registry::ExecutorRegistry;

/// Command deliverable to a running executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorCommand {
    /// Ask the executor to stop and mark its work item terminated.
    Terminate,
    /// Ask the executor to abandon its current unit of work.
    Cancel,
    /// Report what the executor is doing.
    Stack,
}

/// Reply produced by an executor handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    Acknowledged,
    Stack(String),
}

/// Capability to signal a live executor.
pub trait ExecutorHandle: Send + Sync {
    /// Request termination. Returns `false` if termination was already requested.
    fn terminate(&self) -> bool;

    /// Deliver a command.
    ///
    /// # Errors
    ///
    /// Returns an error if the executor cannot service the command.
    fn command(&self, command: ExecutorCommand) -> anyhow::Result<CommandReply>;
}

// ---------------------------------------------------------------------------
// CooperativeHandle
// ---------------------------------------------------------------------------

/// `ExecutorHandle` backed by a cancellation token the executor polls.
#[derive(Debug, Clone)]
pub struct CooperativeHandle {
    token: CancellationToken,
    started: Instant,
}

impl CooperativeHandle {
    #[must_use]
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            started: Instant::now(),
        }
    }

    /// The token the executor should observe.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl ExecutorHandle for CooperativeHandle {
    fn terminate(&self) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.token.cancel();
        true
    }

    fn command(&self, command: ExecutorCommand) -> anyhow::Result<CommandReply> {
        match command {
            ExecutorCommand::Terminate | ExecutorCommand::Cancel => {
                self.terminate();
                Ok(CommandReply::Acknowledged)
            }
            ExecutorCommand::Stack => Ok(CommandReply::Stack(format!(
                "running for {}ms, cancellation requested: {}",
                self.elapsed().as_millis(),
                self.token.is_cancelled()
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// Result of routing a command to a work item on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The executor is live here and answered.
    Delivered { thread_name: String, reply: CommandReply },
    /// No executor for the id is registered on this host.
    NotRunningHere,
    /// The executor is live here but rejected the command.
    Failed(String),
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delivered { thread_name, reply } => {
                write!(f, "delivered to thread {thread_name}: {reply:?}")
            }
            Self::NotRunningHere => f.write_str("not running on this host"),
            Self::Failed(reason) => write!(f, "command failed: {reason}"),
        }
    }
}

/// Routes `command` to the executor registered for `id`, if any.
pub fn deliver(registry: &ExecutorRegistry, id: &str, command: ExecutorCommand) -> CommandOutcome {
    let Some(info) = registry.get(id) else {
        tracing::debug!(id, ?command, "no executor registered for work item");
        return CommandOutcome::NotRunningHere;
    };

    match info.handle.command(command) {
        Ok(reply) => {
            tracing::info!(id, owner = %info.owner, ?command, "delivered executor command");
            CommandOutcome::Delivered {
                thread_name: info.thread_name,
                reply,
            }
        }
        Err(e) => {
            tracing::warn!(id, owner = %info.owner, ?command, error = %e, "executor rejected command");
            CommandOutcome::Failed(e.to_string())
        }
    }
}
