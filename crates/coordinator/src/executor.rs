//! Remote executor used by the service when no worker connections exist

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use dist_core::{Node, RemoteError, RemoteExecutor, WorkerCommand};

/// Logs every command instead of sending it and reports success
#[derive(Debug, Default)]
pub struct LoggingExecutor {
    delivered: AtomicU64,
}

impl LoggingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commands handled so far
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

impl RemoteExecutor for LoggingExecutor {
    fn execute(&self, node: &Node, command: &WorkerCommand) -> Result<(), RemoteError> {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        if command.is_metadata() {
            debug!("[{}] {}", node.address(), command.to_sql());
        } else {
            info!("[{}] {}", node.address(), command.to_sql());
        }
        Ok(())
    }
}
