//! Error types for the thread tree and task layer.

use thiserror::Error;

/// Errors raised by thread management and tasks.
#[derive(Debug, Error)]
pub enum ThreadError {
    /// The OS refused to spawn a worker thread.
    #[error("failed to spawn thread '{name}': {source}")]
    Spawn {
        /// Name of the thread.
        name: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A started thread did not reach its first barrier in time.
    #[error("thread '{0}' did not report its first tic")]
    StartTimeout(String),

    /// The node belongs to a different tree than its would-be parent.
    #[error("thread '{0}' belongs to another tree")]
    ForeignTree(String),

    /// The node is not a child of the given parent.
    #[error("thread '{child}' is not a child of '{parent}'")]
    NotAChild {
        /// Parent name.
        parent: String,
        /// Child name.
        child: String,
    },

    /// A task failed while mutating the graph.
    #[error("task '{task}' failed: {source}")]
    Task {
        /// Task name.
        task: String,
        /// Underlying graph error.
        #[source]
        source: cadence_core::Error,
    },

    /// A graph operation failed.
    #[error(transparent)]
    Core(#[from] cadence_core::Error),
}

impl ThreadError {
    /// Create a spawn error.
    pub fn spawn(name: impl Into<String>, source: std::io::Error) -> Self {
        ThreadError::Spawn {
            name: name.into(),
            source,
        }
    }

    /// Create a task error.
    pub fn task(task: impl Into<String>, source: cadence_core::Error) -> Self {
        ThreadError::Task {
            task: task.into(),
            source,
        }
    }
}

/// Result type for thread operations.
pub type Result<T> = std::result::Result<T, ThreadError>;
