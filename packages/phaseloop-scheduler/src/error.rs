use crate::phase::Phase;
use crate::task::ExecContext;

pub type Result<T> = std::result::Result<T, LoopError>;

/// Errors surfaced by the loop itself.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    /// A callback failed on the main context and no uncaught handler took it.
    #[error("uncaught error in {context}: {source}")]
    Uncaught {
        context: ExecContext,
        source: TaskError,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error("callbacks cannot be posted directly to the {0} phase")]
    UnsupportedPhase(Phase),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LoopError {
    pub fn config(msg: impl Into<String>) -> Self {
        LoopError::Config(msg.into())
    }
}

/// Error returned by a scheduled callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TaskError {
    message: String,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&str> for TaskError {
    fn from(message: &str) -> Self {
        TaskError::new(message)
    }
}

impl From<String> for TaskError {
    fn from(message: String) -> Self {
        TaskError::new(message)
    }
}

impl From<std::io::Error> for TaskError {
    fn from(err: std::io::Error) -> Self {
        TaskError::new(err.to_string())
    }
}

impl From<JobError> for TaskError {
    fn from(err: JobError) -> Self {
        TaskError::new(err.to_string())
    }
}

/// Failure of a pool job. Delivered to the job's completion, never raised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("job failed: {0}")]
    Failed(String),

    #[error("job panicked: {0}")]
    Panicked(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("job produced an unexpected output type")]
    OutputMismatch,
}

impl JobError {
    pub fn failed(msg: impl Into<String>) -> Self {
        JobError::Failed(msg.into())
    }
}

impl From<std::io::Error> for JobError {
    fn from(err: std::io::Error) -> Self {
        JobError::Io(err.to_string())
    }
}
