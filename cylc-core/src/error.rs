//! Typed library errors for the scheduler kernel. Callers outside this
//! crate (the CLI binary, tests) wrap these in `eyre::Result` with
//! `.wrap_err(...)` for display; within the kernel, components propagate
//! these concrete types so retry/backoff logic can match on variant.

use thiserror::Error;

/// Bad graph, bad cycle point, invalid directive, or unknown broadcast namespace.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("graph parse error: {0}")]
    Graph(#[from] GraphParseError),

    #[error("time syntax error: {0}")]
    Time(#[from] TimeSyntaxError),

    #[error("unknown batch system: {0}")]
    UnknownBatchSystem(String),

    #[error("unknown namespace in broadcast: {0}")]
    UnknownNamespace(String),

    #[error("invalid directive {key}: {reason}")]
    InvalidDirective { key: String, reason: String },
}

/// Raised by the graph parser; carries a source location for diagnostics.
#[derive(Debug, Error)]
#[error("{message} (at column {column} of: {line:?})")]
pub struct GraphParseError {
    pub message: String,
    pub line: String,
    pub column: usize,
}

impl GraphParseError {
    pub fn new(message: impl Into<String>, line: impl Into<String>, column: usize) -> Self {
        Self {
            message: message.into(),
            line: line.into(),
            column,
        }
    }
}

/// Raised parsing a cycle point or ISO-8601 recurrence string.
#[derive(Debug, Error)]
#[error("invalid time syntax {input:?}: {reason}")]
pub struct TimeSyntaxError {
    pub input: String,
    pub reason: String,
}

impl TimeSyntaxError {
    pub fn new(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

/// A command was rejected because the scheduler is shutting down.
/// Non-fatal to the caller; fatal to the rejected command.
#[derive(Debug, Error)]
#[error("scheduler is stopping: {0} was rejected")]
pub struct SchedulerStopping(pub String);

/// A batch-system adapter invocation failed, or returned non-zero without a usable job id.
#[derive(Debug, Error)]
pub enum JobSubmitError {
    #[error("submit command exited with status {status}: {stderr}")]
    NonZeroExit { status: i32, stderr: String },

    #[error("could not parse job id from submit output: {0:?}")]
    UnparseableId(String),

    #[error("remote init failed for {0}: {1}")]
    RemoteInitFailed(String, #[source] RemoteInitError),

    #[error("io error launching submit command: {0}")]
    Io(#[from] std::io::Error),
}

/// A batch-system poll invocation failed. Logged; the next poll is
/// simply rescheduled. Never itself a task failure.
#[derive(Debug, Error)]
pub enum JobPollError {
    #[error("poll command exited with status {status}: {stderr}")]
    NonZeroExit { status: i32, stderr: String },

    #[error("io error launching poll command: {0}")]
    Io(#[from] std::io::Error),
}

/// Remote `(host, user)` initialization failed. Sticky until explicitly
/// cleared; tasks targeting that remote fail-fast submit in the meantime.
#[derive(Debug, Error, Clone)]
pub enum RemoteInitError {
    #[error("could not resolve host value {0:?}")]
    HostResolution(String),

    #[error("tar stream to {host} failed: {reason}")]
    StreamFailed { host: String, reason: String },

    #[error("remote tidy exceeded its budget for {0}")]
    TidyTimedOut(String),
}

/// A submitted command exceeded its timeout budget.
#[derive(Debug, Error)]
#[error("command {command:?} exceeded its {limit_secs}s budget")]
pub struct TimeoutError {
    pub command: String,
    pub limit_secs: u64,
}

/// A state transition was requested that the proxy FSM forbids. Fatal:
/// the workflow process should terminate with diagnostic output.
#[derive(Debug, Error)]
#[error("illegal transition for {task_id}: {from:?} -> {event} is not permitted")]
pub struct InternalInvariantError {
    pub task_id: String,
    pub from: crate::proxy::TaskStatus,
    pub event: String,
}
