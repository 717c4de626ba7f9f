//! Job: one external execution attempt, and its polling schedule.

use crate::cycling::Duration;

/// One external execution attempt for a task proxy.
#[derive(Debug, Clone)]
pub struct Job {
    pub task_id: String,
    pub submit_num: u32,
    pub script_path: String,
    pub remote_host: Option<String>,
    pub remote_user: Option<String>,
    pub batch_system: String,
    pub submit_method_id: Option<String>,
    pub submitted_time: Option<i64>,
    pub started_time: Option<i64>,
    pub finished_time: Option<i64>,
    pub exit_status: Option<i32>,
    pub stdout_tail: String,
    pub stderr_tail: String,
}

impl Job {
    pub fn new(task_id: impl Into<String>, submit_num: u32, script_path: impl Into<String>, batch_system: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            submit_num,
            script_path: script_path.into(),
            remote_host: None,
            remote_user: None,
            batch_system: batch_system.into(),
            submit_method_id: None,
            submitted_time: None,
            started_time: None,
            finished_time: None,
            exit_status: None,
            stdout_tail: String::new(),
            stderr_tail: String::new(),
        }
    }
}

/// Whether an interval is measured strictly from submission, or as a delay
/// chained after the previous poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalKind {
    Strict,
    DelayAfterPrevious,
}

/// Per-job polling schedule, derived from global and per-task polling
/// interval lists.
#[derive(Debug, Clone)]
pub struct PollingSchedule {
    intervals: Vec<(Duration, IntervalKind)>,
    cursor: usize,
}

impl PollingSchedule {
    pub fn new(intervals: Vec<(Duration, IntervalKind)>) -> Self {
        Self { intervals, cursor: 0 }
    }

    /// The delay before the next poll, consuming one entry from the
    /// schedule (the last entry repeats once exhausted).
    pub fn next_delay(&mut self) -> Duration {
        let idx = self.cursor.min(self.intervals.len().saturating_sub(1));
        let (delay, _) = self.intervals.get(idx).copied().unwrap_or((Duration::from_days(0), IntervalKind::Strict));
        if self.cursor < self.intervals.len() {
            self.cursor += 1;
        }
        delay
    }
}
