//! TaskProxy: a mutable per-(name, cycle-point) instance and its finite
//! state machine, per spec §4.2.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cycling::{AtomicPrereq, CyclePoint, Expr, Trigger};
use crate::error::InternalInvariantError;

/// A proxy's lifecycle state. Stringified only at serialization/log
/// boundaries (spec §9: "tagged string states... encode as a sum type").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Waiting,
    Held,
    Queued,
    Ready,
    Submitted,
    SubmitFailed,
    SubmitRetrying,
    Running,
    Succeeded,
    Failed,
    Retrying,
    Expired,
    Runahead,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::SubmitFailed | TaskStatus::Expired)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Ready | TaskStatus::Submitted | TaskStatus::Running)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Waiting => "waiting",
            TaskStatus::Held => "held",
            TaskStatus::Queued => "queued",
            TaskStatus::Ready => "ready",
            TaskStatus::Submitted => "submitted",
            TaskStatus::SubmitFailed => "submit-failed",
            TaskStatus::SubmitRetrying => "submit-retrying",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Retrying => "retrying",
            TaskStatus::Expired => "expired",
            TaskStatus::Runahead => "runahead",
        };
        write!(f, "{s}")
    }
}

/// Events that drive the state machine. Unifies the source's scattered
/// callbacks (timers, task messages, commands) under one enum, per §9.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Hold,
    Release,
    PrereqsSatisfied,
    ExpireTimePassed,
    QueueReleases,
    SubmissionBegins,
    SubmitFailed { retries_remaining: bool },
    SubmissionTimeout,
    Started,
    Succeeded,
    Failed { retries_remaining: bool },
    ExecutionTimeout,
    Vacated,
    RetryDelayElapsed,
    ManualTrigger,
}

/// One output's emission state.
#[derive(Debug, Clone, Default)]
pub struct OutputTable {
    emitted: HashSet<String>,
}

impl OutputTable {
    pub fn mark_emitted(&mut self, message: &str) {
        self.emitted.insert(message.to_string());
    }

    pub fn is_emitted(&self, message: &str) -> bool {
        self.emitted.contains(message)
    }

    pub fn emitted(&self) -> impl Iterator<Item = &String> {
        self.emitted.iter()
    }
}

/// The last job's summary fields, supplemented from `task_proxy.py`'s
/// fuller attribute set (see SPEC_FULL.md §3).
#[derive(Debug, Clone, Default)]
pub struct JobSummary {
    pub host: Option<String>,
    pub batch_sys_name: Option<String>,
    pub submit_method_id: Option<String>,
    pub submitted_time: Option<i64>,
    pub started_time: Option<i64>,
    pub finished_time: Option<i64>,
    pub execution_time_limit: Option<crate::cycling::Duration>,
    pub logfiles: Vec<String>,
    pub latest_message: Option<String>,
}

/// A mutable per-(name, cycle-point) task instance.
#[derive(Debug, Clone)]
pub struct TaskProxy {
    pub name: String,
    pub cycle_point: CyclePoint,
    pub status: TaskStatus,
    pub prerequisite_clauses: Vec<Expr>,
    satisfied_atoms: HashSet<(String, String)>,
    pub outputs: OutputTable,
    pub submit_num: u32,
    pub try_num: u32,
    pub late_time: Option<i64>,
    pub clock_trigger_time: Option<i64>,
    pub job_summary: JobSummary,
    pub has_spawned: bool,
    pub manual_trigger: bool,
    pub is_manual_submit: bool,
    pub job_vacated: bool,
    pub non_unique_events: std::collections::HashMap<String, u32>,
}

impl TaskProxy {
    pub fn new(name: impl Into<String>, cycle_point: CyclePoint, prerequisite_clauses: Vec<Expr>) -> Self {
        Self {
            name: name.into(),
            cycle_point,
            status: TaskStatus::Waiting,
            prerequisite_clauses,
            satisfied_atoms: HashSet::new(),
            outputs: OutputTable::default(),
            submit_num: 0,
            try_num: 0,
            late_time: None,
            clock_trigger_time: None,
            job_summary: JobSummary::default(),
            has_spawned: false,
            manual_trigger: false,
            is_manual_submit: false,
            job_vacated: false,
            non_unique_events: std::collections::HashMap::new(),
        }
    }

    pub fn id(&self) -> String {
        format!("{}.{}", self.name, self.cycle_point)
    }

    /// Flip an atomic prerequisite satisfied, keyed by the upstream task's
    /// same-cycle output message (cross-cycle offset triggers are resolved
    /// by the task pool before calling this, by passing the already-offset
    /// upstream name).
    pub fn satisfy_atom(&mut self, upstream_name: &str, message: &str) {
        self.satisfied_atoms.insert((upstream_name.to_string(), message.to_string()));
    }

    fn atom_satisfied(&self, atom: &AtomicPrereq) -> bool {
        self.satisfied_atoms
            .contains(&(atom.upstream_name.clone(), atom.trigger.output_message().to_string()))
    }

    fn expr_satisfied(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Atom(a) => self.atom_satisfied(a),
            Expr::And(parts) => parts.iter().all(|p| self.expr_satisfied(p)),
            Expr::Or(parts) => parts.iter().any(|p| self.expr_satisfied(p)),
        }
    }

    /// All prerequisite clauses satisfied (clauses are ANDed together).
    pub fn prereqs_satisfied(&self) -> bool {
        self.prerequisite_clauses.iter().all(|c| self.expr_satisfied(c))
    }

    /// `ready_to_run(now)` per spec §4.2.
    pub fn ready_to_run(&self, now: i64, waiting_on_retry_timer: bool) -> bool {
        if self.manual_trigger {
            return true;
        }
        self.status == TaskStatus::Waiting
            && self.prereqs_satisfied()
            && self.clock_trigger_time.map(|t| t <= now).unwrap_or(true)
            && !waiting_on_retry_timer
    }

    /// Every atomic prerequisite referenced anywhere in this proxy's clauses.
    pub fn atomic_prereqs(&self) -> Vec<&AtomicPrereq> {
        fn walk<'a>(expr: &'a Expr, out: &mut Vec<&'a AtomicPrereq>) {
            match expr {
                Expr::Atom(a) => out.push(a),
                Expr::And(parts) | Expr::Or(parts) => parts.iter().for_each(|p| walk(p, out)),
            }
        }
        let mut out = Vec::new();
        self.prerequisite_clauses.iter().for_each(|c| walk(c, &mut out));
        out
    }

    /// Apply a state-machine transition. Returns [`InternalInvariantError`]
    /// if `event` is not legal from the current state (§4.2's table; this
    /// error is fatal to the workflow process per §7).
    pub fn apply(&mut self, event: TaskEvent) -> Result<(), InternalInvariantError> {
        use TaskStatus::*;
        let next = match (self.status, &event) {
            (Waiting, TaskEvent::PrereqsSatisfied) => Ready,
            (Waiting, TaskEvent::Hold) => Held,
            (Waiting, TaskEvent::ExpireTimePassed) => Expired,
            (Held, TaskEvent::Release) => Waiting,
            (Queued, TaskEvent::QueueReleases) => Ready,
            (Ready, TaskEvent::SubmissionBegins) => {
                self.submit_num += 1;
                Submitted
            }
            (Submitted, TaskEvent::SubmitFailed { retries_remaining: true }) => SubmitRetrying,
            (Submitted, TaskEvent::SubmitFailed { retries_remaining: false }) => SubmitFailed,
            (Submitted, TaskEvent::Started) => Running,
            (Submitted, TaskEvent::SubmissionTimeout) => SubmitFailed,
            (SubmitRetrying, TaskEvent::RetryDelayElapsed) => Waiting,
            (Running, TaskEvent::Succeeded) => Succeeded,
            (Running, TaskEvent::Failed { retries_remaining: true }) => Retrying,
            (Running, TaskEvent::Failed { retries_remaining: false }) => Failed,
            (Running, TaskEvent::ExecutionTimeout) => Failed,
            (Running, TaskEvent::Vacated) => {
                self.job_vacated = true;
                Submitted
            }
            (Retrying, TaskEvent::RetryDelayElapsed) => Waiting,
            (_, TaskEvent::ManualTrigger) => {
                self.manual_trigger = true;
                self.status
            }
            (current, event) => {
                return Err(InternalInvariantError {
                    task_id: self.id(),
                    from: current,
                    event: format!("{event:?}"),
                })
            }
        };
        self.status = next;
        Ok(())
    }

    /// Record a task message against the known outputs; custom messages
    /// not in `known_outputs` are accepted for observability but never
    /// satisfy prerequisites (§4.2).
    pub fn record_message(&mut self, message: &str, known_outputs: &[String]) {
        self.job_summary.latest_message = Some(message.to_string());
        if known_outputs.iter().any(|m| m == message) {
            self.outputs.mark_emitted(message);
        } else {
            *self.non_unique_events.entry(message.to_string()).or_insert(0) += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycling::Calendar;

    fn point() -> CyclePoint {
        CyclePoint::parse("20200101T0000Z", Calendar::Gregorian).unwrap()
    }

    #[test]
    fn scenario_linear_two_task_graph() {
        let clause = Expr::Atom(AtomicPrereq {
            upstream_name: "a".to_string(),
            trigger: Trigger::Default,
        });
        let mut b = TaskProxy::new("b", point(), vec![clause]);
        assert!(!b.prereqs_satisfied());
        b.satisfy_atom("a", "succeeded");
        assert!(b.prereqs_satisfied());
        b.apply(TaskEvent::PrereqsSatisfied).unwrap();
        assert_eq!(b.status, TaskStatus::Ready);
        b.apply(TaskEvent::SubmissionBegins).unwrap();
        assert_eq!(b.status, TaskStatus::Submitted);
        assert_eq!(b.submit_num, 1);
    }

    #[test]
    fn scenario_fan_in_family_any_needs_only_one_member() {
        let clause = Expr::Or(vec![
            Expr::Atom(AtomicPrereq {
                upstream_name: "m1".to_string(),
                trigger: Trigger::Succeed,
            }),
            Expr::Atom(AtomicPrereq {
                upstream_name: "m2".to_string(),
                trigger: Trigger::Succeed,
            }),
        ]);
        let mut post = TaskProxy::new("post", point(), vec![clause]);
        post.satisfy_atom("m1", "succeeded");
        assert!(post.prereqs_satisfied());
    }

    #[test]
    fn scenario_submit_retry_sequence() {
        let mut t = TaskProxy::new("t", point(), vec![]);
        t.apply(TaskEvent::PrereqsSatisfied).unwrap();
        t.apply(TaskEvent::SubmissionBegins).unwrap();
        t.apply(TaskEvent::SubmitFailed { retries_remaining: true }).unwrap();
        assert_eq!(t.status, TaskStatus::SubmitRetrying);
        t.apply(TaskEvent::RetryDelayElapsed).unwrap();
        assert_eq!(t.status, TaskStatus::Waiting);
        t.apply(TaskEvent::PrereqsSatisfied).unwrap();
        t.apply(TaskEvent::SubmissionBegins).unwrap();
        t.apply(TaskEvent::SubmitFailed { retries_remaining: false }).unwrap();
        assert_eq!(t.status, TaskStatus::SubmitFailed);
        assert!(t.status.is_terminal());
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let mut t = TaskProxy::new("t", point(), vec![]);
        let err = t.apply(TaskEvent::Started).unwrap_err();
        assert_eq!(err.from, TaskStatus::Waiting);
    }

    #[test]
    fn vacated_resets_to_submitted_and_sets_flag() {
        let mut t = TaskProxy::new("t", point(), vec![]);
        t.apply(TaskEvent::PrereqsSatisfied).unwrap();
        t.apply(TaskEvent::SubmissionBegins).unwrap();
        t.apply(TaskEvent::Started).unwrap();
        t.apply(TaskEvent::Vacated).unwrap();
        assert_eq!(t.status, TaskStatus::Submitted);
        assert!(t.job_vacated);
    }

    #[test]
    fn unknown_custom_message_is_observed_but_does_not_satisfy_prereqs() {
        let clause = Expr::Atom(AtomicPrereq {
            upstream_name: "a".to_string(),
            trigger: Trigger::Custom("half_done".to_string()),
        });
        let mut b = TaskProxy::new("b", point(), vec![clause]);
        let mut upstream = TaskProxy::new("a", point(), vec![]);
        upstream.record_message("unexpected_chatter", &["succeeded".to_string()]);
        assert_eq!(upstream.non_unique_events.get("unexpected_chatter"), Some(&1));
        assert!(!b.prereqs_satisfied());
    }
}
