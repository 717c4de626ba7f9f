//! The task pool: owns every [`TaskProxy`], runs dependency negotiation,
//! gates spawning by the runahead window, and releases ready tasks through
//! named queues. Grounded on spec §4.3; the pool is the single owner of
//! proxy state (§5 "shared resources"), mutated only through its own methods.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, warn};

use crate::cycling::CyclePoint;
use crate::pool::queue::{NamedQueue, DEFAULT_QUEUE};
use crate::proxy::{TaskEvent, TaskProxy, TaskStatus};
use crate::taskdef::TaskDefinition;

/// External stimuli the pool reacts to on a tick: task messages, operator
/// commands, and timer firings, per §9's "coroutine-ish event callbacks...
/// unify under a typed event enum."
#[derive(Debug, Clone)]
pub enum PoolEvent {
    TaskMessage { name: String, cycle_point: CyclePoint, message: String },
    Hold { name: String, cycle_point: CyclePoint },
    Release { name: String, cycle_point: CyclePoint },
    ManualTrigger { name: String, cycle_point: CyclePoint },
    SubmitFailed { name: String, cycle_point: CyclePoint, retries_remaining: bool },
    SubmissionTimeout { name: String, cycle_point: CyclePoint },
    ExecutionTimeout { name: String, cycle_point: CyclePoint },
    Vacated { name: String, cycle_point: CyclePoint },
    RetryDelayElapsed { name: String, cycle_point: CyclePoint },
}

/// A task the pool has admitted through its queue and is ready to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyTask {
    pub name: String,
    pub cycle_point: CyclePoint,
}

type ProxyKey = (String, CyclePoint);

pub struct TaskPool {
    definitions: HashMap<String, TaskDefinition>,
    proxies: HashMap<ProxyKey, TaskProxy>,
    queues: HashMap<String, NamedQueue>,
    task_queue_assignment: HashMap<String, String>,
    max_active_cycle_points: u32,
}

impl TaskPool {
    pub fn new(definitions: HashMap<String, TaskDefinition>, max_active_cycle_points: u32, default_queue_limit: usize) -> Self {
        let mut queues = HashMap::new();
        queues.insert(DEFAULT_QUEUE.to_string(), NamedQueue::new(default_queue_limit));
        Self {
            definitions,
            proxies: HashMap::new(),
            queues,
            task_queue_assignment: HashMap::new(),
            max_active_cycle_points,
        }
    }

    pub fn add_queue(&mut self, name: impl Into<String>, limit: usize, members: &[String]) {
        let name = name.into();
        self.queues.insert(name.clone(), NamedQueue::new(limit));
        for member in members {
            self.task_queue_assignment.insert(member.clone(), name.clone());
        }
    }

    fn queue_for(&self, task_name: &str) -> &str {
        self.task_queue_assignment.get(task_name).map(String::as_str).unwrap_or(DEFAULT_QUEUE)
    }

    pub fn proxy(&self, name: &str, cycle_point: &CyclePoint) -> Option<&TaskProxy> {
        self.proxies.get(&(name.to_string(), cycle_point.clone()))
    }

    pub fn proxies(&self) -> impl Iterator<Item = &TaskProxy> {
        self.proxies.values()
    }

    fn active_cycle_points(&self) -> BTreeSet<CyclePoint> {
        self.proxies
            .values()
            .filter(|p| !p.status.is_terminal())
            .map(|p| p.cycle_point.clone())
            .collect()
    }

    /// Whether `point` is within `max_active_cycle_points` sequence steps
    /// (of `name`'s own first sequence) of the oldest currently-active
    /// point, or there is no active point yet to measure from.
    fn within_runahead(&self, name: &str, point: &CyclePoint) -> bool {
        let active = self.active_cycle_points();
        let Some(oldest) = active.iter().next() else {
            return true;
        };
        if point <= oldest {
            return true;
        }
        let Some(seq) = self.definitions.get(name).and_then(|d| d.sequences.first()) else {
            return true;
        };
        match seq.advance(oldest, self.max_active_cycle_points) {
            Some(limit) => point <= &limit,
            None => true,
        }
    }

    /// Seed a proxy for `name` at `point` if one doesn't already exist and
    /// the point is within the runahead window. Returns `false` if parked
    /// (the pool doesn't materialize a `runahead` proxy for it at all --
    /// the caller is expected to retry the spawn once the window advances).
    pub fn spawn(&mut self, name: &str, point: CyclePoint) -> bool {
        let key = (name.to_string(), point.clone());
        if self.proxies.contains_key(&key) {
            return true;
        }
        if !self.within_runahead(name, &point) {
            debug!(task = %name, cycle = %point, "task pool: parking spawn, outside runahead window");
            return false;
        }
        let Some(def) = self.definitions.get(name) else {
            warn!(task = %name, "task pool: spawn requested for unknown task definition");
            return false;
        };
        let proxy = TaskProxy::new(name, point.clone(), def.prerequisite_clauses.clone());
        self.proxies.insert(key, proxy);
        true
    }

    /// Dependency negotiation: for every non-terminal proxy's atomic
    /// prerequisites, check whether the named upstream (same cycle point --
    /// cross-cycle offsets are resolved by the caller before spawning, see
    /// `proxy.rs::satisfy_atom`) has emitted the matching output, and flip
    /// the atom satisfied.
    fn negotiate(&mut self) {
        let emitted: Vec<(String, CyclePoint, String)> = self
            .proxies
            .values()
            .flat_map(|p| p.outputs.emitted().map(move |m| (p.name.clone(), p.cycle_point.clone(), m.clone())))
            .collect();

        for proxy in self.proxies.values_mut() {
            if proxy.status != TaskStatus::Waiting {
                continue;
            }
            let cycle = proxy.cycle_point.clone();
            for (upstream_name, upstream_cycle, message) in &emitted {
                if *upstream_cycle == cycle {
                    proxy.satisfy_atom(upstream_name, message);
                }
            }
        }
    }

    /// Apply one external event to the matching proxy's FSM.
    pub fn apply_event(&mut self, event: PoolEvent) {
        match event {
            PoolEvent::TaskMessage { name, cycle_point, message } => {
                if let Some(proxy) = self.proxies.get_mut(&(name.clone(), cycle_point)) {
                    let known = self.definitions.get(&name).map(|d| d.known_outputs()).unwrap_or_default();
                    proxy.record_message(&message, &known);
                    let transition = match message.as_str() {
                        "started" => Some(TaskEvent::Started),
                        "succeeded" => Some(TaskEvent::Succeeded),
                        _ => None,
                    };
                    if let Some(event) = transition {
                        if let Err(e) = proxy.apply(event) {
                            warn!(%e, "task pool: rejected transition from task message");
                        }
                    }
                }
            }
            PoolEvent::Hold { name, cycle_point } => self.try_apply(&name, &cycle_point, TaskEvent::Hold),
            PoolEvent::Release { name, cycle_point } => self.try_apply(&name, &cycle_point, TaskEvent::Release),
            PoolEvent::ManualTrigger { name, cycle_point } => self.try_apply(&name, &cycle_point, TaskEvent::ManualTrigger),
            PoolEvent::SubmitFailed {
                name,
                cycle_point,
                retries_remaining,
            } => self.try_apply(&name, &cycle_point, TaskEvent::SubmitFailed { retries_remaining }),
            PoolEvent::SubmissionTimeout { name, cycle_point } => self.try_apply(&name, &cycle_point, TaskEvent::SubmissionTimeout),
            PoolEvent::ExecutionTimeout { name, cycle_point } => self.try_apply(&name, &cycle_point, TaskEvent::ExecutionTimeout),
            PoolEvent::Vacated { name, cycle_point } => self.try_apply(&name, &cycle_point, TaskEvent::Vacated),
            PoolEvent::RetryDelayElapsed { name, cycle_point } => self.try_apply(&name, &cycle_point, TaskEvent::RetryDelayElapsed),
        }
    }

    fn try_apply(&mut self, name: &str, cycle_point: &CyclePoint, event: TaskEvent) {
        if let Some(proxy) = self.proxies.get_mut(&(name.to_string(), cycle_point.clone())) {
            if let Err(e) = proxy.apply(event) {
                warn!(%e, "task pool: rejected transition");
            }
        }
    }

    /// One full pool tick: drain `events`, negotiate, release through
    /// queues, spawn successors for freshly-submitted proxies, reap what
    /// can be cleaned up. Returns the tasks now admitted for submission.
    pub fn tick(&mut self, events: Vec<PoolEvent>, now: i64) -> Vec<ReadyTask> {
        for event in events {
            self.apply_event(event);
        }

        self.negotiate();

        let waiting_ids: Vec<(String, CyclePoint)> = self
            .proxies
            .values()
            .filter(|p| p.ready_to_run(now, false))
            .map(|p| (p.name.clone(), p.cycle_point.clone()))
            .collect();

        for (name, cycle) in &waiting_ids {
            let queue_name = self.queue_for(name).to_string();
            let task_id = format!("{name}.{cycle}");
            self.queues.entry(queue_name).or_insert_with(|| NamedQueue::new(usize::MAX)).push_waiting(task_id);
        }

        let mut ready = Vec::new();
        let id_to_key: HashMap<String, (String, CyclePoint)> =
            waiting_ids.iter().map(|(n, c)| (format!("{n}.{c}"), (n.clone(), c.clone()))).collect();
        for queue in self.queues.values_mut() {
            for task_id in queue.admit() {
                if let Some((name, cycle)) = id_to_key.get(&task_id) {
                    if let Some(proxy) = self.proxies.get_mut(&(name.clone(), cycle.clone())) {
                        if proxy.apply(TaskEvent::PrereqsSatisfied).is_ok() {
                            ready.push(ReadyTask {
                                name: name.clone(),
                                cycle_point: cycle.clone(),
                            });
                        }
                    }
                }
            }
        }

        self.release_terminal_slots();
        self.spawn_successors();
        self.reap();
        ready
    }

    /// Free queue slots for any proxy that reached a terminal state this
    /// tick (idempotent: releasing an already-inactive id is a no-op).
    fn release_terminal_slots(&mut self) {
        let terminal: Vec<(String, CyclePoint)> = self
            .proxies
            .values()
            .filter(|p| p.status.is_terminal())
            .map(|p| (p.name.clone(), p.cycle_point.clone()))
            .collect();
        for (name, cycle) in terminal {
            self.release_active_slot(&name, &cycle);
        }
    }

    /// The pool calls this once a proxy actually begins submission (flips
    /// Ready -> Submitted), freeing its queue slot as it leaves the
    /// ready/submitted/running active band on terminal exit, and triggering
    /// first-submission spawn-of-successor bookkeeping.
    pub fn begin_submission(&mut self, name: &str, cycle_point: &CyclePoint) -> Result<(), crate::error::InternalInvariantError> {
        let key = (name.to_string(), cycle_point.clone());
        let proxy = self.proxies.get_mut(&key).expect("begin_submission on unknown proxy");
        proxy.apply(TaskEvent::SubmissionBegins)
    }

    /// After a proxy first submits, spawn the next occurrence on each of
    /// its sequences (idempotent: `spawn` no-ops if already present). A
    /// task definition marked `oneoff` never spawns a successor, per the
    /// glossary's "executes at most once per workflow run".
    fn spawn_successors(&mut self) {
        let candidates: Vec<(String, CyclePoint)> = self
            .proxies
            .values()
            .filter(|p| {
                !p.has_spawned
                    && !matches!(
                        p.status,
                        TaskStatus::Waiting | TaskStatus::Held | TaskStatus::Queued | TaskStatus::Ready
                    )
            })
            .map(|p| (p.name.clone(), p.cycle_point.clone()))
            .collect();

        for (name, cycle) in candidates {
            let Some(def) = self.definitions.get(&name) else { continue };
            if !def.oneoff {
                let next_points: Vec<CyclePoint> = def.sequences.iter().filter_map(|seq| seq.next_after(&cycle)).collect();
                for next in next_points {
                    self.spawn(&name, next);
                }
            }
            if let Some(proxy) = self.proxies.get_mut(&(name, cycle)) {
                proxy.has_spawned = true;
            }
        }
    }

    /// Remove proxies that are terminal, have spawned their successor, and
    /// whose cycle point is strictly behind every remaining non-terminal
    /// proxy -- a conservative stand-in for the graph's true maximum
    /// backward reach (full per-edge offset tracking is out of scope here;
    /// see DESIGN.md).
    fn reap(&mut self) {
        let Some(oldest_active) = self.active_cycle_points().into_iter().next() else {
            return;
        };
        let dead: Vec<ProxyKey> = self
            .proxies
            .values()
            .filter(|p| p.status.is_terminal() && p.has_spawned && p.cycle_point < oldest_active)
            .map(|p| (p.name.clone(), p.cycle_point.clone()))
            .collect();
        for key in dead {
            self.proxies.remove(&key);
            let queue_name = self.queue_for(&key.0).to_string();
            if let Some(queue) = self.queues.get_mut(&queue_name) {
                queue.release(&format!("{}.{}", key.0, key.1));
            }
        }
    }

    pub fn release_active_slot(&mut self, name: &str, cycle_point: &CyclePoint) {
        let queue_name = self.queue_for(name).to_string();
        if let Some(queue) = self.queues.get_mut(&queue_name) {
            queue.release(&format!("{name}.{cycle_point}"));
        }
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycling::{AtomicPrereq, Calendar, Duration, Expr, Sequence, Trigger};

    fn point(s: &str) -> CyclePoint {
        CyclePoint::parse(s, Calendar::Gregorian).unwrap()
    }

    fn pool_with_linear_graph() -> TaskPool {
        let mut a = TaskDefinition::new("a");
        a.sequences.push(Sequence::new(point("20200101T0000Z"), Duration::from_days(1), None));
        let mut b = TaskDefinition::new("b");
        b.sequences.push(Sequence::new(point("20200101T0000Z"), Duration::from_days(1), None));
        b.prerequisite_clauses.push(Expr::Atom(AtomicPrereq {
            upstream_name: "a".to_string(),
            trigger: Trigger::Default,
        }));

        let mut defs = HashMap::new();
        defs.insert("a".to_string(), a);
        defs.insert("b".to_string(), b);
        let mut pool = TaskPool::new(defs, 3, 100);
        pool.spawn("a", point("20200101T0000Z"));
        pool.spawn("b", point("20200101T0000Z"));
        pool
    }

    #[test]
    fn scenario_linear_two_task_graph_tick() {
        let mut pool = pool_with_linear_graph();
        let ready = pool.tick(vec![], 0);
        assert_eq!(ready, vec![ReadyTask { name: "a".to_string(), cycle_point: point("20200101T0000Z") }]);
        pool.begin_submission("a", &point("20200101T0000Z")).unwrap();

        let events = vec![
            PoolEvent::TaskMessage {
                name: "a".to_string(),
                cycle_point: point("20200101T0000Z"),
                message: "started".to_string(),
            },
            PoolEvent::TaskMessage {
                name: "a".to_string(),
                cycle_point: point("20200101T0000Z"),
                message: "succeeded".to_string(),
            },
        ];
        let ready = pool.tick(events, 0);
        assert_eq!(ready, vec![ReadyTask { name: "b".to_string(), cycle_point: point("20200101T0000Z") }]);
    }

    #[test]
    fn oneoff_task_does_not_spawn_a_successor() {
        let mut a = TaskDefinition::new("a");
        a.oneoff = true;
        a.sequences.push(Sequence::new(point("20200101T0000Z"), Duration::from_days(1), None));
        let mut defs = HashMap::new();
        defs.insert("a".to_string(), a);
        let mut pool = TaskPool::new(defs, 3, 100);
        pool.spawn("a", point("20200101T0000Z"));

        pool.tick(vec![], 0);
        pool.begin_submission("a", &point("20200101T0000Z")).unwrap();
        pool.tick(vec![], 0);

        assert!(pool.proxy("a", &point("20200102T0000Z")).is_none());
        assert!(pool.proxy("a", &point("20200101T0000Z")).unwrap().has_spawned);
    }

    #[test]
    fn runahead_window_parks_distant_spawns() {
        let mut a = TaskDefinition::new("a");
        a.sequences.push(Sequence::new(point("20200101T0000Z"), Duration::from_days(1), None));
        let mut defs = HashMap::new();
        defs.insert("a".to_string(), a);
        let mut pool = TaskPool::new(defs, 1, 100);
        pool.spawn("a", point("20200101T0000Z"));
        pool.spawn("a", point("20200102T0000Z"));
        let spawned_far = pool.spawn("a", point("20200105T0000Z"));
        assert!(!spawned_far);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn queue_limit_defers_extra_ready_tasks() {
        let mut a = TaskDefinition::new("a");
        a.sequences.push(Sequence::new(point("1"), Duration::from_days(1), None));
        let mut defs = HashMap::new();
        defs.insert("a".to_string(), a);
        let mut pool = TaskPool::new(defs, 10, 1);
        pool.spawn("a", CyclePoint::integer(1));
        pool.spawn("a", CyclePoint::integer(2));
        let ready = pool.tick(vec![], 0);
        assert_eq!(ready.len(), 1);
    }
}
