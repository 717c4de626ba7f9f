//! Integration tests for the six concrete scenarios: each drives the
//! public `cylc_core` API end to end (graph parsing, task pool, proxy FSM,
//! broadcast store, batch adapter) rather than any single module's
//! internals in isolation.

use std::collections::{BTreeMap, HashMap};

use cylc_core::cycling::{parse_param_refs, render_name, resolve_refs, Families, ParamTable};
use cylc_core::{
    parse_graph, AtomicPrereq, BatchAdapter, BroadcastFacade, Calendar, CyclePoint,
    DirectiveContext, Duration, PoolEvent, ReadyTask, Sequence, SlurmAdapter, TaskDefinition,
    TaskEvent, TaskPool, TaskProxy, TaskStatus, Trigger,
};

fn point(s: &str) -> CyclePoint {
    CyclePoint::parse(s, Calendar::Gregorian).unwrap()
}

fn daily_def(name: &str, start: &str) -> TaskDefinition {
    let mut def = TaskDefinition::new(name);
    def.sequences.push(Sequence::new(point(start), Duration::from_days(1), None));
    def
}

/// Scenario 1: a linear two-task graph (`a => b`). `b` only becomes ready
/// once `a` reports `succeeded`, and the pool spawns each task's next
/// occurrence only after it first submits.
#[test]
fn scenario_1_linear_two_task_graph() {
    let families = Families::new();
    let graph = parse_graph("a => b", &families).unwrap();

    let a = daily_def("a", "20200101T0000Z");
    let mut b = daily_def("b", "20200101T0000Z");
    b.prerequisite_clauses = graph.entries.get("a").unwrap().clauses.clone();

    let mut defs = HashMap::new();
    defs.insert("a".to_string(), a);
    defs.insert("b".to_string(), b);
    let mut pool = TaskPool::new(defs, 3, 100);
    pool.spawn("a", point("20200101T0000Z"));
    pool.spawn("b", point("20200101T0000Z"));

    let ready = pool.tick(vec![], 0);
    assert_eq!(ready, vec![ReadyTask { name: "a".to_string(), cycle_point: point("20200101T0000Z") }]);
    pool.begin_submission("a", &point("20200101T0000Z")).unwrap();

    assert!(pool.proxy("b", &point("20200101T0000Z")).unwrap().status == TaskStatus::Waiting);

    let ready = pool.tick(
        vec![
            PoolEvent::TaskMessage { name: "a".to_string(), cycle_point: point("20200101T0000Z"), message: "started".to_string() },
            PoolEvent::TaskMessage { name: "a".to_string(), cycle_point: point("20200101T0000Z"), message: "succeeded".to_string() },
        ],
        0,
    );
    assert_eq!(ready, vec![ReadyTask { name: "b".to_string(), cycle_point: point("20200101T0000Z") }]);

    // a's successor at the next cycle point spawned once a first submitted.
    assert!(pool.proxy("a", &point("20200102T0000Z")).is_some());
}

/// Scenario 2: fan-in through a family's `:succeed-any` qualifier. `post`
/// is admitted once any one of `FAM`'s members (`m1`, `m2`) succeeds.
#[test]
fn scenario_2_fan_in_family_succeed_any() {
    let mut families = Families::new();
    families.insert("FAM".to_string(), vec!["m1".to_string(), "m2".to_string()]);
    let graph = parse_graph("FAM:succeed-any => post", &families).unwrap();

    let mut post = TaskDefinition::new("post");
    // the graph records one clause per leaf upstream name; collapse to the
    // single Or clause spanning both members.
    let clauses: Vec<_> = graph.entries.values().flat_map(|e| e.clauses.clone()).collect();
    post.prerequisite_clauses = vec![clauses.into_iter().next().unwrap()];

    let mut defs = HashMap::new();
    defs.insert("m1".to_string(), TaskDefinition::new("m1"));
    defs.insert("m2".to_string(), TaskDefinition::new("m2"));
    defs.insert("post".to_string(), post);
    let mut pool = TaskPool::new(defs, 10, 100);
    pool.spawn("m1", point("1"));
    pool.spawn("m2", point("1"));
    pool.spawn("post", point("1"));

    pool.tick(vec![], 0);
    pool.begin_submission("m1", &point("1")).unwrap();
    pool.begin_submission("m2", &point("1")).unwrap();

    let ready = pool.tick(
        vec![
            PoolEvent::TaskMessage { name: "m1".to_string(), cycle_point: point("1"), message: "started".to_string() },
            PoolEvent::TaskMessage { name: "m1".to_string(), cycle_point: point("1"), message: "succeeded".to_string() },
        ],
        0,
    );
    assert!(ready.iter().any(|t| t.name == "post"));
    assert_eq!(pool.proxy("m2", &point("1")).unwrap().status, TaskStatus::Submitted);
}

/// Scenario 3: parameter expansion. `bar<i-1,j> => baz<i,j>` expands over
/// the declared `i`/`j` axes; the edge at `i=0` has no `i-1` predecessor and
/// is correctly dropped rather than resolving to a nonsensical name.
#[test]
fn scenario_3_parameter_expansion_drops_out_of_range_offsets() {
    let mut table = ParamTable::new();
    table.declare("i", vec![0, 1]);
    table.declare("j", vec![0, 1, 2]);

    let bar_refs = parse_param_refs("i-1,j");
    let baz_refs = parse_param_refs("i,j");

    let mut edges = Vec::new();
    for assignment in table.product(&["i", "j"]) {
        let Some(baz_resolved) = resolve_refs(&table, &baz_refs, &assignment) else { continue };
        let baz_name = render_name("baz", &baz_refs, &baz_resolved);
        match resolve_refs(&table, &bar_refs, &assignment) {
            Some(bar_resolved) => edges.push((render_name("bar", &bar_refs, &bar_resolved), baz_name)),
            None => continue,
        }
    }

    // i ranges over {0,1}, j over {0,1,2}: i=0 has no predecessor, so only
    // the i=1 row (3 values of j) produces an edge.
    assert_eq!(edges.len(), 3);
    assert!(edges.contains(&("bar_i0_j0".to_string(), "baz_i1_j0".to_string())));
    assert!(!edges.iter().any(|(_, baz)| baz.starts_with("baz_i0_")));
}

/// Scenario 4: submission retries with an explicit delay sequence
/// (`PT10S`, `PT20S`), including a run to exhaustion ending in
/// `submit-failed`.
#[test]
fn scenario_4_submit_retry_sequence_with_delays() {
    let mut def = TaskDefinition::new("t");
    def.retries.submission_retry_delays = vec![Duration { seconds: 10, ..Duration::ZERO }, Duration { seconds: 20, ..Duration::ZERO }];

    assert_eq!(def.retries.delay_for_submit_attempt(1), Some(Duration { seconds: 10, ..Duration::ZERO }));
    assert_eq!(def.retries.delay_for_submit_attempt(2), Some(Duration { seconds: 20, ..Duration::ZERO }));
    assert_eq!(def.retries.delay_for_submit_attempt(3), None);

    let mut defs = HashMap::new();
    defs.insert("t".to_string(), def.clone());
    let mut pool = TaskPool::new(defs, 3, 100);
    pool.spawn("t", point("1"));
    pool.tick(vec![], 0);
    pool.begin_submission("t", &point("1")).unwrap();

    // first submit fails, retries remain (attempt 1 of 2 delays configured)
    pool.apply_event(PoolEvent::SubmitFailed { name: "t".to_string(), cycle_point: point("1"), retries_remaining: true });
    assert_eq!(pool.proxy("t", &point("1")).unwrap().status, TaskStatus::SubmitRetrying);

    pool.apply_event(PoolEvent::RetryDelayElapsed { name: "t".to_string(), cycle_point: point("1") });
    assert_eq!(pool.proxy("t", &point("1")).unwrap().status, TaskStatus::Waiting);

    pool.tick(vec![], 0);
    pool.begin_submission("t", &point("1")).unwrap();
    // second submit fails, no retries left
    pool.apply_event(PoolEvent::SubmitFailed { name: "t".to_string(), cycle_point: point("1"), retries_remaining: false });
    assert_eq!(pool.proxy("t", &point("1")).unwrap().status, TaskStatus::SubmitFailed);
    assert!(pool.proxy("t", &point("1")).unwrap().status.is_terminal());
}

/// Scenario 5: broadcast precedence. A wildcard-cycle `root` override
/// applies everywhere until a narrower exact-cycle `foo` override takes
/// precedence at the cycle point it targets.
#[test]
fn scenario_5_broadcast_precedence_exact_cycle_over_wildcard_root() {
    let mut facade = BroadcastFacade::new(Calendar::Gregorian);
    let always_valid = |_: &str| true;

    facade.put(
        &[BroadcastFacade::WILDCARD.to_string()],
        &["root".to_string()],
        &serde_json::json!({"execution time limit": "PT1H"}),
        always_valid,
    );
    facade.put(
        &["20200101T0000Z".to_string()],
        &["foo".to_string()],
        &serde_json::json!({"execution time limit": "PT30M"}),
        always_valid,
    );

    let at_override = facade.lookup(&point("20200101T0000Z"), &["root".to_string(), "foo".to_string()]);
    assert_eq!(at_override["execution time limit"], "PT30M");

    let other_cycle = facade.lookup(&point("20200102T0000Z"), &["root".to_string(), "foo".to_string()]);
    assert_eq!(other_cycle["execution time limit"], "PT1H");

    let other_task = facade.lookup(&point("20200101T0000Z"), &["root".to_string(), "bar".to_string()]);
    assert_eq!(other_task["execution time limit"], "PT1H");
}

/// Scenario 6: heterogeneous SLURM directives. `hetjob_0_`/`hetjob_1_`
/// prefixed directives split into separate groups, each preceded by a
/// `#SBATCH hetjob` separator (except the first), with the derived
/// `--time` directive and base directives emitted ahead of any group.
#[test]
fn scenario_6_heterogeneous_slurm_directives() {
    let mut directives = BTreeMap::new();
    directives.insert("-p".to_string(), "batch".to_string());
    directives.insert("hetjob_0_--mem".to_string(), "4G".to_string());
    directives.insert("hetjob_1_--mem".to_string(), "8G".to_string());

    let ctx = DirectiveContext {
        job_name: "model.20200101T0000Z".to_string(),
        output_path: "job.out".to_string(),
        error_path: "job.err".to_string(),
        execution_time_limit: Some(Duration { hours: 1, ..Duration::ZERO }),
        directives,
    };

    let lines = SlurmAdapter.format_directives(&ctx);
    assert_eq!(lines[0], "#SBATCH --job-name=model.20200101T0000Z");
    assert!(lines.contains(&"#SBATCH --time=1:00:00".to_string()));
    assert!(lines.contains(&"#SBATCH -p=batch".to_string()));
    assert_eq!(lines.iter().filter(|l| l.as_str() == "#SBATCH hetjob").count(), 1);

    let mem_lines: Vec<_> = lines.iter().filter(|l| l.contains("--mem")).collect();
    assert_eq!(mem_lines, vec!["#SBATCH --mem=4G", "#SBATCH --mem=8G"]);

    let submitted = SlurmAdapter.parse_submit_id_from_stdout("Submitted batch job 123456\n").unwrap();
    assert_eq!(submitted, "123456");
}

/// Sanity check that the FSM-level path used by scenario 4 agrees with the
/// plain proxy-level transition table (no pool involved).
#[test]
fn proxy_fsm_matches_pool_level_retry_transitions() {
    let mut t = TaskProxy::new("t", point("1"), vec![]);
    t.apply(TaskEvent::PrereqsSatisfied).unwrap();
    t.apply(TaskEvent::SubmissionBegins).unwrap();
    t.apply(TaskEvent::SubmitFailed { retries_remaining: true }).unwrap();
    assert_eq!(t.status, TaskStatus::SubmitRetrying);

    let atom = AtomicPrereq { upstream_name: "a".to_string(), trigger: Trigger::Default };
    assert_eq!(atom.trigger.output_message(), "succeeded");
}
