//! TaskDefinition: the immutable, name-keyed record attaching triggers,
//! outputs, and retry/timeout policy to a graph node. Instances
//! ([`crate::proxy::TaskProxy`]) are created per cycle point at runtime.

use std::collections::{BTreeMap, HashMap};

use crate::cycling::{Expr, Sequence};

/// Job-script fragments a task definition may carry, emitted in this
/// fixed order by [`crate::submit::jobscript`].
#[derive(Debug, Clone, Default)]
pub struct ScriptFragments {
    pub init_script: Option<String>,
    pub env_script: Option<String>,
    pub err_script: Option<String>,
    pub pre_script: Option<String>,
    pub script: Option<String>,
    pub post_script: Option<String>,
    pub exit_script: Option<String>,
    pub global_init_script: Option<String>,
}

/// Submission-time configuration: which adapter to use, its directives,
/// and the script fragments above.
#[derive(Debug, Clone, Default)]
pub struct SubmissionConfig {
    pub batch_system: String,
    pub directives: BTreeMap<String, String>,
    pub scripts: ScriptFragments,
}

/// Ordered retry-delay policy, separately for submission and execution failures.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    pub submission_retry_delays: Vec<crate::cycling::Duration>,
    pub execution_retry_delays: Vec<crate::cycling::Duration>,
}

impl RetryPolicy {
    pub fn delay_for_submit_attempt(&self, try_num: u32) -> Option<crate::cycling::Duration> {
        self.submission_retry_delays.get(try_num.saturating_sub(1) as usize).copied()
    }

    pub fn delay_for_execution_attempt(&self, try_num: u32) -> Option<crate::cycling::Duration> {
        self.execution_retry_delays.get(try_num.saturating_sub(1) as usize).copied()
    }
}

/// An immutable task node definition.
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    pub name: String,
    pub sequences: Vec<Sequence>,
    /// Prerequisite clauses contributed by each incoming graph edge; the
    /// proxy must satisfy all clauses (AND across clauses, the clause's own
    /// boolean structure governs within it).
    pub prerequisite_clauses: Vec<Expr>,
    /// Output messages this task definition is known to produce, beyond
    /// the built-ins (`submitted`, `started`, `succeeded`, `failed`).
    pub custom_outputs: Vec<String>,
    pub retries: RetryPolicy,
    pub execution_time_limit: Option<crate::cycling::Duration>,
    pub clock_trigger_offset: Option<crate::cycling::Duration>,
    pub submission: SubmissionConfig,
    pub environment: HashMap<String, String>,
    /// Whether this task is marked non-spawning: it occurs at most once
    /// per workflow run (the glossary's "oneoff").
    pub oneoff: bool,
}

impl TaskDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sequences: Vec::new(),
            prerequisite_clauses: Vec::new(),
            custom_outputs: Vec::new(),
            retries: RetryPolicy::default(),
            execution_time_limit: None,
            clock_trigger_offset: None,
            submission: SubmissionConfig::default(),
            environment: HashMap::new(),
            oneoff: false,
        }
    }

    /// Every output message a proxy of this definition can emit.
    pub fn known_outputs(&self) -> Vec<String> {
        let mut outputs = vec!["submitted".to_string(), "started".to_string(), "succeeded".to_string(), "failed".to_string()];
        outputs.extend(self.custom_outputs.iter().cloned());
        outputs
    }

    /// A task with no upstream prerequisites at all is a startup-eligible source.
    pub fn is_source(&self) -> bool {
        self.prerequisite_clauses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_outputs_includes_builtins_and_custom() {
        let mut def = TaskDefinition::new("a");
        def.custom_outputs.push("half_done".to_string());
        let outputs = def.known_outputs();
        assert!(outputs.contains(&"succeeded".to_string()));
        assert!(outputs.contains(&"half_done".to_string()));
    }

    #[test]
    fn retry_policy_indexes_by_attempt_number() {
        let mut retries = RetryPolicy::default();
        retries.submission_retry_delays = vec![
            crate::cycling::Duration::from_days(0),
            crate::cycling::Duration::from_days(1),
        ];
        assert!(retries.delay_for_submit_attempt(1).is_some());
        assert!(retries.delay_for_submit_attempt(2).is_some());
        assert!(retries.delay_for_submit_attempt(3).is_none());
    }
}
