//! Batch-system adapter contract: a plug-in capability set translating
//! abstract job requests into a concrete scheduler's CLI (spec §4.5).
//! Adapters are selected per task via a `batch_system` key and looked up
//! in a string-keyed registry rather than dynamic class-by-name
//! instantiation (§9); an unknown key is a [`crate::error::ConfigError`]
//! raised at load time.

use std::collections::{BTreeMap, HashMap};

use crate::cycling::Duration;
use crate::error::ConfigError;

/// Everything an adapter needs to format a job script's directive block
/// and submit/poll/kill commands.
#[derive(Debug, Clone)]
pub struct DirectiveContext {
    pub job_name: String,
    pub output_path: String,
    pub error_path: String,
    pub execution_time_limit: Option<Duration>,
    pub directives: BTreeMap<String, String>,
}

/// A batch-system adapter.
pub trait BatchAdapter: Send + Sync {
    fn key(&self) -> &'static str;

    /// Produce the job script's directive header lines.
    fn format_directives(&self, ctx: &DirectiveContext) -> Vec<String>;

    /// argv to submit `script_path`.
    fn submit_command(&self, script_path: &str) -> Vec<String>;

    /// argv to poll the given submit ids.
    fn poll_command(&self, ids: &[String]) -> Vec<String>;

    /// argv to kill one submit id.
    fn kill_command(&self, id: &str) -> Vec<String>;

    /// Extract the submitted job's id from the submit command's stdout.
    fn parse_submit_id_from_stdout(&self, stdout: &str) -> Option<String>;

    /// Extract the still-live ids from a poll command's stdout. The pool
    /// infers exited ids by set difference against what it submitted.
    fn filter_poll_output(&self, stdout: &str) -> Vec<String>;

    /// Signals that indicate the job failed rather than was killed cleanly.
    fn fail_signals(&self) -> Vec<&'static str> {
        vec!["SIGTERM", "SIGKILL"]
    }
}

/// String-keyed adapter registry.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Box<dyn BatchAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Box<dyn BatchAdapter>) {
        self.adapters.insert(adapter.key().to_string(), adapter);
    }

    pub fn get(&self, key: &str) -> Result<&dyn BatchAdapter, ConfigError> {
        self.adapters
            .get(key)
            .map(|b| b.as_ref())
            .ok_or_else(|| ConfigError::UnknownBatchSystem(key.to_string()))
    }
}

/// Split a directive map into the base (non-heterogeneous) directives and
/// the `hetjob_<n>_`/`packjob_<n>_`-prefixed groups, ordered by ascending
/// `<n>` (spec §6's "Heterogeneous directive prefixes").
pub fn split_heterogeneous(directives: &BTreeMap<String, String>) -> (BTreeMap<String, String>, BTreeMap<u32, BTreeMap<String, String>>) {
    let mut base = BTreeMap::new();
    let mut groups: BTreeMap<u32, BTreeMap<String, String>> = BTreeMap::new();
    for (key, value) in directives {
        if let Some((n, rest)) = parse_het_prefix(key) {
            groups.entry(n).or_default().insert(rest.to_string(), value.clone());
        } else {
            base.insert(key.clone(), value.clone());
        }
    }
    (base, groups)
}

fn parse_het_prefix(key: &str) -> Option<(u32, &str)> {
    for prefix in ["hetjob_", "packjob_"] {
        if let Some(rest) = key.strip_prefix(prefix) {
            if let Some((n, tail)) = rest.split_once('_') {
                if let Ok(n) = n.parse::<u32>() {
                    return Some((n, tail));
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_heterogeneous_groups_by_index() {
        let mut directives = BTreeMap::new();
        directives.insert("-p".to_string(), "middle".to_string());
        directives.insert("hetjob_0_--mem".to_string(), "1G".to_string());
        directives.insert("hetjob_1_--mem".to_string(), "2G".to_string());
        let (base, groups) = split_heterogeneous(&directives);
        assert_eq!(base.len(), 1);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&0]["--mem"], "1G");
        assert_eq!(groups[&1]["--mem"], "2G");
    }
}
