//! Remote `(host, user)` initialization. Before the first job submits to a
//! new remote, a small service bundle is streamed over as a tar archive.
//! States per remote are `none -> in-flight -> done | failed`; `failed` is
//! sticky until explicitly cleared. Ported from `task_remote_mgr.py`.

use std::collections::HashMap;
use std::time::Duration as StdDuration;

use tracing::{info, warn};

use crate::error::RemoteInitError;
use crate::submit::process_pool::{ProcContext, ProcessPool, Stdin};

/// A host identifier as written in a task's runtime config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostValue {
    Literal(String),
    /// A command to run locally; its stdout (trimmed) is the resolved host.
    Command(String),
    EnvVar(String),
}

impl HostValue {
    /// Parse `localhost`, `` `command` ``, or `$VARNAME` forms.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Some(inner) = trimmed.strip_prefix('`').and_then(|s| s.strip_suffix('`')) {
            return HostValue::Command(inner.to_string());
        }
        if let Some(name) = trimmed.strip_prefix('$') {
            return HostValue::EnvVar(name.to_string());
        }
        HostValue::Literal(trimmed.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteState {
    None,
    InFlight,
    Done,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteKey {
    pub host: String,
    pub user: Option<String>,
}

impl std::fmt::Display for RemoteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.user {
            Some(user) => write!(f, "{user}@{}", self.host),
            None => write!(f, "{}", self.host),
        }
    }
}

/// Caches resolved host values and tracks per-remote install state.
pub struct RemoteInitManager {
    resolved_hosts: HashMap<String, String>,
    states: HashMap<RemoteKey, RemoteState>,
    tidy_budget: StdDuration,
}

impl Default for RemoteInitManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteInitManager {
    pub fn new() -> Self {
        Self {
            resolved_hosts: HashMap::new(),
            states: HashMap::new(),
            tidy_budget: StdDuration::from_secs(10),
        }
    }

    pub fn state(&self, key: &RemoteKey) -> RemoteState {
        self.states.get(key).cloned().unwrap_or(RemoteState::None)
    }

    /// Evaluate a [`HostValue`] to a concrete hostname, caching by the raw
    /// spec so a backtick command only runs once.
    pub async fn resolve_host(&mut self, raw_spec: &str, value: &HostValue, pool: &mut ProcessPool) -> Result<String, RemoteInitError> {
        if let Some(cached) = self.resolved_hosts.get(raw_spec) {
            return Ok(cached.clone());
        }
        let resolved = match value {
            HostValue::Literal(host) => host.clone(),
            HostValue::EnvVar(name) => std::env::var(name).map_err(|_| RemoteInitError::HostResolution(raw_spec.to_string()))?,
            HostValue::Command(cmd) => {
                let (tx, mut rx) = tokio::sync::oneshot::channel();
                let id = pool.next_id();
                pool.put_command(ProcContext {
                    id,
                    label: format!("resolve-host:{raw_spec}"),
                    argv: vec!["/bin/sh".to_string(), "-c".to_string(), cmd.clone()],
                    stdin: Stdin::Null,
                    timeout: StdDuration::from_secs(30),
                    is_job_submit: false,
                    callback: Box::new(move |result| {
                        let _ = tx.send(result);
                    }),
                });
                loop {
                    pool.process().await;
                    if let Ok(result) = rx.try_recv() {
                        if result.ret_code == Some(0) {
                            break result.stdout.trim().to_string();
                        }
                        return Err(RemoteInitError::HostResolution(raw_spec.to_string()));
                    }
                    tokio::time::sleep(StdDuration::from_millis(20)).await;
                }
            }
        };
        self.resolved_hosts.insert(raw_spec.to_string(), resolved.clone());
        Ok(resolved)
    }

    /// Begin (or re-use) an install for `key`. Returns `false` immediately
    /// if the remote is sticky-failed or already in flight/done.
    pub fn should_install(&self, key: &RemoteKey) -> bool {
        matches!(self.state(key), RemoteState::None)
    }

    /// Clear a sticky failure so the next submit retries installation.
    pub fn clear_failure(&mut self, key: &RemoteKey) {
        if matches!(self.states.get(key), Some(RemoteState::Failed(_))) {
            self.states.remove(key);
        }
    }

    /// Stream `bundle` to `key` via the process pool, marking the remote
    /// in-flight then done/failed. `bundle` is the tar archive bytes encoded
    /// by the caller (e.g. base64, or piped raw over stdin).
    pub async fn install(&mut self, key: RemoteKey, bundle_argv: Vec<String>, bundle_stdin: String, pool: &mut ProcessPool) -> Result<(), RemoteInitError> {
        self.states.insert(key.clone(), RemoteState::InFlight);
        info!(remote = %key, "remote init: streaming service bundle");

        let (tx, mut rx) = tokio::sync::oneshot::channel();
        let id = pool.next_id();
        let label = format!("remote-init:{key}");
        pool.put_command(ProcContext {
            id,
            label: label.clone(),
            argv: bundle_argv,
            stdin: Stdin::InMemory(bundle_stdin),
            timeout: StdDuration::from_secs(60),
            is_job_submit: false,
            callback: Box::new(move |result| {
                let _ = tx.send(result);
            }),
        });

        let result = loop {
            pool.process().await;
            if let Ok(result) = rx.try_recv() {
                break result;
            }
            tokio::time::sleep(StdDuration::from_millis(20)).await;
        };

        if result.ret_code == Some(0) {
            self.states.insert(key.clone(), RemoteState::Done);
            Ok(())
        } else {
            let reason = if result.stderr.is_empty() {
                format!("exit code {:?}", result.ret_code)
            } else {
                result.stderr.clone()
            };
            self.states.insert(key.clone(), RemoteState::Failed(reason.clone()));
            Err(RemoteInitError::StreamFailed { host: key.host, reason })
        }
    }

    /// Shut down: attempt a tidy pass per known-done remote in parallel,
    /// bounded to a hard 10-second overall budget.
    pub async fn tidy_all(&self, tidy_argv_for: impl Fn(&RemoteKey) -> Vec<String>, pool: &mut ProcessPool) {
        let remotes: Vec<RemoteKey> = self
            .states
            .iter()
            .filter(|(_, state)| matches!(state, RemoteState::Done))
            .map(|(key, _)| key.clone())
            .collect();
        if remotes.is_empty() {
            return;
        }
        let deadline = tokio::time::Instant::now() + self.tidy_budget;
        for key in &remotes {
            let id = pool.next_id();
            pool.put_command(ProcContext {
                id,
                label: format!("remote-tidy:{key}"),
                argv: tidy_argv_for(key),
                stdin: Stdin::Null,
                timeout: self.tidy_budget,
                is_job_submit: false,
                callback: Box::new(|_result| {}),
            });
        }
        while !pool.is_idle() {
            if tokio::time::Instant::now() >= deadline {
                warn!("remote init: tidy pass exceeded its 10s budget, abandoning stragglers");
                break;
            }
            pool.process().await;
            tokio::time::sleep(StdDuration::from_millis(20)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_value_parses_all_three_forms() {
        assert_eq!(HostValue::parse("node01"), HostValue::Literal("node01".to_string()));
        assert_eq!(HostValue::parse("`get-host.sh`"), HostValue::Command("get-host.sh".to_string()));
        assert_eq!(HostValue::parse("$MY_HOST"), HostValue::EnvVar("MY_HOST".to_string()));
    }

    #[test]
    fn fresh_remote_should_install() {
        let mgr = RemoteInitManager::new();
        let key = RemoteKey {
            host: "node01".to_string(),
            user: None,
        };
        assert!(mgr.should_install(&key));
    }

    #[tokio::test]
    async fn install_success_marks_done() {
        let mut mgr = RemoteInitManager::new();
        let mut pool = ProcessPool::new(2);
        let key = RemoteKey {
            host: "localhost".to_string(),
            user: None,
        };
        mgr.install(key.clone(), vec!["/bin/true".to_string()], String::new(), &mut pool).await.unwrap();
        assert_eq!(mgr.state(&key), RemoteState::Done);
    }

    #[tokio::test]
    async fn install_failure_is_sticky_until_cleared() {
        let mut mgr = RemoteInitManager::new();
        let mut pool = ProcessPool::new(2);
        let key = RemoteKey {
            host: "localhost".to_string(),
            user: None,
        };
        let result = mgr.install(key.clone(), vec!["/bin/false".to_string()], String::new(), &mut pool).await;
        assert!(result.is_err());
        assert!(matches!(mgr.state(&key), RemoteState::Failed(_)));
        assert!(!mgr.should_install(&key));
        mgr.clear_failure(&key);
        assert!(mgr.should_install(&key));
    }
}
