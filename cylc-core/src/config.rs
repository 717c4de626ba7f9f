//! Scheduler configuration: a typed, nested config tree loaded with a
//! fallback chain, modeling spec §9's "a typed nested map of known shape"
//! (the real `flow.cylc`/`suite.rc` grammar, include directives, and
//! Jinja2 templating stay out of scope; this loads a structurally
//! equivalent YAML document).

use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level scheduler configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub workflow: WorkflowConfig,
    pub scheduling: SchedulingConfig,
    pub submission: SubmissionDefaultsConfig,
}

impl SchedulerConfig {
    /// Load configuration with fallback chain: explicit path ->
    /// `./workflow.yml` -> `$CYLC_RUN_DIR/workflow.yml` -> defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from("workflow.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => tracing::warn!("failed to load config from {}: {}", local_config.display(), e),
            }
        }

        if let Ok(run_dir) = std::env::var("CYLC_RUN_DIR") {
            let run_config = PathBuf::from(run_dir).join("workflow.yml");
            if run_config.exists() {
                match Self::load_from_file(&run_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => tracing::warn!("failed to load config from {}: {}", run_config.display(), e),
                }
            }
        }

        tracing::info!("no config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("failed to parse config file")?;
        tracing::info!("loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Workflow identity and the initial/final cycle point bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub name: String,
    pub initial_cycle_point: Option<String>,
    pub final_cycle_point: Option<String>,
    pub calendar: String,
    #[serde(rename = "abort-if-any-task-fails")]
    pub abort_if_any_task_fails: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            name: "unnamed".to_string(),
            initial_cycle_point: None,
            final_cycle_point: None,
            calendar: "gregorian".to_string(),
            abort_if_any_task_fails: false,
        }
    }
}

/// Pool scheduling limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    #[serde(rename = "max-active-cycle-points")]
    pub max_active_cycle_points: u32,
    #[serde(rename = "default-queue-limit")]
    pub default_queue_limit: u32,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            max_active_cycle_points: 3,
            default_queue_limit: 100,
        }
    }
}

/// Defaults for the submission pipeline (process pool sizing, timeouts).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionDefaultsConfig {
    #[serde(rename = "process-pool-size")]
    pub process_pool_size: usize,
    #[serde(rename = "process-timeout-secs")]
    pub process_timeout_secs: u64,
    #[serde(rename = "submit-batch-size")]
    pub submit_batch_size: usize,
    #[serde(rename = "submit-batch-delay-secs")]
    pub submit_batch_delay_secs: u64,
}

impl Default for SubmissionDefaultsConfig {
    fn default() -> Self {
        Self {
            process_pool_size: 10,
            process_timeout_secs: 300,
            submit_batch_size: 50,
            submit_batch_delay_secs: 0,
        }
    }
}
