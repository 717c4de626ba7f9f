//! Submission pipeline: formats a job script, hands it to the selected
//! batch-system adapter via the process pool, and reports back a job id or
//! a [`JobSubmitError`]. Submits are gathered into configurable-size
//! batches with a delay between batches (spec §4.4).

use std::time::Duration as StdDuration;

use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

use crate::batch::adapter::BatchAdapter;
use crate::batch::AdapterRegistry;
use crate::error::{ConfigError, JobSubmitError};
use crate::submit::process_pool::{ProcContext, ProcessPool, Stdin};

/// One task ready to submit, with its already-rendered job script on disk.
pub struct SubmitRequest {
    pub task_id: String,
    pub batch_system: String,
    pub script_path: String,
}

/// The result of one submit attempt, delivered asynchronously.
pub struct SubmitOutcome {
    pub task_id: String,
    pub result: Result<String, JobSubmitError>,
}

pub struct SubmissionPipeline {
    pool: ProcessPool,
    registry: AdapterRegistry,
    batch_size: usize,
    batch_delay: StdDuration,
    submit_timeout: StdDuration,
}

impl SubmissionPipeline {
    pub fn new(pool: ProcessPool, registry: AdapterRegistry, batch_size: usize, batch_delay: StdDuration, submit_timeout: StdDuration) -> Self {
        Self {
            pool,
            registry,
            batch_size: batch_size.max(1),
            batch_delay,
            submit_timeout,
        }
    }

    /// Submit `requests` in batches, reporting each outcome on `tx` as it
    /// resolves. Unknown batch systems are reported immediately without
    /// touching the process pool.
    pub async fn submit_ready(&mut self, requests: Vec<SubmitRequest>, tx: UnboundedSender<SubmitOutcome>) {
        for (batch_idx, batch) in requests.chunks(self.batch_size).enumerate() {
            if batch_idx > 0 && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }
            for request in batch {
                self.submit_one(request, tx.clone());
            }
        }
    }

    fn submit_one(&mut self, request: &SubmitRequest, tx: UnboundedSender<SubmitOutcome>) {
        let adapter_key = request.batch_system.clone();
        let adapter = match self.registry.get(&adapter_key) {
            Ok(a) => a,
            Err(ConfigError::UnknownBatchSystem(key)) => {
                let _ = tx.send(SubmitOutcome {
                    task_id: request.task_id.clone(),
                    result: Err(JobSubmitError::UnparseableId(format!("unknown batch system {key:?}"))),
                });
                return;
            }
            Err(e) => {
                let _ = tx.send(SubmitOutcome {
                    task_id: request.task_id.clone(),
                    result: Err(JobSubmitError::UnparseableId(e.to_string())),
                });
                return;
            }
        };
        let argv = adapter.submit_command(&request.script_path);
        let task_id = request.task_id.clone();
        info!(%task_id, batch_system = %adapter_key, "submission pipeline: submitting job");

        // The adapter is re-looked-up inside the callback (by key, not by
        // reference) since the callback must be `'static`.
        let registry_key = adapter_key.clone();
        let id = self.pool.next_id();
        self.pool.put_command(ProcContext {
            id,
            label: format!("submit:{task_id}"),
            argv,
            stdin: Stdin::Null,
            timeout: self.submit_timeout,
            is_job_submit: true,
            callback: Box::new(move |result| {
                let outcome = match result.ret_code {
                    Some(0) => SubmitOutcome {
                        task_id,
                        result: parse_submit_id(&registry_key, &result.stdout),
                    },
                    Some(code) => SubmitOutcome {
                        task_id,
                        result: Err(JobSubmitError::NonZeroExit {
                            status: code,
                            stderr: result.stderr,
                        }),
                    },
                    None => SubmitOutcome {
                        task_id,
                        result: Err(JobSubmitError::NonZeroExit {
                            status: -1,
                            stderr: "submit command killed (timeout)".to_string(),
                        }),
                    },
                };
                let _ = tx.send(outcome);
            }),
        });
    }

    pub async fn tick(&mut self) {
        self.pool.process().await;
    }

    pub fn close(&mut self) {
        self.pool.close();
    }

    pub async fn terminate(&mut self) {
        self.pool.terminate().await;
    }

    pub fn in_flight(&self) -> usize {
        self.pool.in_flight()
    }
}

/// Re-resolve the adapter by key purely to parse the submit id -- the
/// adapters are stateless, so a second lookup (rather than threading a
/// borrow through the 'static callback) is cheap and avoids a lifetime
/// knot across the async boundary.
fn parse_submit_id(batch_system: &str, stdout: &str) -> Result<String, JobSubmitError> {
    use crate::batch::{LocalShellHandler, SlurmAdapter};
    let parsed = match batch_system {
        "slurm" => SlurmAdapter.parse_submit_id_from_stdout(stdout),
        _ => LocalShellHandler.parse_submit_id_from_stdout(stdout).or(Some(String::new())),
    };
    parsed.ok_or_else(|| JobSubmitError::UnparseableId(stdout.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::default_registry;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn unknown_batch_system_reports_immediately() {
        let mut pipeline = SubmissionPipeline::new(
            ProcessPool::new(2),
            default_registry(),
            50,
            StdDuration::from_secs(0),
            StdDuration::from_secs(5),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        pipeline
            .submit_ready(
                vec![SubmitRequest {
                    task_id: "a.1".to_string(),
                    batch_system: "nonexistent".to_string(),
                    script_path: "/tmp/a.sh".to_string(),
                }],
                tx,
            )
            .await;
        let outcome = rx.recv().await.unwrap();
        assert!(outcome.result.is_err());
    }
}
