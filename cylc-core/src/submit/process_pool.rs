//! Bounded-concurrency process pool executing submit/poll/kill/event-
//! handler commands. Ported from `mp_pool.py`'s `SuiteProcPool`: each
//! `process()` tick reaps finished children, kills anything over its
//! timeout via a process-group signal, then starts new children up to
//! `size`. Children are launched as process-group leaders so a timeout
//! kill takes their descendants with them.

use std::collections::VecDeque;
use std::os::unix::process::CommandExt as _;
use std::time::{Duration as StdDuration, Instant};

use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::SchedulerStopping;

/// Where a command's stdin comes from.
#[derive(Debug, Clone)]
pub enum Stdin {
    Null,
    InMemory(String),
    /// A list of input files to be concatenated into a temp file.
    Files(Vec<String>),
}

/// The outcome of a finished (or killed) command.
#[derive(Debug, Clone)]
pub struct ProcResult {
    /// `None` means the command was killed for exceeding its timeout.
    pub ret_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcResult {
    pub fn killed() -> Self {
        Self {
            ret_code: None,
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

/// One command to run through the pool.
pub struct ProcContext {
    pub id: u64,
    pub label: String,
    pub argv: Vec<String>,
    pub stdin: Stdin,
    pub timeout: StdDuration,
    /// Job-submit commands are rejected (not queued) once the pool is
    /// stopping, per spec §4.4's `put_command` contract.
    pub is_job_submit: bool,
    pub callback: Box<dyn FnOnce(ProcResult) + Send>,
}

struct RunningChild {
    ctx_id: u64,
    label: String,
    child: Child,
    started_at: Instant,
    timeout: StdDuration,
    callback: Box<dyn FnOnce(ProcResult) + Send>,
}

/// Bounded-concurrency command executor.
pub struct ProcessPool {
    size: usize,
    queue: VecDeque<ProcContext>,
    live: Vec<RunningChild>,
    stopping: bool,
    next_id: u64,
}

impl ProcessPool {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            queue: VecDeque::new(),
            live: Vec::new(),
            stopping: false,
            next_id: 0,
        }
    }

    pub fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Enqueue a command. If the pool is stopping and this is a job-submit,
    /// it is immediately failed with [`SchedulerStopping`]'s message and the
    /// callback invoked synchronously rather than queued.
    pub fn put_command(&mut self, ctx: ProcContext) {
        if self.stopping && ctx.is_job_submit {
            warn!(label = %ctx.label, "put_command: rejecting job-submit, pool is stopping");
            let ProcContext { callback, label, .. } = ctx;
            callback(ProcResult {
                ret_code: Some(-1),
                stdout: String::new(),
                stderr: SchedulerStopping(label).to_string(),
            });
            return;
        }
        self.queue.push_back(ctx);
    }

    #[allow(clippy::type_complexity)]
    fn spawn_child(&mut self, ctx: ProcContext) -> Result<(), (Box<dyn FnOnce(ProcResult) + Send>, std::io::Error)> {
        let ProcContext {
            id,
            label,
            argv,
            stdin,
            timeout,
            callback,
            ..
        } = ctx;
        let (program, args) = argv.split_first().expect("argv must be non-empty");
        let mut command = Command::new(program);
        command.args(args);
        command.stdout(std::process::Stdio::piped());
        command.stderr(std::process::Stdio::piped());
        command.stdin(match stdin {
            Stdin::Null => std::process::Stdio::null(),
            _ => std::process::Stdio::piped(),
        });
        // Process-group leader so a timeout kill via killpg takes descendants too.
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => return Err((callback, e)),
        };

        if let Stdin::InMemory(text) = stdin {
            if let Some(mut writer) = child.stdin.take() {
                use tokio::io::AsyncWriteExt;
                tokio::spawn(async move {
                    let _ = writer.write_all(text.as_bytes()).await;
                });
            }
        }

        debug!(%label, pid = child.id(), "process_pool: spawned command");
        self.live.push(RunningChild {
            ctx_id: id,
            label,
            child,
            started_at: Instant::now(),
            timeout,
            callback,
        });
        Ok(())
    }

    /// One pool tick: reap finished children, kill anything over its
    /// timeout, then start new commands up to `size`.
    pub async fn process(&mut self) {
        self.reap().await;
        self.kill_timed_out();
        self.start_queued().await;
    }

    async fn reap(&mut self) {
        let mut finished = Vec::new();
        for (idx, running) in self.live.iter_mut().enumerate() {
            if let Ok(Some(_status)) = running.child.try_wait() {
                finished.push(idx);
            }
        }
        for idx in finished.into_iter().rev() {
            let mut running = self.live.remove(idx);
            let output = running.child.wait_with_output().await;
            let result = match output {
                Ok(out) => ProcResult {
                    ret_code: out.status.code(),
                    stdout: String::from_utf8_lossy(&out.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&out.stderr).to_string(),
                },
                Err(e) => ProcResult {
                    ret_code: None,
                    stdout: String::new(),
                    stderr: e.to_string(),
                },
            };
            debug!(label = %running.label, ret_code = ?result.ret_code, "process_pool: reaped");
            (running.callback)(result);
        }
    }

    fn kill_timed_out(&mut self) {
        let now = Instant::now();
        for running in &mut self.live {
            if now.duration_since(running.started_at) > running.timeout {
                warn!(label = %running.label, "process_pool: command exceeded timeout, killing process group");
                kill_process_group(running.child.id());
            }
        }
    }

    async fn start_queued(&mut self) {
        while self.live.len() < self.size {
            let Some(ctx) = self.queue.pop_front() else {
                break;
            };
            let label = ctx.label.clone();
            if let Err((callback, e)) = self.spawn_child(ctx) {
                warn!(%label, error = %e, "process_pool: failed to spawn command");
                callback(ProcResult {
                    ret_code: None,
                    stdout: String::new(),
                    stderr: e.to_string(),
                });
            }
        }
    }

    /// Stop accepting new submits; does not touch already-queued or live commands.
    pub fn close(&mut self) {
        self.stopping = true;
    }

    /// Drain the queue (failing pending job-submits), send a group-kill to
    /// every live child, then reap.
    pub async fn terminate(&mut self) {
        self.close();
        while let Some(ctx) = self.queue.pop_front() {
            let ProcContext { callback, label, .. } = ctx;
            callback(ProcResult {
                ret_code: Some(-1),
                stdout: String::new(),
                stderr: SchedulerStopping(label).to_string(),
            });
        }
        for running in &self.live {
            kill_process_group(running.child.id());
        }
        self.reap().await;
    }

    pub fn in_flight(&self) -> usize {
        self.live.len()
    }

    /// `true` once every queued and live command has been drained.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.live.is_empty()
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }
}

fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid else { return };
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;
    let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn ctx(id: u64, argv: Vec<&str>, on_done: Arc<Mutex<Option<ProcResult>>>) -> ProcContext {
        ProcContext {
            id,
            label: format!("cmd-{id}"),
            argv: argv.into_iter().map(str::to_string).collect(),
            stdin: Stdin::Null,
            timeout: StdDuration::from_secs(5),
            is_job_submit: false,
            callback: Box::new(move |result| {
                *on_done.lock().unwrap() = Some(result);
            }),
        }
    }

    #[tokio::test]
    async fn runs_a_command_and_reaps_it() {
        let mut pool = ProcessPool::new(2);
        let result_slot = Arc::new(Mutex::new(None));
        pool.put_command(ctx(1, vec!["/bin/true"], result_slot.clone()));
        pool.process().await;
        for _ in 0..20 {
            if result_slot.lock().unwrap().is_some() {
                break;
            }
            pool.process().await;
            tokio::time::sleep(StdDuration::from_millis(20)).await;
        }
        let result = result_slot.lock().unwrap().take().expect("command should have completed");
        assert_eq!(result.ret_code, Some(0));
    }

    #[tokio::test]
    async fn job_submit_rejected_while_stopping() {
        let mut pool = ProcessPool::new(2);
        pool.close();
        let result_slot = Arc::new(Mutex::new(None));
        let mut c = ctx(1, vec!["/bin/true"], result_slot.clone());
        c.is_job_submit = true;
        pool.put_command(c);
        let result = result_slot.lock().unwrap().take().unwrap();
        assert_eq!(result.ret_code, Some(-1));
        assert!(result.stderr.contains("scheduler is stopping"));
        assert!(result.stderr.contains("cmd-1"));
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn respects_pool_size() {
        let mut pool = ProcessPool::new(1);
        let slot_a = Arc::new(Mutex::new(None));
        let slot_b = Arc::new(Mutex::new(None));
        pool.put_command(ctx(1, vec!["/bin/sleep", "0.2"], slot_a));
        pool.put_command(ctx(2, vec!["/bin/true"], slot_b));
        pool.process().await;
        assert_eq!(pool.in_flight(), 1);
        assert_eq!(pool.queue.len(), 1);
    }
}
