//! Cycling workflow scheduler kernel.
//!
//! A single-process scheduler for task graphs defined over a recurring
//! sequence of cycle points: cycle-point/sequence arithmetic, the task
//! proxy state machine, the dependency-negotiation pool, a queue-and-batch
//! job submission pipeline, and a broadcast/override store.
//!
//! # Modules
//!
//! - [`cycling`] - cycle points, recurrence sequences, graph-string parsing
//! - [`taskdef`] - immutable task graph node definitions
//! - [`proxy`] - the per-cycle-point task state machine
//! - [`pool`] - dependency negotiation, runahead, named queues
//! - [`submit`] - job submission pipeline and bounded process pool
//! - [`batch`] - batch-system adapter contract (SLURM, local shell)
//! - [`broadcast`] - cycle-point-aware runtime settings overrides
//! - [`remote`] - remote `(host, user)` initialization manager
//! - [`events`] - the scheduler's internal event bus
//! - [`config`] - typed, YAML-backed scheduler configuration
//! - [`scheduler`] - the top-level actor tying every component together
//! - [`cli`] - the in-process command API and CLI argument model

pub mod batch;
pub mod broadcast;
pub mod cli;
pub mod config;
pub mod cycling;
pub mod error;
pub mod events;
pub mod pool;
pub mod proxy;
pub mod remote;
pub mod scheduler;
pub mod submit;
pub mod taskdef;

pub use batch::{default_registry, AdapterRegistry, BatchAdapter, DirectiveContext, LocalShellHandler, SlurmAdapter};
pub use broadcast::BroadcastFacade;
pub use cli::{BroadcastCommand, Cli, Command};
pub use config::{SchedulerConfig, SchedulingConfig, SubmissionDefaultsConfig, WorkflowConfig};
pub use cycling::{parse_graph, AtomicPrereq, Calendar, CyclePoint, Duration, Expr, Families, Graph, Sequence, Trigger};
pub use error::{
    ConfigError, GraphParseError, InternalInvariantError, JobPollError, JobSubmitError, RemoteInitError, SchedulerStopping,
    TimeSyntaxError, TimeoutError,
};
pub use events::{Event, EventBus};
pub use pool::{NamedQueue, PoolEvent, ReadyTask, TaskPool};
pub use proxy::{JobSummary, OutputTable, TaskEvent, TaskProxy, TaskStatus};
pub use remote::{HostValue, RemoteInitManager, RemoteKey, RemoteState};
pub use scheduler::{RunDirs, Scheduler, SchedulerCommand, SchedulerHandle};
pub use submit::{render_job_script, IntervalKind, Job, JobScriptContext, PollingSchedule, ProcContext, ProcResult, ProcessPool, Stdin, SubmissionPipeline, SubmitOutcome, SubmitRequest};
pub use taskdef::{RetryPolicy, ScriptFragments, SubmissionConfig, TaskDefinition};
