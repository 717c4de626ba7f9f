//! Job submission pipeline: job/polling records, the bounded process pool,
//! job-script emission, and the pipeline tying them together.

pub mod job;
pub mod jobscript;
pub mod pipeline;
pub mod process_pool;

pub use job::{IntervalKind, Job, PollingSchedule};
pub use jobscript::{render_job_script, JobScriptContext};
pub use pipeline::{SubmissionPipeline, SubmitOutcome, SubmitRequest};
pub use process_pool::{ProcContext, ProcResult, ProcessPool, Stdin};
