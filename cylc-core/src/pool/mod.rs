//! The task pool: proxy ownership, dependency negotiation, runahead
//! gating, and named queues (spec §4.3).

pub mod queue;
pub mod task_pool;

pub use queue::{NamedQueue, DEFAULT_QUEUE};
pub use task_pool::{PoolEvent, ReadyTask, TaskPool};
