//! Generic persisted state management and the runtime broadcast override
//! store, factored out of the scheduler core so both can be unit-tested
//! (and reused) independently of cycle-point semantics.

mod broadcast;
mod error;
mod record;
mod store;

pub use broadcast::{BadOptions, BroadcastChange, BroadcastStore, WILDCARD_CYCLE};
pub use error::StoreError;
pub use record::{Filter, FilterOp, IndexValue, Record};
pub use store::{now_ms, Store};
