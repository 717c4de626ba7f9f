//! Event bus: central pub/sub for scheduler activity. Every state
//! transition, job submission, and broadcast write emits an `Event`;
//! consumers (logging, a future TUI/RPC surface) subscribe independently.
//! Unifies the source's scattered callbacks under one typed enum (§9).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::proxy::TaskStatus;

/// Default channel capacity (events).
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// The vocabulary of scheduler activity.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    TaskStateChanged {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },
    TaskMessage {
        task_id: String,
        message: String,
    },
    TaskSpawned {
        task_id: String,
        parent_id: String,
    },
    TaskReaped {
        task_id: String,
    },
    JobSubmitted {
        task_id: String,
        batch_system: String,
    },
    JobSubmitFailed {
        task_id: String,
        reason: String,
    },
    BroadcastApplied {
        cycle: String,
        namespace: String,
    },
    BroadcastCleared {
        cycle: String,
        namespace: String,
    },
    RemoteInitStateChanged {
        host: String,
        user: String,
        state: String,
    },
    WorkflowStalled {
        reason: String,
    },
    SchedulerStopping {
        reason: String,
    },
}

impl Event {
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::TaskStateChanged { .. } => "task_state_changed",
            Event::TaskMessage { .. } => "task_message",
            Event::TaskSpawned { .. } => "task_spawned",
            Event::TaskReaped { .. } => "task_reaped",
            Event::JobSubmitted { .. } => "job_submitted",
            Event::JobSubmitFailed { .. } => "job_submit_failed",
            Event::BroadcastApplied { .. } => "broadcast_applied",
            Event::BroadcastCleared { .. } => "broadcast_cleared",
            Event::RemoteInitStateChanged { .. } => "remote_init_state_changed",
            Event::WorkflowStalled { .. } => "workflow_stalled",
            Event::SchedulerStopping { .. } => "scheduler_stopping",
        }
    }
}

/// Central event bus for scheduler activity streaming.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Fire-and-forget: if there are no subscribers, the event is dropped.
    pub fn emit(&self, event: Event) {
        debug!(event_type = event.event_type(), "EventBus::emit");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}
