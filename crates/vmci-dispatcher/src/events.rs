//! Fan-out of task lifecycle events to live subscribers.

use tokio::sync::broadcast;
use tracing::trace;

use vmci_core::{TaskEvent, TaskEventKind, TaskId};

/// Default number of events a slow subscriber may fall behind.
pub const DEFAULT_CAPACITY: usize = 256;

/// Broadcast hub for [`TaskEvent`]s.
///
/// Publishing never blocks and never fails; events published while nobody
/// is subscribed are dropped.
#[derive(Debug, Clone)]
pub struct EventHub {
    sender: broadcast::Sender<TaskEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, task_id: &TaskId, kind: TaskEventKind) {
        let event = TaskEvent::new(task_id.clone(), kind);
        let receivers = self.sender.send(event).unwrap_or(0);
        trace!(task_id = %task_id, ?kind, receivers, "Published task event");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
