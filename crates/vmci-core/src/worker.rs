//! Worker liveness records.

use crate::WorkerId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A worker as seen by the dispatcher: only its last heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    /// Unique worker identifier.
    pub id: WorkerId,

    /// Timestamp of the last keep-alive.
    pub last_keep_alive: DateTime<Utc>,
}

impl WorkerRecord {
    /// Create a record with a heartbeat at the current time.
    pub fn new(id: WorkerId) -> Self {
        Self {
            id,
            last_keep_alive: Utc::now(),
        }
    }

    /// Refresh the heartbeat timestamp.
    pub fn touch(&mut self) {
        self.last_keep_alive = Utc::now();
    }

    /// Whether the last heartbeat is within `timeout` of `now`.
    pub fn is_alive(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now.signed_duration_since(self.last_keep_alive) <= timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_alive() {
        let mut worker = WorkerRecord::new(WorkerId::new("w1"));
        let now = Utc::now();
        assert!(worker.is_alive(now, Duration::seconds(180)));

        worker.last_keep_alive = now - Duration::seconds(600);
        assert!(!worker.is_alive(now, Duration::seconds(180)));
    }
}
