//! Best-effort status broadcast.
//!
//! Delivery is at-most-once over a bounded channel: a slow or absent
//! subscriber loses events and nothing blocks on that. The job store is the
//! authoritative status source; the channel only saves observers a poll.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use storyforge_types::{JobId, JobStatus};

/// Channel capacity; lagging receivers drop the oldest events.
const CHANNEL_CAPACITY: usize = 64;

/// One observable status change.
#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub job_id: JobId,
    pub status: JobStatus,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

/// Fan-out publisher for [`StatusEvent`]s.
#[derive(Debug, Clone)]
pub struct StatusPublisher {
    tx: broadcast::Sender<StatusEvent>,
}

impl StatusPublisher {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to future status changes. Events published before the call
    /// are not replayed.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    /// Publish a status change. A send with no subscribers is not an error.
    pub fn publish(&self, job_id: &JobId, status: JobStatus, error: Option<String>) {
        let _ = self.tx.send(StatusEvent {
            job_id: job_id.clone(),
            status,
            error,
            at: Utc::now(),
        });
    }
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new()
    }
}
