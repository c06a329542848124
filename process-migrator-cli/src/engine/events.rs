//! Typed events published by the orchestrator
//!
//! Events go out over a broadcast channel; any number of subscribers can
//! listen (terminal renderer, log forwarder, tests) and none of them can
//! block the pipeline. A lagging subscriber drops events, it never stalls
//! the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Log severities mirroring the levels the original tool emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warning,
    Error,
    Verbose,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "event")]
pub enum MigrationEvent {
    /// Coarse progress: one per phase transition plus one per applied
    /// operation
    Progress {
        step: String,
        completed: usize,
        total: usize,
    },
    Log {
        level: EventLevel,
        message: String,
        timestamp: DateTime<Utc>,
    },
    Complete {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Fire-and-forget publisher around a broadcast channel
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<MigrationEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MigrationEvent> {
        self.sender.subscribe()
    }

    /// Send errors (no subscribers) are ignored; publishing never fails
    pub fn publish(&self, event: MigrationEvent) {
        let _ = self.sender.send(event);
    }

    pub fn progress(&self, step: impl Into<String>, completed: usize, total: usize) {
        self.publish(MigrationEvent::Progress {
            step: step.into(),
            completed,
            total,
        });
    }

    pub fn log(&self, level: EventLevel, message: impl Into<String>) {
        self.publish(MigrationEvent::Log {
            level,
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn complete(&self, success: bool, error: Option<String>) {
        self.publish(MigrationEvent::Complete { success, error });
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}
