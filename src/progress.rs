// src/progress.rs

//! Progress broadcaster: fan-out of timestamped [`ProgressEvent`]s to any
//! number of live subscribers.
//!
//! Backed by a `tokio::sync::broadcast` channel. Each subscriber sees events
//! in publish order; a subscriber that falls more than `capacity` events
//! behind skips the oldest ones and carries on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Lowest progress value; marks an error, failure, timeout or cancellation.
pub const PROGRESS_ERROR: i32 = -1;
/// Highest progress value; marks terminal completion.
pub const PROGRESS_DONE: i32 = 100;

/// Default per-subscriber buffer.
pub const DEFAULT_CAPACITY: usize = 256;

/// One live update about an execution. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub execution_id: String,
    pub message: String,
    /// In `[-1, 100]`.
    pub progress: i32,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn is_error(&self) -> bool {
        self.progress == PROGRESS_ERROR
    }

    pub fn is_done(&self) -> bool {
        self.progress == PROGRESS_DONE
    }
}

/// Publish side of the progress channel. Share it as `Arc<ProgressBroadcaster>`.
#[derive(Debug)]
pub struct ProgressBroadcaster {
    sender: broadcast::Sender<ProgressEvent>,
}

impl ProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Stamp and deliver an event to every current subscriber.
    ///
    /// Never fails and never blocks: having no subscribers is not an error,
    /// and out-of-range progress values are clamped into `[-1, 100]`.
    pub fn publish(&self, execution_id: &str, message: impl Into<String>, progress: i32) {
        let event = ProgressEvent {
            execution_id: execution_id.to_string(),
            message: message.into(),
            progress: progress.clamp(PROGRESS_ERROR, PROGRESS_DONE),
            timestamp: Utc::now(),
        };

        match self.sender.send(event) {
            Ok(receivers) => {
                trace!(execution_id, progress, receivers, "progress published");
            }
            Err(broadcast::error::SendError(event)) => {
                trace!(
                    execution_id,
                    message = %event.message,
                    "no progress subscribers; event dropped"
                );
            }
        }
    }

    pub fn subscribe(&self) -> ProgressSubscription {
        ProgressSubscription {
            receiver: self.sender.subscribe(),
            filter: None,
        }
    }

    /// Subscribe to events of a single execution only.
    pub fn subscribe_to(&self, execution_id: impl Into<String>) -> ProgressSubscription {
        ProgressSubscription {
            receiver: self.sender.subscribe(),
            filter: Some(execution_id.into()),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Receive side of the progress channel.
#[derive(Debug)]
pub struct ProgressSubscription {
    receiver: broadcast::Receiver<ProgressEvent>,
    filter: Option<String>,
}

impl ProgressSubscription {
    /// Next event, or `None` once the broadcaster is gone.
    ///
    /// Lag is logged and skipped over rather than surfaced.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "progress subscriber lagged; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "progress subscriber lagged; events dropped");
                }
                Err(_) => return None,
            }
        }
    }

    fn accepts(&self, event: &ProgressEvent) -> bool {
        self.filter
            .as_deref()
            .is_none_or(|id| id == event.execution_id)
    }
}
