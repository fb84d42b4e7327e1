#![allow(dead_code)]

use std::time::Duration;

use bddrun::progress::{ProgressEvent, ProgressSubscription};

pub use bddrun_test_utils::init_tracing;

/// Drain every event already delivered to `sub`.
pub fn drain(sub: &mut ProgressSubscription) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Some(event) = sub.try_recv() {
        events.push(event);
    }
    events
}

/// Collect events until `is_last` accepts one, or `limit` elapses.
pub async fn collect_until<F>(
    sub: &mut ProgressSubscription,
    limit: Duration,
    mut is_last: F,
) -> Vec<ProgressEvent>
where
    F: FnMut(&ProgressEvent) -> bool,
{
    let mut events = Vec::new();
    let _ = tokio::time::timeout(limit, async {
        while let Some(event) = sub.recv().await {
            let done = is_last(&event);
            events.push(event);
            if done {
                break;
            }
        }
    })
    .await;
    events
}

pub fn messages(events: &[ProgressEvent]) -> Vec<&str> {
    events.iter().map(|e| e.message.as_str()).collect()
}
