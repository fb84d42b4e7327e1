// src/engine/ids.rs

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

/// Prefix of generated execution ids.
pub const ID_PREFIX: &str = "exec_";

/// Generates `exec_<millis>` ids that are strictly increasing for the
/// lifetime of the generator, even when several are drawn in the same
/// millisecond.
#[derive(Debug, Default)]
pub struct ExecutionIdGenerator {
    last: AtomicU64,
}

impl ExecutionIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        let mut token = now;
        // fetch_update retries until our candidate wins the race.
        let _ = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                token = now.max(last + 1);
                Some(token)
            });
        format!("{ID_PREFIX}{token}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_have_prefix_and_increase() {
        let ids = ExecutionIdGenerator::new();
        let a = ids.next_id();
        let b = ids.next_id();
        assert!(a.starts_with(ID_PREFIX));
        let na: u64 = a[ID_PREFIX.len()..].parse().unwrap();
        let nb: u64 = b[ID_PREFIX.len()..].parse().unwrap();
        assert!(nb > na);
    }
}
