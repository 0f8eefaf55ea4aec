//! Container expiration.
//!
//! Two mechanisms back the hard lifetime of a launched container:
//!
//! - An in-process timer per container that removes it once its TTL passes.
//!   Purging a container cancels its timer.
//! - The `testrc.expires-at` label. Timers die with the process, so every
//!   new engine connection reaps labelled containers whose deadline has
//!   passed. A crashed run's leftovers are removed by the next run.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::AbortHandle;

use crate::engine::LABEL_EXPIRES_AT;

/// Pending expiration timers keyed by container id.
#[derive(Debug, Clone, Default)]
pub(crate) struct ExpiryTimers {
    handles: Arc<Mutex<HashMap<String, AbortHandle>>>,
}

impl ExpiryTimers {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, AbortHandle>> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `on_expire` after `ttl` unless cancelled first. Replaces any
    /// timer already pending for `id`.
    pub(crate) fn schedule<F>(&self, id: String, ttl: Duration, on_expire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let timers = self.clone();
        let key = id.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            timers.lock().remove(&key);
            on_expire.await;
        });

        if let Some(previous) = self.lock().insert(id, task.abort_handle()) {
            previous.abort();
        }
    }

    /// Cancel the timer for `id`. Returns whether one was pending.
    pub(crate) fn cancel(&self, id: &str) -> bool {
        match self.lock().remove(id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.lock().len()
    }
}

/// Whether a container's `testrc.expires-at` label lies before `now`.
///
/// Containers without the label, or with an unparseable one, are never
/// considered expired.
pub fn label_expired(labels: Option<&HashMap<String, String>>, now: DateTime<Utc>) -> bool {
    labels
        .and_then(|l| l.get(LABEL_EXPIRES_AT))
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .is_some_and(|deadline| deadline.with_timezone(&Utc) <= now)
}
