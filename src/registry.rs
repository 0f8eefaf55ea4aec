//! Registry of running instances keyed by descriptor id.
//!
//! Each id owns a slot (`OnceCell`) handed out under a mutex, so concurrent
//! callers asking for the same id agree on a single slot. Whoever
//! initializes the slot launches the container; everyone else waits for it
//! and gets the same [`InstanceStore`]. A failed initialization leaves the
//! slot empty for a later retry. Entries are never evicted.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::OnceCell;

use crate::store::InstanceStore;

type Slot = Arc<OnceCell<Arc<InstanceStore>>>;

/// Shared map from descriptor id to running instance.
#[derive(Debug, Default)]
pub struct Registry {
    slots: Mutex<HashMap<String, Slot>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn slot(&self, id: &str) -> Slot {
        self.lock()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// The registered instance for `id`, if one finished launching.
    pub fn get(&self, id: &str) -> Option<Arc<InstanceStore>> {
        self.lock().get(id).and_then(|slot| slot.get().cloned())
    }

    /// Register `store` under `id` unless something is already there.
    ///
    /// Returns whichever instance ends up registered.
    pub fn set(&self, id: &str, store: Arc<InstanceStore>) -> Arc<InstanceStore> {
        let slot = self.slot(id);
        match slot.set(store.clone()) {
            Ok(()) => store,
            Err(_) => slot.get().cloned().unwrap_or(store),
        }
    }

    /// Return the instance for `id`, running `launch` only if none exists.
    ///
    /// Concurrent calls for the same id run `launch` at most once; the
    /// others wait and receive its result. The boolean is `true` for the
    /// caller whose `launch` produced the instance.
    pub async fn get_or_launch<F, Fut, E>(
        &self,
        id: &str,
        launch: F,
    ) -> Result<(Arc<InstanceStore>, bool), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<InstanceStore>, E>>,
    {
        let slot = self.slot(id);
        let mut launched = false;
        let flag = &mut launched;
        let store = slot
            .get_or_try_init(move || async move {
                let store = launch().await?;
                *flag = true;
                Ok(store)
            })
            .await?
            .clone();
        Ok((store, launched))
    }

    /// Every registered instance.
    pub fn stores(&self) -> Vec<Arc<InstanceStore>> {
        self.lock()
            .values()
            .filter_map(|slot| slot.get().cloned())
            .collect()
    }

    /// Number of registered instances.
    pub fn len(&self) -> usize {
        self.lock().values().filter(|slot| slot.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
