//! Per-artifact download bookkeeping.
//!
//! Each model name has one slot. Holding the slot is what makes a transfer,
//! or a delete, exclusive for that name; a transfer started under the slot
//! also leaves a cancellation token here for as long as the slot is held.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;

use crate::ModelName;

type Running = Arc<Mutex<HashMap<ModelName, CancellationToken>>>;

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Slots and cancellation tokens of in-flight downloads, keyed by name.
#[derive(Debug, Default)]
pub struct DownloadTracker {
    slots: Mutex<HashMap<ModelName, Arc<tokio::sync::Mutex<()>>>>,
    running: Running,
}

impl DownloadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until nobody else holds the slot of `name`, then take it.
    pub async fn acquire(&self, name: ModelName) -> DownloadSlot {
        let slot = Arc::clone(guard(&self.slots).entry(name).or_default());
        let held = slot.lock_owned().await;
        DownloadSlot {
            name,
            running: Arc::clone(&self.running),
            token: None,
            _held: held,
        }
    }

    /// Whether a transfer of `name` is running under its slot.
    pub fn is_running(&self, name: ModelName) -> bool {
        guard(&self.running).contains_key(&name)
    }

    /// Ask the running transfer of `name` to stop.
    ///
    /// Returns false if nothing was running.
    pub fn cancel(&self, name: ModelName) -> bool {
        match guard(&self.running).get(&name) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Exclusive hold on one name's slot.
///
/// Dropping it, including when the owning future is dropped mid-transfer,
/// clears the transfer registration before the slot is released.
#[derive(Debug)]
pub struct DownloadSlot {
    name: ModelName,
    running: Running,
    token: Option<CancellationToken>,
    _held: OwnedMutexGuard<()>,
}

impl DownloadSlot {
    /// Register a transfer under this slot and return its cancellation token.
    pub fn begin_transfer(&mut self) -> CancellationToken {
        let token = self
            .token
            .get_or_insert_with(CancellationToken::new)
            .clone();
        guard(&self.running).insert(self.name, token.clone());
        token
    }
}

impl Drop for DownloadSlot {
    fn drop(&mut self) {
        if self.token.take().is_some() {
            guard(&self.running).remove(&self.name);
        }
    }
}
