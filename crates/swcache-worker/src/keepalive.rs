//! Keep-alive handles for work that outlives a response.

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::warn;

/// Handle carried by every dispatched event.
///
/// Background work registered through [`wait_until`](Self::wait_until)
/// keeps running after the response has been handed back; the host awaits
/// [`settled`](Self::settled) before tearing the worker down.
#[derive(Debug, Clone, Default)]
pub struct ExtendableEvent {
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl ExtendableEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `work` and extend the event's lifetime until it finishes.
    pub fn wait_until<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(work);
        self.lock().push(handle);
    }

    /// Number of registered tasks not yet collected by `settled`.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Wait for every registered task, including tasks registered while
    /// waiting.
    pub async fn settled(&self) {
        loop {
            let batch: Vec<JoinHandle<()>> = std::mem::take(&mut *self.lock());
            if batch.is_empty() {
                return;
            }
            for handle in batch {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Background task did not complete");
                }
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
