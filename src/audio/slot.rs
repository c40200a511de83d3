use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Single-value hand-off between the analysis thread and a consumer.
/// Publishing overwrites any unread value; the consumer only ever sees the
/// newest one.
#[derive(Debug)]
pub struct LatestSlot<T> {
    value: Arc<Mutex<Option<T>>>,
    dropped: Arc<AtomicU64>,
}

impl<T> Clone for LatestSlot<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            dropped: Arc::clone(&self.dropped),
        }
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            value: Arc::new(Mutex::new(None)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        // the Option is always whole, even after a writer panicked
        self.value.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn publish(&self, value: T) {
        if self.lock().replace(value).is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn take(&self) -> Option<T> {
        self.lock().take()
    }

    /// Values overwritten before anyone took them.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<T: Clone> LatestSlot<T> {
    pub fn latest(&self) -> Option<T> {
        self.lock().clone()
    }
}
