use std::collections::VecDeque;

/// Bounded FIFO. Pushing into a full history evicts the oldest entry, so
/// `len()` never exceeds `capacity()`.
#[derive(Debug, Clone)]
pub struct RollingHistory<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RollingHistory<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `item`, returning the evicted oldest entry if the history was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl RollingHistory<f32> {
    pub fn mean(&self) -> Option<f32> {
        if self.items.is_empty() {
            return None;
        }
        Some(self.items.iter().sum::<f32>() / self.items.len() as f32)
    }
}
