// =============================================================================
// BoundedSeries — fixed-capacity, oldest-first-evicting sequence
// =============================================================================
//
// Shared storage for candle and score buffers.  The series never holds more
// than `capacity` elements: every append that overflows evicts from the front.
// Ordering rules (replace-on-equal, reject-older) belong to the callers; this
// type only enforces the length bound.
// =============================================================================

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct BoundedSeries<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> BoundedSeries<T> {
    /// Create an empty series. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Build a series from already-ordered items, keeping only the last
    /// `capacity` of them.
    pub fn from_ordered(items: Vec<T>, capacity: usize) -> Self {
        let mut series = Self::new(capacity);
        let skip = items.len().saturating_sub(series.capacity);
        series.items.extend(items.into_iter().skip(skip));
        series
    }

    /// Append `item`, then evict from the front until the length is back
    /// within capacity. Returns the number of evicted elements.
    pub fn push_evicting(&mut self, item: T) -> usize {
        self.items.push_back(item);
        let mut evicted = 0;
        while self.items.len() > self.capacity {
            self.items.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Overwrite the newest element. Returns `false` when the series is empty.
    pub fn replace_last(&mut self, item: T) -> bool {
        match self.items.back_mut() {
            Some(last) => {
                *last = item;
                true
            }
            None => false,
        }
    }

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Oldest-first copy of the contents.
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}
