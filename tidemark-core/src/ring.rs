//! Fixed-capacity FIFO buffer.

use serde::Serialize;
use std::collections::VecDeque;

/// Append-only buffer that keeps the most recent `capacity` items.
///
/// Pushing onto a full buffer drops the oldest item first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RingBuffer<T> {
    #[serde(skip)]
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity),
        }
    }

    /// Build from an iterator, keeping only the last `capacity` items.
    pub fn from_iter_bounded(capacity: usize, iter: impl IntoIterator<Item = T>) -> Self {
        let mut buffer = Self::new(capacity);
        for item in iter {
            buffer.push(item);
        }
        buffer
    }

    /// Append an item, returning the evicted one if the buffer was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
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

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Copy out the contents, oldest first.
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    /// Copy out at most `limit` items, newest first.
    pub fn recent(&self, limit: usize) -> Vec<T> {
        self.items.iter().rev().take(limit).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_push_evicts_oldest_when_full() {
        let mut ring = RingBuffer::new(3);
        assert_eq!(ring.push(1), None);
        assert_eq!(ring.push(2), None);
        assert_eq!(ring.push(3), None);
        assert_eq!(ring.push(4), Some(1));
        assert_eq!(ring.to_vec(), vec![2, 3, 4]);
    }

    #[test]
    fn test_recent_is_newest_first() {
        let ring = RingBuffer::from_iter_bounded(10, 1..=5);
        assert_eq!(ring.recent(2), vec![5, 4]);
    }

    #[test]
    fn test_zero_capacity_is_promoted_to_one() {
        let mut ring = RingBuffer::new(0);
        ring.push("a");
        ring.push("b");
        assert_eq!(ring.to_vec(), vec!["b"]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_length_never_exceeds_capacity(
            capacity in 1usize..50,
            items in proptest::collection::vec(any::<u32>(), 0..200),
        ) {
            let ring = RingBuffer::from_iter_bounded(capacity, items.iter().copied());
            prop_assert!(ring.len() <= capacity);
            let expected: Vec<u32> = items
                .iter()
                .copied()
                .skip(items.len().saturating_sub(capacity))
                .collect();
            prop_assert_eq!(ring.to_vec(), expected);
        }
    }
}
