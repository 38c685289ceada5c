//! Fixed-capacity FIFO series.

use std::collections::VecDeque;

/// An ordered series that keeps at most `capacity` items, dropping the
/// oldest first.
#[derive(Debug, Clone)]
pub struct BoundedSeries<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedSeries<T> {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an item, returning the evicted one if the series was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        self.items.push_back(item);
        if self.items.len() > self.capacity {
            self.items.pop_front()
        } else {
            None
        }
    }

    /// Replace the contents with the newest `capacity` items of `items`.
    pub fn reset_from<I>(&mut self, items: I)
    where
        I: IntoIterator<Item = T>,
    {
        self.items.clear();
        for item in items {
            self.push(item);
        }
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

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T: Clone> BoundedSeries<T> {
    /// Copy out the current contents, oldest first.
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_past_capacity() {
        let mut series = BoundedSeries::new(3);
        assert_eq!(series.push(1), None);
        assert_eq!(series.push(2), None);
        assert_eq!(series.push(3), None);
        assert_eq!(series.push(4), Some(1));
        assert_eq!(series.to_vec(), vec![2, 3, 4]);
        assert_eq!(series.last(), Some(&4));
    }

    #[test]
    fn zero_capacity_keeps_one() {
        let mut series = BoundedSeries::new(0);
        series.push("a");
        series.push("b");
        assert_eq!(series.capacity(), 1);
        assert_eq!(series.to_vec(), vec!["b"]);
    }

    #[test]
    fn reset_keeps_newest() {
        let mut series = BoundedSeries::new(2);
        series.push(100);
        series.reset_from(1..=5);
        assert_eq!(series.to_vec(), vec![4, 5]);
    }
}
