use std::collections::VecDeque;

/// Fixed-capacity sample buffer for the charts; the oldest sample falls off.
#[derive(Debug, Clone)]
pub struct History<T> {
    samples: VecDeque<T>,
    capacity: usize,
}

impl<T: Copy> History<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: T) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<T> {
        self.samples.back().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.samples.iter().copied()
    }

    /// `(index, value)` points for a chart dataset.
    pub fn points<F>(&self, value: F) -> Vec<(f64, f64)>
    where
        F: Fn(T) -> f64,
    {
        self.iter()
            .enumerate()
            .map(|(i, s)| (i as f64, value(s)))
            .collect()
    }

    /// Largest value seen, never below 1 so axes always have a span.
    pub fn max_by<F>(&self, value: F) -> f64
    where
        F: Fn(T) -> f64,
    {
        self.iter().map(value).fold(1.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_sample_is_dropped_at_capacity() {
        let mut history = History::new(3);
        for v in 1..=5u64 {
            history.push(v);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.iter().collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(history.last(), Some(5));
    }

    #[test]
    fn max_has_a_floor_of_one() {
        let mut history = History::new(4);
        assert_eq!(history.max_by(|v: u64| v as f64), 1.0);
        history.push(0u64);
        assert_eq!(history.max_by(|v| v as f64), 1.0);
        history.push(42);
        assert_eq!(history.max_by(|v| v as f64), 42.0);
    }

    #[test]
    fn points_are_indexed_from_zero() {
        let mut history = History::new(2);
        history.push(7u64);
        history.push(9);
        history.push(11);
        assert_eq!(history.points(|v| v as f64), vec![(0.0, 9.0), (1.0, 11.0)]);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let mut history = History::new(0);
        history.push(1u8);
        history.push(2);
        assert_eq!(history.capacity(), 1);
        assert_eq!(history.last(), Some(2));
    }
}
