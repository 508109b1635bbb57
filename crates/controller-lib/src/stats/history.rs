//! Fixed-capacity load window per uplink

use serde::Serialize;
use std::collections::VecDeque;

/// Recent byte-rate observations of one uplink, oldest first.
///
/// Never holds more than `capacity` samples; pushing into a full window
/// evicts the oldest sample.
#[derive(Debug, Clone, Serialize)]
pub struct PathHistory {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl PathHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, byte_rate: f64) {
        if self.capacity == 0 {
            return;
        }
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(byte_rate);
    }

    /// Samples in oldest-first order
    pub fn to_vec(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest_when_full() {
        let mut history = PathHistory::new(3);
        for value in [1.0, 2.0, 3.0, 4.0, 5.0] {
            history.push(value);
            assert!(history.len() <= 3);
        }
        assert_eq!(history.to_vec(), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_zero_capacity_stays_empty() {
        let mut history = PathHistory::new(0);
        history.push(1.0);
        assert!(history.is_empty());
        assert_eq!(history.len(), 0);
    }
}
