use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Fixed-capacity FIFO that evicts the oldest value once full.
#[derive(Clone, Debug)]
pub struct RingBuffer<T> {
    data: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: T) {
        if self.data.len() == self.capacity {
            self.data.pop_front();
        }
        self.data.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.data.iter()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

impl RingBuffer<f64> {
    pub fn mean(&self) -> Option<f64> {
        if self.data.is_empty() {
            return None;
        }
        Some(self.data.iter().sum::<f64>() / self.data.len() as f64)
    }

    /// Bessel-corrected variance, defined for two or more values.
    pub fn sample_variance(&self) -> Option<f64> {
        let n = self.data.len();
        if n < 2 {
            return None;
        }
        let mean = self.mean()?;
        let sum_sq: f64 = self.data.iter().map(|v| (v - mean) * (v - mean)).sum();
        Some((sum_sq / (n - 1) as f64).max(0.0))
    }

    /// Divide-by-n variance.
    pub fn population_variance(&self) -> Option<f64> {
        let mean = self.mean()?;
        let sum_sq: f64 = self.data.iter().map(|v| (v - mean) * (v - mean)).sum();
        Some((sum_sq / self.data.len() as f64).max(0.0))
    }
}

/// Monotonic instants trimmed to a trailing time window.
#[derive(Clone, Debug)]
pub struct RateWindow {
    instants: VecDeque<Instant>,
    window: Duration,
}

impl RateWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            instants: VecDeque::new(),
            window,
        }
    }

    pub fn push(&mut self, at: Instant) {
        self.instants.push_back(at);
    }

    /// Drops instants whose age at `now` exceeds the window and returns how many remain.
    pub fn count_at(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.instants.len()
    }

    pub fn len(&self) -> usize {
        self.instants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instants.is_empty()
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.instants.front() {
            if now.saturating_duration_since(*front) > self.window {
                self.instants.pop_front();
            } else {
                break;
            }
        }
    }
}
