use std::collections::VecDeque;

/// Sizing of the trailing cumulative-count window for one domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    pub window_seconds: u64,
    pub sample_interval_seconds: u64,
}

impl WindowSpec {
    pub fn from_minutes(window_minutes: u64, sample_interval_seconds: u64) -> Self {
        Self {
            window_seconds: window_minutes.saturating_mul(60),
            sample_interval_seconds: sample_interval_seconds.max(1),
        }
    }

    pub fn disabled() -> Self {
        Self::from_minutes(0, 1)
    }

    pub fn is_enabled(&self) -> bool {
        self.window_seconds > 0
    }

    /// Samples retained: one per interval across the window, plus the sample at its far edge.
    pub fn capacity(&self) -> usize {
        (self.window_seconds / self.sample_interval_seconds.max(1)) as usize + 1
    }

    pub fn window_minutes(&self) -> f64 {
        self.window_seconds as f64 / 60.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowBuffer {
    samples: VecDeque<i64>,
}

impl WindowBuffer {
    pub fn from_samples(samples: impl IntoIterator<Item = i64>) -> Self {
        Self {
            samples: samples.into_iter().collect(),
        }
    }

    pub fn push(&mut self, value: i64, capacity: usize) {
        self.samples.push_back(value);
        while self.samples.len() > capacity.max(1) {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn oldest(&self) -> Option<i64> {
        self.samples.front().copied()
    }

    pub fn samples(&self) -> impl Iterator<Item = i64> + '_ {
        self.samples.iter().copied()
    }

    /// Count increase per minute across a full window. `None` until the buffer has reached
    /// capacity, or when the counter moved backwards (or jumped past `i64` range) inside the
    /// window.
    pub fn trailing_rate(&self, spec: &WindowSpec, current: i64) -> Option<f64> {
        if !spec.is_enabled() || self.samples.len() < spec.capacity() {
            return None;
        }
        let delta = current.checked_sub(self.oldest()?)?;
        if delta < 0 {
            return None;
        }
        Some(delta as f64 / spec.window_minutes())
    }
}
