use std::time::Duration;

/// Default reconnect delays; the last one repeats once the rest are used up.
pub const DEFAULT_STEPS: &[Duration] = &[
    Duration::ZERO,
    Duration::from_millis(100),
    Duration::from_millis(500),
    Duration::from_secs(1),
    Duration::from_secs(5),
];

/// Bounded reconnect schedule that never gives up.
#[derive(Debug, Clone)]
pub struct Backoff {
    steps: Vec<Duration>,
    attempt: usize,
}

impl Backoff {
    /// `steps` must not be empty; an empty schedule retries immediately.
    pub fn new(steps: &[Duration]) -> Self {
        Self {
            steps: steps.to_vec(),
            attempt: 0,
        }
    }

    /// Delay before the next attempt, advancing the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self
            .steps
            .get(self.attempt)
            .or_else(|| self.steps.last())
            .copied()
            .unwrap_or(Duration::ZERO);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Start over from the first step after a healthy session.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_STEPS)
    }
}
