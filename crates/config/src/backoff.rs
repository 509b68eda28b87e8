//! Exponential backoff capped at a ceiling.
use std::time::Duration;

use nsgate_model::BackoffConfig;

#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    ceiling: Duration,
    multiplier: f64,
    current: Option<Duration>,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            initial: config.initial(),
            ceiling: config.ceiling(),
            multiplier: config.multiplier.max(1.0),
            current: None,
            attempts: 0,
        }
    }

    /// Delay to wait before the next attempt: `initial`, `initial * multiplier`, ... up to `ceiling`.
    pub fn next_delay(&mut self) -> Duration {
        let next = match self.current {
            None => self.initial.min(self.ceiling),
            Some(current) => Duration::try_from_secs_f64(current.as_secs_f64() * self.multiplier).map_or(self.ceiling, |next| next.min(self.ceiling)),
        };
        self.current = Some(next);
        self.attempts = self.attempts.saturating_add(1);
        next
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.attempts = 0;
    }

    /// Number of delays handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
