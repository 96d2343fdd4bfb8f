// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::time::Duration;

/// Exponential backoff between restarts of a persistent task.
#[derive(Debug, Clone, PartialEq)]
pub struct RestartPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Consecutive failed restarts before the task is given up on.
    /// `None` retries forever.
    pub max_restarts: Option<u32>,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_restarts: None,
        }
    }
}

impl RestartPolicy {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            attempt: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RestartPolicy,
    attempt: u32,
}

impl Backoff {
    /// Delay before the next restart, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.policy.max_restarts {
            if self.attempt >= max {
                return None;
            }
        }
        // Capped exponent keeps powi finite; the min() below caps the delay.
        let exponent = self.attempt.min(64) as i32;
        let scaled =
            self.policy.initial_delay.as_nanos() as f64 * self.policy.multiplier.powi(exponent);
        let nanos = scaled.round().min(self.policy.max_delay.as_nanos() as f64);
        self.attempt = self.attempt.saturating_add(1);
        Some(Duration::from_nanos(nanos as u64))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_restarts: Option<u32>) -> RestartPolicy {
        RestartPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            max_restarts,
        }
    }

    #[test]
    fn delays_grow_and_cap() {
        let mut backoff = policy(None).backoff();
        let delays: Vec<_> = (0..6).map(|_| backoff.next_delay().unwrap()).collect();
        assert_eq!(
            delays,
            [100, 200, 400, 800, 1000, 1000].map(Duration::from_millis)
        );
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = policy(None).backoff();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn budget_is_enforced() {
        let mut backoff = policy(Some(2)).backoff();
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn huge_attempt_counts_stay_at_the_cap() {
        let mut backoff = policy(None).backoff();
        for _ in 0..500 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(1000)));
    }
}
