//! Backoff between resubmissions of throttled or unprocessed writes
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use std::time::Duration;

/// Resubmission budget and delay curve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_resubmissions: u32,
    /// Delay before the first resubmission; doubles after each one
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_resubmissions: 8,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    /// Start a fresh budget, one per batch chunk
    pub fn start(&self) -> Backoff {
        Backoff {
            policy: *self,
            resubmissions: 0,
        }
    }
}

/// Remaining budget of one write
#[derive(Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    resubmissions: u32,
}

impl Backoff {
    /// Delay to wait before the next resubmission; `None` once the budget is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.resubmissions >= self.policy.max_resubmissions {
            return None;
        }

        let factor = 1u32.checked_shl(self.resubmissions).unwrap_or(u32::MAX);
        self.resubmissions += 1;
        Some(self.policy.base_delay.saturating_mul(factor).min(self.policy.max_delay))
    }

    pub fn resubmissions(&self) -> u32 {
        self.resubmissions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double_until_capped() {
        let policy = BackoffPolicy {
            max_resubmissions: 6,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
        };
        let mut backoff = policy.start();

        let delays: Vec<u64> = std::iter::from_fn(|| backoff.next_delay())
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
        assert_eq!(backoff.resubmissions(), 6);
    }

    #[test]
    fn test_exhausted_budget() {
        let mut backoff = BackoffPolicy {
            max_resubmissions: 0,
            ..Default::default()
        }
        .start();
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn test_large_budget_does_not_overflow() {
        let policy = BackoffPolicy {
            max_resubmissions: 40,
            ..Default::default()
        };
        let mut backoff = policy.start();
        let last = std::iter::from_fn(|| backoff.next_delay()).last();
        assert_eq!(last, Some(policy.max_delay));
    }
}
