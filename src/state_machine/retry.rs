//! Named retry policies
//!
//! Each table kind carries its own policy so the per-worker retry and backoff
//! conventions are explicit configuration rather than drift.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Handler invocations allowed per state before the task is failed
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Checklist runs poll a slow external API; tolerate a long outage
    pub fn checklist_default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 10_000,
            max_delay_ms: 300_000,
            backoff_multiplier: 2.0,
        }
    }

    pub fn report_default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 30_000,
            max_delay_ms: 600_000,
            backoff_multiplier: 3.0,
        }
    }

    /// Infrastructure jobs must reach teardown, so they retry longest
    pub fn infra_default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 5_000,
            max_delay_ms: 120_000,
            backoff_multiplier: 1.5,
        }
    }

    /// Whether another invocation is allowed after `attempts_used` failures
    pub fn allows_retry(&self, attempts_used: u32) -> bool {
        attempts_used < self.max_attempts
    }

    /// Backoff before retry number `attempt` (1-based), capped at `max_delay_ms`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let raw = self.base_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(format!(
                "backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(format!(
                "max_delay_ms ({}) is below base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            ));
        }
        Ok(())
    }
}
