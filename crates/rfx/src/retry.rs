//! 🔁 retry.rs — "Is it ready yet?" "No." "Is it ready yet?" "No." "Is it ready y—" "YES."
//!
//! A bounded-retry-with-backoff primitive. Used by every target during INIT to wait for
//! the cluster to stop being dramatic, and by the batch writer to give a timed-out chunk
//! a second (and third) chance before declaring the target unreachable.
//!
//! ⚠️ Bounded. Always bounded. An unbounded retry loop is just a hang with extra steps.

use std::future::Future;
use std::time::Duration;

use anyhow::{Result, bail};
use serde::Deserialize;
use tracing::{debug, warn};

/// 🎛️ How hard, how often, and how patiently to retry.
///
/// `multiplier = 1.0` gives a fixed interval (the classic "30 attempts, sleep 2s" loop).
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 🔢 total attempts, including the first one. 0 is treated as 1.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// ⏱️ sleep before the second attempt
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,
    /// 📈 growth factor applied after every failed attempt
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// 🧱 the ceiling. backoff stops growing here.
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_interval_ms() -> u64 {
    500
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_interval_ms() -> u64 {
    5_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_interval_ms: default_initial_interval_ms(),
            multiplier: default_multiplier(),
            max_interval_ms: default_max_interval_ms(),
        }
    }
}

impl RetryPolicy {
    /// 🐢 The classic readiness loop: 30 polls, 2 seconds apart, no acceleration.
    pub fn readiness() -> Self {
        Self {
            max_attempts: 30,
            initial_interval_ms: 2_000,
            multiplier: 1.0,
            max_interval_ms: 2_000,
        }
    }

    /// ⏳ Sleep to take after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let grown = self.initial_interval_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped = grown.min(self.max_interval_ms.max(self.initial_interval_ms) as f64);
        Duration::from_millis(capped as u64)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// 🔁 Run `op` until it returns `Ok`, or until the policy runs out of patience.
///
/// `op` receives the 1-based attempt number, mostly so it can put it in a log line.
/// On exhaustion the last error is returned with a context line naming `what`.
pub async fn with_backoff<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts();
    let mut last_error = None;
    for attempt in 1..=attempts {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("✅ {what} came through on attempt {attempt}/{attempts}");
                }
                return Ok(value);
            }
            Err(err) => {
                warn!("🔁 Attempt {attempt}/{attempts}: waiting for {what}... ({err:#})");
                last_error = Some(err);
                if attempt < attempts {
                    tokio::time::sleep(policy.delay_after(attempt)).await;
                }
            }
        }
    }
    match last_error {
        Some(err) => Err(err.context(format!(
            "💀 Gave up on {what} after {attempts} attempts. We asked nicely. Repeatedly."
        ))),
        None => bail!("💀 Gave up on {what} without a single attempt. Impressive, honestly."),
    }
}
