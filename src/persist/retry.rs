use rand::Rng;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;

/// Exponential backoff with symmetric jitter: `base * 2^n`, capped at `max`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_pct: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay_ms: u64, max_delay_ms: u64, jitter_pct: f64) -> Self {
        let base_delay_ms = base_delay_ms.max(1);
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            max_delay_ms: max_delay_ms.max(base_delay_ms),
            jitter_pct: jitter_pct.clamp(0.0, 1.0),
        }
    }

    // Re-applies the clamps after deserialization.
    pub fn normalized(&self) -> Self {
        Self::new(self.max_attempts, self.base_delay_ms, self.max_delay_ms, self.jitter_pct)
    }

    pub fn delay_for(&self, retry: usize) -> Duration {
        let factor = 2u64.saturating_pow(retry.min(63) as u32);
        let capped = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        let spread = (capped as f64 * self.jitter_pct) as i64;
        let delay = if spread > 0 {
            capped.saturating_add_signed(rand::thread_rng().gen_range(-spread..=spread))
        } else {
            capped
        };
        Duration::from_millis(delay)
    }

    /// Runs `op` until it succeeds or `max_attempts` is used up; the last error is returned.
    /// `op` receives the zero-based attempt number.
    pub async fn retry_async<F, Fut, T, E>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 >= self.max_attempts => return Err(err),
                Err(_) => {
                    tokio::time::sleep(self.delay_for(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, 250, 5_000, 0.2)
    }
}
