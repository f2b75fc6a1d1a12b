//! Bounded exponential backoff for signaling reconnects

use crate::config::SignalingConfig;
use crate::errors::ConnectError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub attempts: u32,
    pub delay: Duration,
    pub delay_max: Duration,
    /// Jitter as a fraction of the delay, 0.0-1.0
    pub randomization: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&SignalingConfig::default())
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &SignalingConfig) -> Self {
        Self {
            attempts: config.reconnection_attempts,
            delay: Duration::from_millis(config.reconnection_delay_ms),
            delay_max: Duration::from_millis(config.reconnection_delay_max_ms),
            randomization: config.randomization_factor.clamp(0.0, 1.0),
        }
    }

    /// Un-jittered delay before attempt `attempt` (0-based): `delay * 2^attempt`, capped
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.delay
            .checked_mul(factor)
            .unwrap_or(self.delay_max)
            .min(self.delay_max)
    }

    /// Delay before attempt `attempt` with jitter applied
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.randomization <= 0.0 {
            return base;
        }
        let jitter: f64 = rand::thread_rng().gen_range(-1.0..=1.0) * self.randomization;
        base.mul_f64((1.0 + jitter).max(0.0))
    }

    /// Smallest and largest delay `delay(attempt)` can return
    pub fn delay_bounds(&self, attempt: u32) -> (Duration, Duration) {
        let base = self.base_delay(attempt);
        (
            base.mul_f64(1.0 - self.randomization),
            base.mul_f64(1.0 + self.randomization),
        )
    }
}

/// Run `connect` until it succeeds or the policy runs out of attempts
///
/// Each attempt is preceded by its backoff delay. Giving up yields
/// [`ConnectError::Exhausted`]; there is never an attempt past the bound.
pub async fn retry<T, F, Fut>(policy: &ReconnectPolicy, mut connect: F) -> Result<T, ConnectError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ConnectError>>,
{
    for attempt in 0..policy.attempts {
        let delay = policy.delay(attempt);
        log::debug!(
            "Reconnect attempt {}/{} in {:?}",
            attempt + 1,
            policy.attempts,
            delay
        );
        tokio::time::sleep(delay).await;

        match connect(attempt).await {
            Ok(value) => {
                log::info!("Reconnected on attempt {}", attempt + 1);
                return Ok(value);
            }
            Err(e) => log::warn!("Reconnect attempt {} failed: {}", attempt + 1, e),
        }
    }

    Err(ConnectError::Exhausted {
        attempts: policy.attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            attempts,
            delay: Duration::from_millis(1),
            delay_max: Duration::from_millis(4),
            randomization: 0.5,
        }
    }

    #[test]
    fn test_default_backoff_schedule() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.attempts, 5);
        let schedule: Vec<u64> = (0..6)
            .map(|n| policy.base_delay(n).as_millis() as u64)
            .collect();
        assert_eq!(schedule, vec![100, 200, 400, 800, 1000, 1000]);
        assert_eq!(policy.base_delay(40), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = ReconnectPolicy::default();
        for attempt in 0..5 {
            let (low, high) = policy.delay_bounds(attempt);
            for _ in 0..200 {
                let d = policy.delay(attempt);
                assert!(d >= low && d <= high, "{:?} outside {:?}..{:?}", d, low, high);
            }
        }
        let (low, high) = policy.delay_bounds(0);
        assert!((low.as_secs_f64() - 0.050).abs() < 1e-6);
        assert!((high.as_secs_f64() - 0.150).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_bound() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry(&fast_policy(5), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ConnectError::Transport("refused".into())) }
        })
        .await;

        assert!(matches!(result, Err(ConnectError::Exhausted { attempts: 5 })));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_retry_returns_first_success() {
        let calls = AtomicU32::new(0);
        let result = retry(&fast_policy(5), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(ConnectError::Transport("refused".into()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
