//! Reconnect policy for channel establishment.
//!
//! [`ReconnectPolicy::Terminal`] is the default: the first failed connect
//! ends the session. [`ReconnectPolicy::ExponentialBackoff`] retries with
//! doubling delays up to a cap, for a bounded number of retries.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectPolicy {
    /// Fail on the first connect error.
    #[default]
    Terminal,
    /// Retry with `initial_delay * 2^attempt`, capped at `max_delay`.
    ExponentialBackoff {
        initial_delay: Duration,
        max_delay: Duration,
        max_retries: u32,
    },
}

impl ReconnectPolicy {
    pub fn exponential(initial_delay: Duration, max_delay: Duration, max_retries: u32) -> Self {
        Self::ExponentialBackoff {
            initial_delay,
            max_delay,
            max_retries,
        }
    }

    /// Delay before retry number `attempt` (0-based), or `None` to give up.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        match *self {
            ReconnectPolicy::Terminal => None,
            ReconnectPolicy::ExponentialBackoff {
                initial_delay,
                max_delay,
                max_retries,
            } => {
                if attempt >= max_retries {
                    return None;
                }
                let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
                Some(initial_delay.saturating_mul(factor).min(max_delay))
            }
        }
    }

    pub fn max_retries(&self) -> u32 {
        match *self {
            ReconnectPolicy::Terminal => 0,
            ReconnectPolicy::ExponentialBackoff { max_retries, .. } => max_retries,
        }
    }
}
