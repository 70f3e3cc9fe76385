use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

/// Exponential backoff policy driving reconnect attempts for an upstream connection.
///
/// Doubling (or whatever `multiplier` is configured) continues until `max_delay` is reached;
/// the delay resets to `initial_delay` the next time a connection attempt is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
}

impl BackoffPolicy {
    pub fn new(initial_delay: Duration, max_delay: Duration, multiplier: u32) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            multiplier: 2,
        }
    }
}

/// An explicit delay chosen by an error-class override (eg/ upstream rate limiting), bypassing
/// the normal exponential schedule until the override condition no longer applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectWait {
    Backoff,
    Fixed(Duration),
}

/// Tracks the current backoff delay for one upstream connection across repeated reconnect
/// attempts. Not `Clone` - callers own exactly one per connection.
#[derive(Debug)]
pub struct ReconnectState {
    policy: BackoffPolicy,
    current_delay: Duration,
    attempt: u32,
}

impl ReconnectState {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            current_delay: policy.initial_delay,
            policy,
            attempt: 0,
        }
    }

    /// Number of consecutive failed reconnect attempts since the last successful write
    /// acknowledgement.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Reset the backoff schedule. Called once the manager receives a successful subscription
    /// write acknowledgement from the upstream.
    pub fn reset(&mut self) {
        self.current_delay = self.policy.initial_delay;
        self.attempt = 0;
    }

    /// Sleep for the next scheduled delay and advance the schedule, honouring an explicit
    /// override (fixed wait for rate-limit/auth errors) when one applies.
    pub async fn wait(&mut self, wait: ReconnectWait) {
        let delay = match wait {
            ReconnectWait::Backoff => {
                let delay = self.current_delay;
                let next = self.current_delay.saturating_mul(self.policy.multiplier);
                self.current_delay = std::cmp::min(next, self.policy.max_delay);
                delay
            }
            ReconnectWait::Fixed(fixed) => fixed,
        };

        self.attempt += 1;
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn backoff_doubles_and_caps() {
        let policy = BackoffPolicy::new(Duration::from_millis(1), Duration::from_millis(4), 2);
        let mut state = ReconnectState::new(policy);

        assert_eq!(state.current_delay, Duration::from_millis(1));
        state.wait(ReconnectWait::Backoff).await;
        assert_eq!(state.current_delay, Duration::from_millis(2));
        state.wait(ReconnectWait::Backoff).await;
        assert_eq!(state.current_delay, Duration::from_millis(4));
        state.wait(ReconnectWait::Backoff).await;
        assert_eq!(state.current_delay, Duration::from_millis(4), "capped at max_delay");
        assert_eq!(state.attempt(), 3);
    }

    #[tokio::test]
    async fn reset_restores_initial_delay_and_attempt_counter() {
        let policy = BackoffPolicy::new(Duration::from_millis(1), Duration::from_millis(100), 2);
        let mut state = ReconnectState::new(policy);
        state.wait(ReconnectWait::Backoff).await;
        state.wait(ReconnectWait::Backoff).await;
        assert!(state.attempt() > 0);

        state.reset();

        assert_eq!(state.current_delay, Duration::from_millis(1));
        assert_eq!(state.attempt(), 0);
    }

    #[tokio::test]
    async fn fixed_wait_does_not_touch_the_exponential_schedule() {
        let policy = BackoffPolicy::new(Duration::from_millis(5), Duration::from_millis(500), 2);
        let mut state = ReconnectState::new(policy);

        state.wait(ReconnectWait::Fixed(Duration::from_millis(1))).await;

        assert_eq!(state.current_delay, Duration::from_millis(5), "fixed overrides don't mutate backoff state");
        assert_eq!(state.attempt(), 1);
    }
}
