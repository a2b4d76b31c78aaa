use std::time::Duration;

use log::{debug, warn};

use crate::transport::DisconnectReason;

/// Capped exponential backoff with jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub base: Duration,
    /// Upper bound of the delay, jitter excluded
    pub max: Duration,
    /// Maximum random offset added to or removed from the delay
    pub jitter: Duration,
    /// A session open at least this long resets the attempt counter
    pub reset_after: Duration,
}

impl BackoffPolicy {
    /// Delay before retry number `attempt`, starting at 0.
    ///
    /// `min(max, base * 2^attempt)`, moved by a random offset in `[-jitter, jitter]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let delay = self.base.saturating_mul(factor).min(self.max);

        if self.jitter.is_zero() {
            return delay;
        }

        let jitter = self.jitter.as_millis() as u64;
        let offset = fastrand::u64(0..=jitter.saturating_mul(2));
        if offset >= jitter {
            delay.saturating_add(Duration::from_millis(offset - jitter))
        } else {
            delay.saturating_sub(Duration::from_millis(jitter - offset))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Start a new session after the delay
    Reconnect(Duration),
    /// Stop for good
    Terminate,
}

/// Decides what follows the end of a session.
pub struct ReconnectController {
    policy: BackoffPolicy,
    attempt: u32,
}

impl ReconnectController {
    pub fn new(policy: BackoffPolicy) -> Self {
        ReconnectController { policy, attempt: 0 }
    }

    /// Decides what to do after a session ended.
    ///
    /// # Arguments
    ///
    /// * `reason` - why the session closed, `None` when it could not be built
    /// * `open_for` - how long the session stayed open, `None` if it never opened
    pub fn decide(
        &mut self,
        reason: Option<DisconnectReason>,
        open_for: Option<Duration>,
    ) -> Decision {
        if let Some(reason) = reason
            && reason.is_permanent()
        {
            warn!("session ended for good: {}", reason);
            return Decision::Terminate;
        }

        if let Some(open_for) = open_for
            && open_for >= self.policy.reset_after
        {
            debug!("session stayed open {:?}, reset backoff", open_for);
            self.attempt = 0;
        }

        let delay = self.policy.delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        Decision::Reconnect(delay)
    }
}
