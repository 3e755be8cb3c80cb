use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Retry delay that grows by half of itself after every consecutive
/// failure, up to a ceiling.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub const INITIAL: Duration = Duration::from_millis(250);
    pub const MAX: Duration = Duration::from_secs(60 * 60);

    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: Duration::ZERO,
        }
    }

    /// Delay before the next attempt; each call counts one more failure.
    pub fn next_delay(&mut self) -> Duration {
        if self.current.is_zero() {
            self.current = self.initial;
        }
        self.current += self.current / 2;
        self.current = self.current.min(self.max);
        self.current
    }

    pub fn reset(&mut self) {
        self.current = Duration::ZERO;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Self::INITIAL, Self::MAX)
    }
}

/// Sleeps for `duration` unless shutdown is requested first.
///
/// Returns false when the sleep was cut short by shutdown.
pub async fn sleep_or_cancelled(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
