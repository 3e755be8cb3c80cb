use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Requests a resync. At most one request is ever pending: posting while
/// one is already queued does nothing.
#[derive(Debug, Clone)]
pub struct Trigger {
    tx: mpsc::Sender<()>,
}

#[derive(Debug)]
pub struct TriggerReceiver {
    rx: mpsc::Receiver<()>,
}

/// Creates a single-slot coalescing trigger.
pub fn trigger() -> (Trigger, TriggerReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (Trigger { tx }, TriggerReceiver { rx })
}

impl Trigger {
    /// Returns false if a resync was already pending (or nobody is
    /// listening any more).
    pub fn post(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => false,
            Err(TrySendError::Closed(())) => {
                tracing::debug!("Resync trigger posted after the controller stopped");
                false
            }
        }
    }
}

impl TriggerReceiver {
    /// Waits for a pending trigger. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<()> {
        self.rx.recv().await
    }

    #[cfg(test)]
    pub fn try_recv(&mut self) -> bool {
        self.rx.try_recv().is_ok()
    }
}

/// Posts a trigger every `interval` until shutdown.
pub async fn post_periodically(trigger: Trigger, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // The first tick completes immediately; startup already posted a trigger.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                if trigger.post() {
                    tracing::debug!("Periodic resync requested");
                }
            }
        }
    }
}
