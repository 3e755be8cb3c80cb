use std::time::Duration;

use super::backoff::Backoff;

/// Pause after a pass that found nothing to do.
pub const COOLDOWN: Duration = Duration::from_secs(5);

/// Result of one successful reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// One corrective action was applied; more may be needed.
    Changed,
    /// Device already matches the goal state.
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Waiting for a trigger
    Idle,
    /// A pass should run now
    Running,
    /// The last pass failed; retry after the delay
    BackingOff(Duration),
    /// The last pass changed nothing; go idle after the delay
    CoolingDown(Duration),
}

/// Decides what the reconciliation loop does next, independent of any I/O.
#[derive(Debug, Clone)]
pub struct PassScheduler {
    state: SyncState,
    backoff: Backoff,
    cooldown: Duration,
}

impl PassScheduler {
    pub fn new(backoff: Backoff, cooldown: Duration) -> Self {
        Self {
            state: SyncState::Idle,
            backoff,
            cooldown,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// A trigger was received. Only idle schedulers start a pass; otherwise
    /// the trigger stays queued until the loop is idle again.
    pub fn on_trigger(&mut self) -> SyncState {
        if self.state == SyncState::Idle {
            self.state = SyncState::Running;
        }
        self.state
    }

    pub fn on_success(&mut self, outcome: PassOutcome) -> SyncState {
        self.backoff.reset();
        self.state = match outcome {
            PassOutcome::Changed => SyncState::Running,
            PassOutcome::Unchanged => SyncState::CoolingDown(self.cooldown),
        };
        self.state
    }

    /// The failed pass is retried; the trigger that started it is not
    /// consumed by the failure.
    pub fn on_failure(&mut self) -> SyncState {
        self.state = SyncState::BackingOff(self.backoff.next_delay());
        self.state
    }

    /// The backoff or cooldown delay has elapsed.
    pub fn on_wait_elapsed(&mut self) -> SyncState {
        self.state = match self.state {
            SyncState::BackingOff(_) => SyncState::Running,
            SyncState::CoolingDown(_) => SyncState::Idle,
            other => other,
        };
        self.state
    }
}

impl Default for PassScheduler {
    fn default() -> Self {
        Self::new(Backoff::default(), COOLDOWN)
    }
}
