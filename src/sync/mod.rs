// Reconciliation of the device's card list against Keycloak group membership

pub mod backoff;
pub mod controller;
pub mod scheduler;
pub mod trigger;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::Backoff;
pub use controller::{plan_action, AccessController, Action, IdentityProvider, SyncController, SyncError};
pub use scheduler::{PassOutcome, PassScheduler, SyncState};
pub use trigger::{post_periodically, trigger, Trigger, TriggerReceiver};
