use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::backoff::{sleep_or_cancelled, Backoff};
use super::scheduler::{PassOutcome, PassScheduler, SyncState};
use super::trigger::{trigger, Trigger, TriggerReceiver};
use crate::device::DeviceError;
use crate::keycloak::KeycloakError;
use crate::models::{AccessUser, Card, Webhook};

/// The card list of the access controller (observed state).
#[async_trait]
pub trait AccessController: Send + Sync {
    async fn list_cards(&self) -> Result<Vec<Card>, DeviceError>;
    async fn add_card(&self, number: i64, name: &str) -> Result<(), DeviceError>;
    async fn remove_card(&self, id: i64) -> Result<(), DeviceError>;
}

/// Source of the authorized users (goal state) and their change webhooks.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn list_users(&self) -> Result<Vec<AccessUser>, KeycloakError>;
    async fn list_webhooks(&self) -> Result<Vec<Webhook>, KeycloakError>;
    async fn create_webhook(&self, webhook: &Webhook) -> Result<(), KeycloakError>;
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("listing users from Keycloak: {0}")]
    ListUsers(#[source] KeycloakError),

    #[error("listing cards from access controller: {0}")]
    ListCards(#[source] DeviceError),

    #[error("removing card {card_id} from controller: {source}")]
    RemoveCard {
        card_id: i64,
        #[source]
        source: DeviceError,
    },

    #[error("adding card for user {user_id}: {source}")]
    AddCard {
        user_id: String,
        #[source]
        source: DeviceError,
    },

    #[error("listing webhooks: {0}")]
    ListWebhooks(#[source] KeycloakError),

    #[error("creating webhook: {0}")]
    CreateWebhook(#[source] KeycloakError),
}

/// The single corrective step of a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    RemoveCard(Card),
    AddCard {
        number: i64,
        name: String,
        user_id: String,
    },
}

/// Picks the next change needed to bring `cards` in line with `goal_users`.
///
/// Stale or misattributed cards are removed before anything is created.
/// Cards with a human-looking name whose keyfob number no user claims are
/// left alone. When several users share a keyfob number the last one
/// listed owns it.
pub fn plan_action(goal_users: &[AccessUser], cards: &[Card]) -> Option<Action> {
    let users_by_keyfob: HashMap<i64, &AccessUser> = goal_users
        .iter()
        .filter(|user| user.keyfob_number > 0)
        .map(|user| (user.keyfob_number, user))
        .collect();

    for card in cards {
        match users_by_keyfob.get(&card.number) {
            None if !card.is_managed() => continue,
            Some(user) if user.card_name() == card.name => continue,
            _ => return Some(Action::RemoveCard(card.clone())),
        }
    }

    let existing: HashSet<i64> = cards.iter().map(|card| card.number).collect();
    goal_users
        .iter()
        .filter(|user| !existing.contains(&user.keyfob_number))
        .find(|user| {
            users_by_keyfob
                .get(&user.keyfob_number)
                .is_some_and(|owner| std::ptr::eq(*owner, *user))
        })
        .map(|user| Action::AddCard {
            number: user.keyfob_number,
            name: user.card_name(),
            user_id: user.id.clone(),
        })
}

/// Converges the device's cards towards Keycloak's authorized group, one
/// change per pass.
pub struct SyncController {
    cards: Arc<dyn AccessController>,
    users: Arc<dyn IdentityProvider>,
    trigger: Trigger,
    receiver: TriggerReceiver,
    scheduler: PassScheduler,
}

impl SyncController {
    /// The controller starts with a trigger pending so it syncs on startup.
    pub fn new(cards: Arc<dyn AccessController>, users: Arc<dyn IdentityProvider>) -> Self {
        let (trigger, receiver) = trigger();
        trigger.post();

        Self {
            cards,
            users,
            trigger,
            receiver,
            scheduler: PassScheduler::default(),
        }
    }

    pub fn with_timing(mut self, backoff: Backoff, cooldown: Duration) -> Self {
        self.scheduler = PassScheduler::new(backoff, cooldown);
        self
    }

    /// Handle for requesting a resync from webhooks and timers.
    pub fn trigger(&self) -> Trigger {
        self.trigger.clone()
    }

    /// Runs one reconciliation pass, applying at most one change.
    pub async fn sync_once(&self) -> Result<PassOutcome, SyncError> {
        let goal_users = self.users.list_users().await.map_err(SyncError::ListUsers)?;
        let cards = self.cards.list_cards().await.map_err(SyncError::ListCards)?;

        match plan_action(&goal_users, &cards) {
            Some(Action::RemoveCard(card)) => {
                self.cards
                    .remove_card(card.id)
                    .await
                    .map_err(|source| SyncError::RemoveCard {
                        card_id: card.id,
                        source,
                    })?;

                tracing::info!(
                    card_id = card.id,
                    keyfob_number = card.number,
                    name = %card.name,
                    "Removed card from the access controller"
                );
                Ok(PassOutcome::Changed)
            }
            Some(Action::AddCard {
                number,
                name,
                user_id,
            }) => {
                self.cards
                    .add_card(number, &name)
                    .await
                    .map_err(|source| SyncError::AddCard {
                        user_id: user_id.clone(),
                        source,
                    })?;

                tracing::info!(
                    keyfob_number = number,
                    user_id = %user_id,
                    "Associated card with user"
                );
                Ok(PassOutcome::Changed)
            }
            None => Ok(PassOutcome::Unchanged),
        }
    }

    /// Registers `{callback_url}/webhook` with Keycloak unless a webhook with
    /// that URL already exists.
    pub async fn ensure_webhook(&self, callback_url: &str) -> Result<(), SyncError> {
        let url = format!("{}/webhook", callback_url.trim_end_matches('/'));

        let hooks = self
            .users
            .list_webhooks()
            .await
            .map_err(SyncError::ListWebhooks)?;
        if hooks.iter().any(|hook| hook.url == url) {
            tracing::debug!(url = %url, "Keycloak webhook already registered");
            return Ok(());
        }

        self.users
            .create_webhook(&Webhook {
                id: None,
                enabled: true,
                url: url.clone(),
                event_types: vec!["admin.*".to_string()],
            })
            .await
            .map_err(SyncError::CreateWebhook)?;

        tracing::info!(url = %url, "Registered Keycloak webhook");
        Ok(())
    }

    /// Reconciles whenever a trigger arrives, until shutdown.
    ///
    /// Shutdown is observed between passes and while sleeping; a pass in
    /// flight always finishes.
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!("Starting card sync controller");

        loop {
            match self.scheduler.state() {
                SyncState::Idle => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        received = self.receiver.recv() => {
                            if received.is_none() {
                                break;
                            }
                            self.scheduler.on_trigger();
                        }
                    }
                }
                SyncState::Running => {
                    if shutdown.is_cancelled() {
                        break;
                    }
                    match self.sync_once().await {
                        Ok(outcome) => {
                            tracing::debug!(?outcome, "Sync pass finished");
                            self.scheduler.on_success(outcome);
                        }
                        Err(e) => {
                            let state = self.scheduler.on_failure();
                            tracing::error!(error = %e, next = ?state, "Sync error");
                        }
                    }
                }
                SyncState::BackingOff(delay) | SyncState::CoolingDown(delay) => {
                    if !sleep_or_cancelled(delay, &shutdown).await {
                        break;
                    }
                    self.scheduler.on_wait_elapsed();
                }
            }
        }

        tracing::info!("Card sync controller stopped");
    }
}
