//! In-memory stand-ins for the device and Keycloak.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{AccessController, IdentityProvider};
use crate::device::DeviceError;
use crate::keycloak::KeycloakError;
use crate::models::{AccessUser, Card, Webhook};

#[derive(Default)]
pub struct FakeAccessController {
    cards: Mutex<BTreeMap<i64, Card>>,
    next_id: Mutex<i64>,
    list_failures: Mutex<usize>,
}

impl FakeAccessController {
    pub fn cards(&self) -> BTreeMap<i64, Card> {
        self.cards.lock().unwrap().clone()
    }

    pub fn insert(&self, id: i64, number: i64, name: &str) {
        self.cards.lock().unwrap().insert(
            id,
            Card {
                id,
                number,
                name: name.to_string(),
            },
        );
    }

    /// Makes the next `count` card listings fail.
    pub fn fail_listing(&self, count: usize) {
        *self.list_failures.lock().unwrap() = count;
    }
}

#[async_trait]
impl AccessController for FakeAccessController {
    async fn list_cards(&self) -> Result<Vec<Card>, DeviceError> {
        {
            let mut failures = self.list_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(DeviceError::Closed);
            }
        }
        Ok(self.cards.lock().unwrap().values().cloned().collect())
    }

    async fn add_card(&self, number: i64, name: &str) -> Result<(), DeviceError> {
        let mut next_id = self.next_id.lock().unwrap();
        self.insert(*next_id, number, name);
        *next_id += 1;
        Ok(())
    }

    async fn remove_card(&self, id: i64) -> Result<(), DeviceError> {
        self.cards.lock().unwrap().remove(&id);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeIdentityProvider {
    users: Mutex<Vec<AccessUser>>,
    webhooks: Mutex<Vec<Webhook>>,
    list_calls: Mutex<Vec<Instant>>,
}

impl FakeIdentityProvider {
    pub fn with_users(users: Vec<AccessUser>) -> Self {
        let provider = Self::default();
        provider.set_users(users);
        provider
    }

    pub fn set_users(&self, users: Vec<AccessUser>) {
        *self.users.lock().unwrap() = users;
    }

    pub fn webhooks(&self) -> Vec<Webhook> {
        self.webhooks.lock().unwrap().clone()
    }

    /// When each user listing (one per pass) happened.
    pub fn list_calls(&self) -> Vec<Instant> {
        self.list_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentityProvider {
    async fn list_users(&self) -> Result<Vec<AccessUser>, KeycloakError> {
        self.list_calls.lock().unwrap().push(Instant::now());
        Ok(self.users.lock().unwrap().clone())
    }

    async fn list_webhooks(&self) -> Result<Vec<Webhook>, KeycloakError> {
        Ok(self.webhooks())
    }

    async fn create_webhook(&self, webhook: &Webhook) -> Result<(), KeycloakError> {
        self.webhooks.lock().unwrap().push(webhook.clone());
        Ok(())
    }
}

pub fn access_user(id: &str, keyfob_number: i64) -> AccessUser {
    AccessUser {
        id: id.to_string(),
        name: "Jane Doe".to_string(),
        keyfob_number,
    }
}
