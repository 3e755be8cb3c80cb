use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::models::{AccessUser, Webhook};
use crate::sync::IdentityProvider;

const MEMBERS_PAGE_SIZE: usize = 50;
const KEYFOB_ATTRIBUTE: &str = "keyfobID";
/// Upper bound for every Keycloak call, so a hung server fails the pass
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum KeycloakError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Keycloak API error: {status} - {message}")]
    ApiError { status: StatusCode, message: String },
}

/// Admin API client for the realm holding the authorized group.
pub struct Keycloak {
    client: Client,
    base_url: String,
    realm: String,
    user: String,
    password: Secret<String>,
    group_id: String,
    timeout: Duration,

    token: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    access_token: Secret<String>,
    expires_in: Duration,
    fetched_at: Instant,
}

impl CachedToken {
    /// Tokens are rotated once half their lifetime has passed.
    fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < self.expires_in / 2
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeycloakUser {
    id: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    attributes: Option<HashMap<String, Vec<String>>>,
}

impl KeycloakUser {
    /// Users without an id or a usable keyfob number can't be given a card.
    fn into_access_user(self) -> Option<AccessUser> {
        let id = self.id?;
        let keyfob_number = self
            .attributes?
            .get(KEYFOB_ATTRIBUTE)
            .and_then(|values| values.first())
            .and_then(|value| value.trim().parse::<i64>().ok())
            .filter(|&number| number > 0)?;

        Some(AccessUser {
            id,
            name: format!(
                "{} {}",
                self.first_name.unwrap_or_default(),
                self.last_name.unwrap_or_default()
            ),
            keyfob_number,
        })
    }
}

impl Keycloak {
    pub fn new(
        base_url: impl Into<String>,
        realm: impl Into<String>,
        user: impl Into<String>,
        password: Secret<String>,
        group_id: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            realm: realm.into(),
            user: user.into(),
            password,
            group_id: group_id.into(),
            timeout: REQUEST_TIMEOUT,
            token: Mutex::new(None),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds a client when a Keycloak URL is configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        let base_url = config.keycloak_url.as_deref()?;
        Some(Self::new(
            base_url,
            config.keycloak_realm.as_str(),
            config.keycloak_user.as_str(),
            config.keycloak_password.clone(),
            config.authorized_group_id.as_str(),
        ))
    }

    /// Lists every member of the authorized group that has a keyfob.
    pub async fn list_users(&self) -> Result<Vec<AccessUser>, KeycloakError> {
        let token = self.ensure_token().await?;
        let url = format!(
            "{}/admin/realms/{}/groups/{}/members",
            self.base_url, self.realm, self.group_id
        );

        let mut first = 0;
        let mut users = Vec::new();
        loop {
            let response = self
                .client
                .get(&url)
                .bearer_auth(&token)
                .query(&[("first", first), ("max", MEMBERS_PAGE_SIZE)])
                .timeout(self.timeout)
                .send()
                .await?;
            let page: Vec<KeycloakUser> = check_status(response).await?.json().await?;
            if page.is_empty() {
                break;
            }
            first += page.len();

            users.extend(page.into_iter().filter_map(KeycloakUser::into_access_user));
        }

        tracing::debug!(users = users.len(), "Listed authorized users from Keycloak");
        Ok(users)
    }

    pub async fn list_webhooks(&self) -> Result<Vec<Webhook>, KeycloakError> {
        let token = self.ensure_token().await?;

        let response = self
            .client
            .get(self.webhooks_url())
            .bearer_auth(&token)
            .timeout(self.timeout)
            .send()
            .await?;

        Ok(check_status(response).await?.json().await?)
    }

    pub async fn create_webhook(&self, webhook: &Webhook) -> Result<(), KeycloakError> {
        let token = self.ensure_token().await?;

        let response = self
            .client
            .post(self.webhooks_url())
            .bearer_auth(&token)
            .json(webhook)
            .timeout(self.timeout)
            .send()
            .await?;
        check_status(response).await?;

        Ok(())
    }

    fn webhooks_url(&self) -> String {
        format!("{}/realms/{}/webhooks", self.base_url, self.realm)
    }

    /// Returns a cached admin token, logging in again when it's stale.
    async fn ensure_token(&self) -> Result<String, KeycloakError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|token| token.is_fresh()) {
            return Ok(token.access_token.expose_secret().clone());
        }

        let response = self
            .client
            .post(format!(
                "{}/realms/{}/protocol/openid-connect/token",
                self.base_url, self.realm
            ))
            .form(&[
                ("grant_type", "password"),
                ("client_id", "admin-cli"),
                ("username", self.user.as_str()),
                ("password", self.password.expose_secret().as_str()),
            ])
            .timeout(self.timeout)
            .send()
            .await?;
        let token: TokenResponse = check_status(response).await?.json().await?;

        tracing::info!(
            expires_in = token.expires_in,
            "Fetched new auth token from Keycloak"
        );

        let access_token = token.access_token.clone();
        *cached = Some(CachedToken {
            access_token: Secret::new(token.access_token),
            expires_in: Duration::from_secs(token.expires_in),
            fetched_at: Instant::now(),
        });

        Ok(access_token)
    }
}

async fn check_status(response: Response) -> Result<Response, KeycloakError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    tracing::error!(status = %status, body = %message, "Keycloak request failed");
    Err(KeycloakError::ApiError { status, message })
}

#[async_trait]
impl IdentityProvider for Keycloak {
    async fn list_users(&self) -> Result<Vec<AccessUser>, KeycloakError> {
        Keycloak::list_users(self).await
    }

    async fn list_webhooks(&self) -> Result<Vec<Webhook>, KeycloakError> {
        Keycloak::list_webhooks(self).await
    }

    async fn create_webhook(&self, webhook: &Webhook) -> Result<(), KeycloakError> {
        Keycloak::create_webhook(self, webhook).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(json: serde_json::Value) -> Option<AccessUser> {
        serde_json::from_value::<KeycloakUser>(json)
            .unwrap()
            .into_access_user()
    }

    #[test]
    fn test_user_with_keyfob() {
        let user = user(serde_json::json!({
            "id": "592af547-8f68-42d8-8b81-4a5d233b7cce",
            "firstName": "Jane",
            "lastName": "Doe",
            "attributes": { "keyfobID": ["9001"] },
        }));

        assert_eq!(
            user,
            Some(AccessUser {
                id: "592af547-8f68-42d8-8b81-4a5d233b7cce".to_string(),
                name: "Jane Doe".to_string(),
                keyfob_number: 9001,
            })
        );
    }

    #[test]
    fn test_users_without_keyfob_are_skipped() {
        assert_eq!(user(serde_json::json!({ "id": "a" })), None);
        assert_eq!(
            user(serde_json::json!({ "id": "a", "attributes": { "keyfobID": ["0"] } })),
            None
        );
        assert_eq!(
            user(serde_json::json!({ "id": "a", "attributes": { "keyfobID": ["nope"] } })),
            None
        );
        assert_eq!(
            user(serde_json::json!({ "attributes": { "keyfobID": ["9001"] } })),
            None
        );
    }

    #[test]
    fn test_token_freshness() {
        let token = |expires_in: u64| CachedToken {
            access_token: Secret::new("token".to_string()),
            expires_in: Duration::from_secs(expires_in),
            fetched_at: Instant::now(),
        };

        assert!(token(300).is_fresh());
        assert!(!token(0).is_fresh());
    }

    #[test]
    fn test_from_config_requires_url() {
        let mut config = crate::config::test_config();
        assert!(Keycloak::from_config(&config).is_none());

        config.keycloak_url = Some("https://auth.example.com/".to_string());
        let keycloak = Keycloak::from_config(&config).unwrap();
        assert_eq!(keycloak.base_url, "https://auth.example.com");
        assert_eq!(keycloak.webhooks_url(), "https://auth.example.com/realms/master/webhooks");
    }
}
