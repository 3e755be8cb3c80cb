use serde::{Deserialize, Serialize};

/// A member of the authorized group, as seen by Keycloak.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessUser {
    pub id: String,
    pub name: String,
    pub keyfob_number: i64,
}

impl AccessUser {
    /// The name stored on this user's card.
    pub fn card_name(&self) -> String {
        strip_dashes(&self.id)
    }
}

/// The access controller doesn't allow dashes in card names, so user ids
/// are stored without them.
pub fn strip_dashes(id: &str) -> String {
    id.replace('-', "")
}

/// A Keycloak event webhook registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Webhook {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub enabled: bool,
    pub url: String,
    #[serde(default)]
    pub event_types: Vec<String>,
}
