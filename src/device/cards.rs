use std::sync::Arc;

use async_trait::async_trait;

use super::{html, DeviceError, DeviceLink};
use crate::models::Card;
use crate::sync::AccessController;

// Form endpoints of the controller's user management pages
const CARD_LIST_PATH: &str = "/ACT_ID_21";
const CARD_ADD_PATH: &str = "/ACT_ID_325";
const CARD_REMOVE_PATH: &str = "/ACT_ID_324";

/// Lists, adds and removes the cards authorized on the access controller.
pub struct CardDirectory {
    link: Arc<DeviceLink>,
}

impl CardDirectory {
    pub fn new(link: Arc<DeviceLink>) -> Self {
        Self { link }
    }

    pub async fn list_cards(&self) -> Result<Vec<Card>, DeviceError> {
        let body = self
            .link
            .post_form(CARD_LIST_PATH, &[("s2", "Users")])
            .await?
            .into_success()?;

        html::parse_card_page(&body)
    }

    pub async fn add_card(&self, number: i64, name: &str) -> Result<(), DeviceError> {
        let number = number.to_string();
        self.link
            .post_form(
                CARD_ADD_PATH,
                &[("e1", number.as_str()), ("e2", name), ("s4", "Add")],
            )
            .await?
            .into_success()?;

        Ok(())
    }

    pub async fn remove_card(&self, id: i64) -> Result<(), DeviceError> {
        let field = format!("D{}", id);
        self.link
            .post_form(CARD_REMOVE_PATH, &[(field.as_str(), "Delete")])
            .await?
            .into_success()?;

        Ok(())
    }
}

#[async_trait]
impl AccessController for CardDirectory {
    async fn list_cards(&self) -> Result<Vec<Card>, DeviceError> {
        CardDirectory::list_cards(self).await
    }

    async fn add_card(&self, number: i64, name: &str) -> Result<(), DeviceError> {
        CardDirectory::add_card(self, number, name).await
    }

    async fn remove_card(&self, id: i64) -> Result<(), DeviceError> {
        CardDirectory::remove_card(self, id).await
    }
}
