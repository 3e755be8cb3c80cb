// Models module - device records, Keycloak users and the swipe archive

pub mod access_user;
pub mod card;
pub mod swipe;

pub use access_user::{AccessUser, Webhook};
pub use card::Card;
pub use swipe::SwipeRecord;
