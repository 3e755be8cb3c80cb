// Access control device client - scraped HTML forms over one reused connection

pub mod cards;
pub mod html;
pub mod link;
pub mod swipes;

use thiserror::Error;

pub use cards::CardDirectory;
pub use link::{DeviceLink, DeviceResponse};
pub use swipes::{list_swipes_since, PageRequest, SwipeLogReader, SwipePage, SwipePageSource, SwipeVisitor};

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("connecting to access controller: {0}")]
    Connect(#[source] std::io::Error),

    #[error("access controller I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("access controller did not respond within {0:?}")]
    Timeout(std::time::Duration),

    #[error("access controller closed the connection")]
    Closed,

    #[error("malformed response from access controller: {0}")]
    MalformedResponse(String),

    #[error("unexpected response status: {status} with body: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("no table found in access controller response")]
    MissingTable,
}
