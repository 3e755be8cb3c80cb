use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::device::swipes::list_swipes_since;
use crate::device::{DeviceError, SwipePageSource, SwipeVisitor};
use crate::keycloak::KeycloakError;
use crate::models::SwipeRecord;
use crate::sync::backoff::{sleep_or_cancelled, Backoff};
use crate::sync::IdentityProvider;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("finding cursor position: {0}")]
    Cursor(#[source] sqlx::Error),

    #[error("listing users from Keycloak: {0}")]
    ListUsers(#[from] KeycloakError),

    #[error("reading swipe log: {0}")]
    Device(#[from] DeviceError),

    #[error("inserting swipe {id} into database: {source}")]
    Insert {
        id: i64,
        #[source]
        source: sqlx::Error,
    },
}

/// Durable storage for archived swipes.
#[async_trait]
pub trait SwipeStore: Send + Sync {
    /// Highest archived swipe id, `None` when nothing is stored yet.
    async fn latest_id(&self) -> Result<Option<i64>, sqlx::Error>;

    /// Stores a swipe under `name`; false when it was already archived.
    async fn insert(&self, swipe: &SwipeRecord, name: &str) -> Result<bool, sqlx::Error>;
}

pub struct PgSwipeStore {
    pool: PgPool,
}

impl PgSwipeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SwipeStore for PgSwipeStore {
    async fn latest_id(&self) -> Result<Option<i64>, sqlx::Error> {
        SwipeRecord::latest_id(&self.pool).await
    }

    async fn insert(&self, swipe: &SwipeRecord, name: &str) -> Result<bool, sqlx::Error> {
        swipe.insert(&self.pool, name).await
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScrapeStats {
    pub cursor: Option<i64>,
    pub inserted: usize,
    pub duplicates: usize,
}

/// Background job that copies new swipe log entries into the database
///
/// Each scrape walks the device log back to the highest stored id. Names
/// that are a Keycloak user's card name are replaced with the user's
/// display name before storing.
pub struct SwipeArchiver {
    swipes: Arc<dyn SwipePageSource>,
    store: Arc<dyn SwipeStore>,
    users: Option<Arc<dyn IdentityProvider>>,
    interval: Duration,
    backoff: Backoff,
}

impl SwipeArchiver {
    pub fn new(
        swipes: Arc<dyn SwipePageSource>,
        store: Arc<dyn SwipeStore>,
        users: Option<Arc<dyn IdentityProvider>>,
        interval: Duration,
    ) -> Self {
        Self {
            swipes,
            store,
            users,
            interval,
            backoff: Backoff::default(),
        }
    }

    pub async fn scrape(&self) -> Result<ScrapeStats, ArchiveError> {
        let start = Instant::now();
        tracing::info!("Starting to scrape swipe events");

        let cursor = self.store.latest_id().await.map_err(ArchiveError::Cursor)?;
        tracing::info!(cursor = ?cursor, "Last known swipe event");

        let names = self.display_names().await?;

        let mut pending = PendingSwipes::default();
        list_swipes_since(self.swipes.as_ref(), cursor.unwrap_or(-1), &mut pending).await?;

        // Oldest first, so the stored maximum never passes a swipe that
        // failed to insert.
        let mut stats = ScrapeStats {
            cursor,
            ..Default::default()
        };
        for swipe in pending.swipes.iter().rev() {
            // fall back to the raw card name
            let name = names.get(&swipe.name).unwrap_or(&swipe.name);
            let inserted = self
                .store
                .insert(swipe, name)
                .await
                .map_err(|source| ArchiveError::Insert {
                    id: swipe.id,
                    source,
                })?;

            if inserted {
                stats.inserted += 1;
                tracing::info!(
                    swipe_id = swipe.id,
                    card_id = swipe.card_id,
                    door_id = %swipe.door_id,
                    time = %swipe.time,
                    "Inserted swipe event into database"
                );
            } else {
                stats.duplicates += 1;
            }
        }

        tracing::info!(
            ?stats,
            duration_ms = start.elapsed().as_millis(),
            "Finished scraping swipe events"
        );
        Ok(stats)
    }

    /// Scrapes every interval until shutdown, backing off after failures.
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!(interval = ?self.interval, "Starting swipe archiver");

        loop {
            let delay = match self.scrape().await {
                Ok(_) => {
                    self.backoff.reset();
                    self.interval
                }
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    tracing::error!(error = %e, retry_in = ?delay, "Error scraping swipe events");
                    delay
                }
            };

            if !sleep_or_cancelled(delay, &shutdown).await {
                break;
            }
        }

        tracing::info!("Swipe archiver stopped");
    }

    /// Display names keyed by card name (user id without dashes).
    async fn display_names(&self) -> Result<HashMap<String, String>, ArchiveError> {
        let Some(users) = &self.users else {
            return Ok(HashMap::new());
        };

        Ok(users
            .list_users()
            .await?
            .into_iter()
            .map(|user| (user.card_name(), user.name))
            .collect())
    }
}

/// Swipes newer than the cursor, newest first as the log is walked.
#[derive(Default)]
struct PendingSwipes {
    swipes: Vec<SwipeRecord>,
}

#[async_trait]
impl SwipeVisitor for PendingSwipes {
    type Error = DeviceError;

    async fn visit(&mut self, swipe: &SwipeRecord) -> Result<ControlFlow<()>, DeviceError> {
        self.swipes.push(swipe.clone());
        Ok(ControlFlow::Continue(()))
    }
}
