use std::ops::ControlFlow;
use std::sync::Arc;

use async_trait::async_trait;

use super::{html, DeviceError, DeviceLink};
use crate::models::SwipeRecord;

/// Rows per page of the device's swipe log. Shorter pages are the last.
pub const PAGE_SIZE: usize = 20;

const SWIPE_LOG_PATH: &str = "/ACT_ID_345";

/// Which page of the swipe log to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRequest {
    /// The newest entries
    MostRecent,
    /// The page whose newest entry is the given id
    From(i64),
}

impl PageRequest {
    /// Value of the device's `PC` paging field.
    ///
    /// The device pages by "rows before this index" and the page whose
    /// newest row is `n` is addressed as `n + PAGE_SIZE - 1`. Sending the
    /// plain id instead skips or repeats rows.
    pub fn page_cursor(self) -> i64 {
        let cursor = match self {
            PageRequest::MostRecent => 0,
            PageRequest::From(id) => id,
        };
        cursor + PAGE_SIZE as i64 - 1
    }
}

/// One parsed page of the swipe log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwipePage {
    /// Rows on the page, reboot entries included
    pub rows: usize,
    /// Id in the first (newest) row
    pub first_id: Option<i64>,
    pub swipes: Vec<SwipeRecord>,
}

impl SwipePage {
    /// Where the next (older) page starts, or `None` on the last page.
    ///
    /// Log ids start at 1, so a cursor below that means this page already
    /// reached the oldest entry. The device answers such a cursor with the
    /// newest page again.
    fn next_request(&self) -> Option<PageRequest> {
        if self.rows < PAGE_SIZE {
            return None;
        }
        let first_id = self.first_id.or_else(|| self.swipes.first().map(|s| s.id))?;
        let next = first_id - self.rows as i64;
        (next >= 1).then_some(PageRequest::From(next))
    }
}

#[async_trait]
pub trait SwipePageSource: Send + Sync {
    async fn fetch_page(&self, request: PageRequest) -> Result<SwipePage, DeviceError>;
}

/// Receives swipes newest-first from [`list_swipes_since`].
#[async_trait]
pub trait SwipeVisitor: Send {
    type Error: From<DeviceError> + Send;

    async fn visit(&mut self, swipe: &SwipeRecord) -> Result<ControlFlow<()>, Self::Error>;
}

/// Walks the swipe log backwards from the newest entry, handing every swipe
/// with an id above `earliest_id` to the visitor.
///
/// Pass a negative `earliest_id` to walk all the way back to the beginning
/// of the log. A visitor error is returned immediately and no further pages
/// are fetched.
pub async fn list_swipes_since<S, V>(
    source: &S,
    earliest_id: i64,
    visitor: &mut V,
) -> Result<(), V::Error>
where
    S: SwipePageSource + ?Sized,
    V: SwipeVisitor,
{
    let mut request = PageRequest::MostRecent;
    let mut page_number = 0;
    loop {
        let page = source.fetch_page(request).await.map_err(|e| {
            tracing::warn!(page = page_number, error = %e, "Failed to fetch swipe log page");
            e
        })?;

        tracing::debug!(
            page = page_number,
            rows = page.rows,
            cursor = request.page_cursor(),
            "Fetched swipe log page"
        );

        for swipe in &page.swipes {
            if swipe.id <= earliest_id {
                return Ok(());
            }
            if visitor.visit(swipe).await?.is_break() {
                return Ok(());
            }
        }

        match page.next_request() {
            Some(next) => request = next,
            None => return Ok(()),
        }
        page_number += 1;
    }
}

/// Reads the swipe log page by page over the shared device link.
pub struct SwipeLogReader {
    link: Arc<DeviceLink>,
}

impl SwipeLogReader {
    pub fn new(link: Arc<DeviceLink>) -> Self {
        Self { link }
    }

    pub async fn list_swipes_since<V: SwipeVisitor>(
        &self,
        earliest_id: i64,
        visitor: &mut V,
    ) -> Result<(), V::Error> {
        list_swipes_since(self, earliest_id, visitor).await
    }
}

#[async_trait]
impl SwipePageSource for SwipeLogReader {
    async fn fetch_page(&self, request: PageRequest) -> Result<SwipePage, DeviceError> {
        let cursor = request.page_cursor().to_string();
        let body = self
            .link
            .post_form(
                SWIPE_LOG_PATH,
                &[("PC", cursor.as_str()), ("PE", "0"), ("PN", "Next")],
            )
            .await?
            .into_success()?;

        html::parse_swipe_page(&body)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// An in-memory swipe log with ids `1..=newest`, paged like the device.
    pub struct FakeLog {
        pub newest: i64,
        pub reboots: HashSet<i64>,
        requests: Mutex<Vec<PageRequest>>,
    }

    impl FakeLog {
        pub fn new(newest: i64) -> Self {
            Self {
                newest,
                reboots: HashSet::new(),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn requests(&self) -> Vec<PageRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SwipePageSource for FakeLog {
        async fn fetch_page(&self, request: PageRequest) -> Result<SwipePage, DeviceError> {
            self.requests.lock().unwrap().push(request);

            // Like the device, a cursor before the first entry wraps back
            // to the newest page.
            let top = match request {
                PageRequest::From(id) if id >= 1 => id.min(self.newest),
                _ => self.newest,
            };
            let ids: Vec<i64> = (1..=top).rev().take(PAGE_SIZE).collect();

            Ok(SwipePage {
                rows: ids.len(),
                first_id: ids.first().copied(),
                swipes: ids
                    .iter()
                    .filter(|id| !self.reboots.contains(id))
                    .map(|&id| swipe(id))
                    .collect(),
            })
        }
    }

    pub fn swipe(id: i64) -> SwipeRecord {
        SwipeRecord {
            id,
            card_id: 9001,
            name: "592af5478f6842d88b814a5d233b7cce".to_string(),
            status: "Allow IN[Front Door]".to_string(),
            door_id: "Front Door".to_string(),
            time: Default::default(),
        }
    }
}
