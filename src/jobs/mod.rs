// Background jobs

pub mod swipe_archiver;

pub use swipe_archiver::{ArchiveError, PgSwipeStore, ScrapeStats, SwipeArchiver, SwipeStore};
