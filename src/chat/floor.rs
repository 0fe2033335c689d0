//! Boundary between the paginated history and the live window.

use crate::error::FeedError;
use crate::feed::{Cursor, FeedService};

/// Where the live window starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Floor {
    /// Oldest of the most recent page. Live covers it and everything after;
    /// history pages strictly below it.
    At(Cursor),
    /// The feed was empty: live covers the whole feed and there is no history.
    Open,
}

impl Floor {
    #[must_use]
    pub fn cursor(&self) -> Option<&Cursor> {
        match self {
            Self::At(cursor) => Some(cursor),
            Self::Open => None,
        }
    }
}

/// Fetch the newest `limit` messages and take the oldest of them as the floor.
pub async fn determine_floor(feed: &dyn FeedService, limit: usize) -> Result<Floor, FeedError> {
    let latest = feed.latest(limit).await?;
    Ok(latest
        .into_iter()
        .last()
        .map_or(Floor::Open, |oldest| Floor::At(oldest.cursor)))
}
