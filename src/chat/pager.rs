//! Backward pagination through messages older than the live window.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;

use super::{read, write};
use crate::error::FeedError;
use crate::feed::{Cursor, FeedService, Message, MessageId};

/// Minimum wall time a page request takes, whatever the service latency.
///
/// Keeps scroll-triggered requests from firing back to back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinLatency(Duration);

impl MinLatency {
    pub const NONE: Self = Self(Duration::ZERO);

    #[must_use]
    pub const fn new(duration: Duration) -> Self {
        Self(duration)
    }

    /// Run `fut` and resolve no earlier than the configured minimum.
    pub async fn hold<F: Future>(self, fut: F) -> F::Output {
        if self.0.is_zero() {
            return fut.await;
        }
        let (output, ()) = tokio::join!(fut, tokio::time::sleep(self.0));
        output
    }
}

/// Result of asking for an older page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PageOutcome {
    /// A page was fetched and prepended.
    Fetched { count: usize, has_more: bool },
    /// A previous page came back short; nothing older exists.
    Exhausted,
    /// No cursor to page from (empty feed, or not mounted).
    NoCursor,
    /// Another page request is still in flight.
    Busy,
}

/// Owns the history list and the cursor used to extend it.
#[derive(Debug)]
pub struct HistoryPager {
    limit: usize,
    latency: MinLatency,
    // Held for the whole request; `try_lock` failing means a fetch is in flight.
    cursor: Mutex<Option<Cursor>>,
    has_more: AtomicBool,
    messages: RwLock<Vec<Message>>,
}

impl HistoryPager {
    /// Start paging strictly below `start`. Without a cursor there is no history.
    #[must_use]
    pub fn new(start: Option<Cursor>, limit: usize, latency: MinLatency) -> Self {
        Self {
            limit: limit.max(1),
            latency,
            has_more: AtomicBool::new(start.is_some()),
            cursor: Mutex::new(start),
            messages: RwLock::new(Vec::new()),
        }
    }

    /// Fetch up to `limit` messages older than the cursor and prepend them.
    ///
    /// `on_start` runs once the request is known to go out.
    pub async fn fetch_older_page<F>(
        &self,
        feed: &dyn FeedService,
        on_start: F,
    ) -> Result<PageOutcome, FeedError>
    where
        F: FnOnce(),
    {
        let Ok(mut cursor) = self.cursor.try_lock() else {
            return Ok(PageOutcome::Busy);
        };
        let Some(from) = cursor.as_ref() else {
            return Ok(PageOutcome::NoCursor);
        };
        if !self.has_more() {
            return Ok(PageOutcome::Exhausted);
        }

        on_start();
        let documents = self
            .latency
            .hold(feed.page_before(from, self.limit))
            .await?;

        let count = documents.len();
        let has_more = count == self.limit;
        if let Some(oldest) = documents.last() {
            *cursor = Some(oldest.cursor.clone());
        }

        let mut page: Vec<Message> = documents.into_iter().rev().map(|d| d.message).collect();
        {
            let mut messages = write(&self.messages);
            page.append(&mut messages);
            *messages = page;
        }
        self.has_more.store(has_more, Ordering::Release);

        Ok(PageOutcome::Fetched { count, has_more })
    }

    /// Restart paging strictly below `start`, dropping the history list.
    ///
    /// Waits for an in-flight request to finish first.
    pub async fn reset(&self, start: Option<Cursor>) {
        let mut cursor = self.cursor.lock().await;
        self.has_more.store(start.is_some(), Ordering::Release);
        *cursor = start;
        write(&self.messages).clear();
    }

    /// Remove a message from the history list.
    pub fn remove(&self, id: &MessageId) -> Option<Message> {
        let mut messages = write(&self.messages);
        let index = messages.iter().position(|m| &m.id == id)?;
        Some(messages.remove(index))
    }

    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        read(&self.messages).iter().any(|m| &m.id == id)
    }

    /// History messages, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        read(&self.messages).clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        read(&self.messages).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn has_more(&self) -> bool {
        self.has_more.load(Ordering::Acquire)
    }

    /// Whether a page request is in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.cursor.try_lock().is_err()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::feed::{MemoryFeed, NewMessage};

    /// Feed with one message per date and the cursor of the `window`-th newest.
    async fn feed_with_floor(dates: impl IntoIterator<Item = i64>, window: usize) -> (MemoryFeed, Cursor) {
        let feed = MemoryFeed::new();
        for date in dates {
            feed.create(NewMessage::new(format!("m{date}"), date))
                .await
                .unwrap();
        }
        let latest = feed.latest(window).await.unwrap();
        let floor = latest.last().unwrap().cursor.clone();
        (feed, floor)
    }

    fn dates(pager: &HistoryPager) -> Vec<i64> {
        pager.messages().iter().map(|m| m.date).collect()
    }

    #[tokio::test]
    async fn test_pages_prepend_oldest_first() {
        // 25 messages, floor at the 10th newest: 15 older ones.
        let (feed, floor) = feed_with_floor(1..=25, 10).await;
        let pager = HistoryPager::new(Some(floor), 10, MinLatency::NONE);

        let outcome = pager.fetch_older_page(&feed, || {}).await.unwrap();
        assert_eq!(outcome, PageOutcome::Fetched { count: 10, has_more: true });
        assert_eq!(dates(&pager), (6..=15).collect::<Vec<_>>());

        let outcome = pager.fetch_older_page(&feed, || {}).await.unwrap();
        assert_eq!(outcome, PageOutcome::Fetched { count: 5, has_more: false });
        assert_eq!(dates(&pager), (1..=15).collect::<Vec<_>>());

        let outcome = pager.fetch_older_page(&feed, || {}).await.unwrap();
        assert_eq!(outcome, PageOutcome::Exhausted);
        assert_eq!(pager.len(), 15);
    }

    #[tokio::test]
    async fn test_short_page_exhausts_history() {
        let (feed, floor) = feed_with_floor(1..=13, 10).await;
        let pager = HistoryPager::new(Some(floor), 10, MinLatency::NONE);

        let outcome = pager.fetch_older_page(&feed, || {}).await.unwrap();
        assert_eq!(outcome, PageOutcome::Fetched { count: 3, has_more: false });
        assert!(!pager.has_more());

        let mut started = false;
        let outcome = pager.fetch_older_page(&feed, || started = true).await.unwrap();
        assert_eq!(outcome, PageOutcome::Exhausted);
        assert!(!started);
    }

    #[tokio::test]
    async fn test_empty_page_keeps_cursor() {
        let (feed, floor) = feed_with_floor(1..=10, 10).await;
        let pager = HistoryPager::new(Some(floor), 10, MinLatency::NONE);

        let outcome = pager.fetch_older_page(&feed, || {}).await.unwrap();
        assert_eq!(outcome, PageOutcome::Fetched { count: 0, has_more: false });
        assert!(pager.is_empty());
        assert!(pager.cursor.try_lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_without_cursor_is_noop() {
        let feed = MemoryFeed::new();
        let pager = HistoryPager::new(None, 10, MinLatency::NONE);

        let outcome = pager.fetch_older_page(&feed, || {}).await.unwrap();
        assert_eq!(outcome, PageOutcome::NoCursor);
        assert!(!pager.has_more());
    }

    #[tokio::test(start_paused = true)]
    async fn test_minimum_latency_is_honoured() {
        let (feed, floor) = feed_with_floor(1..=12, 10).await;
        let pager = HistoryPager::new(Some(floor), 10, MinLatency::new(Duration::from_secs(2)));

        let started = tokio::time::Instant::now();
        pager.fetch_older_page(&feed, || {}).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_fetch_in_flight() {
        let (feed, floor) = feed_with_floor(1..=30, 10).await;
        let feed = Arc::new(feed);
        let pager = Arc::new(HistoryPager::new(
            Some(floor),
            10,
            MinLatency::new(Duration::from_secs(2)),
        ));

        let first = tokio::spawn({
            let feed = Arc::clone(&feed);
            let pager = Arc::clone(&pager);
            async move { pager.fetch_older_page(feed.as_ref(), || {}).await }
        });
        tokio::task::yield_now().await;

        assert!(pager.is_loading());
        let second = pager.fetch_older_page(feed.as_ref(), || {}).await.unwrap();
        assert_eq!(second, PageOutcome::Busy);

        let first = first.await.unwrap().unwrap();
        assert_eq!(first, PageOutcome::Fetched { count: 10, has_more: true });
        assert!(!pager.is_loading());
        assert_eq!(pager.len(), 10);
    }

    #[tokio::test]
    async fn test_reset_restarts_below_new_cursor() {
        let (feed, floor) = feed_with_floor(1..=25, 10).await;
        let pager = HistoryPager::new(Some(floor), 10, MinLatency::NONE);
        pager.fetch_older_page(&feed, || {}).await.unwrap();
        pager.fetch_older_page(&feed, || {}).await.unwrap();
        assert!(!pager.has_more());

        let lower = feed.latest(20).await.unwrap().last().unwrap().cursor.clone();
        pager.reset(Some(lower)).await;
        assert!(pager.is_empty());
        assert!(pager.has_more());

        let outcome = pager.fetch_older_page(&feed, || {}).await.unwrap();
        assert_eq!(outcome, PageOutcome::Fetched { count: 5, has_more: false });
        assert_eq!(dates(&pager), (1..=5).collect::<Vec<_>>());

        pager.reset(None).await;
        assert_eq!(pager.fetch_older_page(&feed, || {}).await.unwrap(), PageOutcome::NoCursor);
    }

    #[tokio::test]
    async fn test_remove_by_id() {
        let (feed, floor) = feed_with_floor(1..=12, 10).await;
        let pager = HistoryPager::new(Some(floor), 10, MinLatency::NONE);
        pager.fetch_older_page(&feed, || {}).await.unwrap();

        let target = pager.messages()[0].id.clone();
        assert!(pager.remove(&target).is_some());
        assert!(!pager.contains(&target));
        assert!(pager.remove(&MessageId::from("ghost")).is_none());
        assert_eq!(pager.len(), 1);
    }
}
