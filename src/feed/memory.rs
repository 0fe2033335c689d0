//! In-process feed service backed by an ordered map and a change bus.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{ChangeEvent, Cursor, Document, FeedService, Message, MessageId, NewMessage, Subscription};
use crate::error::FeedError;

/// Capacity of the shared change bus.
const CHANGE_BUS_CAPACITY: usize = 1024;

/// Default number of undelivered batches buffered per subscriber.
const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

type Position = (i64, MessageId);

/// Feed service living in the same process as the chat views.
///
/// Cloning is cheap and every clone sees the same documents.
#[derive(Debug, Clone)]
pub struct MemoryFeed {
    inner: Arc<MemoryFeedInner>,
}

#[derive(Debug)]
struct MemoryFeedInner {
    store: RwLock<Store>,
    changes: broadcast::Sender<ChangeEvent>,
    subscriber_buffer: usize,
}

#[derive(Debug, Default)]
struct Store {
    ordered: BTreeMap<Position, Message>,
    dates: HashMap<MessageId, i64>,
}

impl Store {
    fn position_of(&self, id: &MessageId) -> Option<Position> {
        self.dates.get(id).map(|date| (*date, id.clone()))
    }
}

impl Default for MemoryFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFeed {
    #[must_use]
    pub fn new() -> Self {
        Self::with_subscriber_buffer(DEFAULT_SUBSCRIBER_BUFFER)
    }

    /// Create a feed whose subscriptions buffer up to `buffer` batches.
    #[must_use]
    pub fn with_subscriber_buffer(buffer: usize) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUS_CAPACITY);
        Self {
            inner: Arc::new(MemoryFeedInner {
                store: RwLock::new(Store::default()),
                changes,
                subscriber_buffer: buffer.max(1),
            }),
        }
    }

    /// Replace the text of a stored message, emitting a `modified` change.
    ///
    /// Returns `false` when no message has that id.
    pub fn modify(&self, id: &MessageId, text: impl Into<String>) -> Result<bool, FeedError> {
        let mut store = self.write()?;
        let Some(position) = store.position_of(id) else {
            return Ok(false);
        };
        let Some(message) = store.ordered.get_mut(&position) else {
            return Ok(false);
        };
        message.text = text.into();
        let updated = message.clone();
        let _ = self.inner.changes.send(ChangeEvent::modified(updated));
        Ok(true)
    }

    /// Number of stored messages.
    pub fn len(&self) -> Result<usize, FeedError> {
        Ok(self.read()?.ordered.len())
    }

    pub fn is_empty(&self) -> Result<bool, FeedError> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Store>, FeedError> {
        self.inner
            .store
            .read()
            .map_err(|poisoned| FeedError::Unavailable(poisoned.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Store>, FeedError> {
        self.inner
            .store
            .write()
            .map_err(|poisoned| FeedError::Unavailable(poisoned.to_string()))
    }
}

fn document(message: &Message) -> Document {
    Document {
        message: message.clone(),
        cursor: Cursor::at(message),
    }
}

#[async_trait]
impl FeedService for MemoryFeed {
    async fn latest(&self, limit: usize) -> Result<Vec<Document>, FeedError> {
        let store = self.read()?;
        Ok(store.ordered.values().rev().take(limit).map(document).collect())
    }

    async fn page_before(
        &self,
        cursor: &Cursor,
        limit: usize,
    ) -> Result<Vec<Document>, FeedError> {
        let store = self.read()?;
        Ok(store
            .ordered
            .range(..cursor.key())
            .rev()
            .take(limit)
            .map(|(_, message)| document(message))
            .collect())
    }

    async fn subscribe(&self, from: Option<&Cursor>) -> Result<Subscription, FeedError> {
        let floor = from.map(Cursor::key);
        let lower = floor.clone().map_or(Bound::Unbounded, Bound::Included);

        // Snapshot and bus receiver are taken under the same lock so no change
        // is missed or seen twice.
        let (snapshot, changes) = {
            let store = self.read()?;
            let changes = self.inner.changes.subscribe();
            let snapshot: Vec<ChangeEvent> = store
                .ordered
                .range((lower, Bound::Unbounded))
                .map(|(_, message)| ChangeEvent::added(message.clone()))
                .collect();
            (snapshot, changes)
        };

        let (tx, rx) = mpsc::channel(self.inner.subscriber_buffer);
        debug!(
            name: "feed.subscribed",
            snapshot_len = snapshot.len(),
            bounded = floor.is_some(),
            "Live subscription opened"
        );
        tx.send(snapshot).await.map_err(|_closed| FeedError::Closed)?;
        tokio::spawn(forward_changes(floor, changes, tx));

        Ok(Subscription::new(rx))
    }

    async fn create(&self, message: NewMessage) -> Result<MessageId, FeedError> {
        let id = MessageId::new(Uuid::new_v4().to_string());
        let stored = Message {
            id: id.clone(),
            text: message.text,
            date: message.date,
        };

        let mut store = self.write()?;
        store.dates.insert(id.clone(), stored.date);
        store
            .ordered
            .insert((stored.date, id.clone()), stored.clone());
        let _ = self.inner.changes.send(ChangeEvent::added(stored));
        Ok(id)
    }

    async fn delete(&self, id: &MessageId) -> Result<(), FeedError> {
        let mut store = self.write()?;
        let Some(position) = store.position_of(id) else {
            return Ok(());
        };
        store.dates.remove(id);
        if let Some(removed) = store.ordered.remove(&position) {
            let _ = self.inner.changes.send(ChangeEvent::removed(removed));
        }
        Ok(())
    }
}

/// Relay bus changes inside the window to one subscriber until it goes away.
async fn forward_changes(
    floor: Option<Position>,
    mut changes: broadcast::Receiver<ChangeEvent>,
    tx: mpsc::Sender<Vec<ChangeEvent>>,
) {
    let in_window = |event: &ChangeEvent| {
        floor
            .as_ref()
            .is_none_or(|floor| (event.data.date, event.data.id.clone()) >= *floor)
    };

    loop {
        let received = tokio::select! {
            () = tx.closed() => break,
            received = changes.recv() => received,
        };

        let mut batch = Vec::new();
        match received {
            Ok(event) => {
                if in_window(&event) {
                    batch.push(event);
                }
            }
            // Skipped changes cannot be replayed; closing makes the listener
            // resubscribe from a fresh snapshot.
            Err(RecvError::Lagged(skipped)) => {
                warn!(name: "feed.subscriber.lagged", skipped, "Subscriber fell behind the change bus");
                break;
            }
            Err(RecvError::Closed) => break,
        }

        // Everything already queued goes out as one notification.
        while let Ok(event) = changes.try_recv() {
            if in_window(&event) {
                batch.push(event);
            }
        }

        if batch.is_empty() {
            continue;
        }
        if tx.send(batch).await.is_err() {
            break;
        }
    }

    debug!(name: "feed.unsubscribed", "Live subscription closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::ChangeKind;

    async fn seeded(dates: &[i64]) -> (MemoryFeed, Vec<MessageId>) {
        let feed = MemoryFeed::new();
        let mut ids = Vec::new();
        for date in dates {
            ids.push(
                feed.create(NewMessage::new(format!("m{date}"), *date))
                    .await
                    .unwrap(),
            );
        }
        (feed, ids)
    }

    #[tokio::test]
    async fn test_latest_is_newest_first() {
        let (feed, _) = seeded(&[10, 30, 20]).await;

        let latest = feed.latest(2).await.unwrap();
        let dates: Vec<i64> = latest.iter().map(|d| d.message.date).collect();
        assert_eq!(dates, vec![30, 20]);
    }

    #[tokio::test]
    async fn test_page_before_is_strictly_older() {
        let (feed, _) = seeded(&[10, 20, 30, 40]).await;
        let latest = feed.latest(2).await.unwrap();
        let floor = &latest[1].cursor;

        let page = feed.page_before(floor, 10).await.unwrap();
        let dates: Vec<i64> = page.iter().map(|d| d.message.date).collect();
        assert_eq!(dates, vec![20, 10]);
    }

    #[tokio::test]
    async fn test_equal_dates_are_split_by_id() {
        let (feed, _) = seeded(&[50, 50, 50]).await;
        let latest = feed.latest(3).await.unwrap();
        let oldest = &latest[2].cursor;

        assert!(feed.page_before(oldest, 10).await.unwrap().is_empty());
        let middle = &latest[1].cursor;
        let page = feed.page_before(middle, 10).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].message.id, latest[2].message.id);
    }

    #[tokio::test]
    async fn test_subscription_snapshot_includes_floor() {
        let (feed, _) = seeded(&[10, 20, 30]).await;
        let latest = feed.latest(2).await.unwrap();

        let mut sub = feed.subscribe(Some(&latest[1].cursor)).await.unwrap();
        let snapshot = sub.next_batch().await.unwrap();
        let dates: Vec<i64> = snapshot.iter().map(|e| e.data.date).collect();
        assert_eq!(dates, vec![20, 30]);
        assert!(snapshot.iter().all(|e| e.kind == ChangeKind::Added));
    }

    #[tokio::test]
    async fn test_subscription_filters_changes_below_floor() {
        let (feed, ids) = seeded(&[10, 20]).await;
        let latest = feed.latest(1).await.unwrap();
        let mut sub = feed.subscribe(Some(&latest[0].cursor)).await.unwrap();
        let _snapshot = sub.next_batch().await.unwrap();

        feed.delete(&ids[0]).await.unwrap();
        feed.create(NewMessage::new("late", 25)).await.unwrap();

        let batch = sub.next_batch().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].kind, ChangeKind::Added);
        assert_eq!(batch[0].data.text, "late");
    }

    #[tokio::test]
    async fn test_modify_and_delete_emit_changes() {
        let (feed, ids) = seeded(&[10]).await;
        let mut sub = feed.subscribe(None).await.unwrap();
        let _snapshot = sub.next_batch().await.unwrap();

        assert!(feed.modify(&ids[0], "edited").unwrap());
        let batch = sub.next_batch().await.unwrap();
        assert_eq!(batch[0].kind, ChangeKind::Modified);
        assert_eq!(batch[0].data.text, "edited");

        feed.delete(&ids[0]).await.unwrap();
        let batch = sub.next_batch().await.unwrap();
        assert_eq!(batch[0].kind, ChangeKind::Removed);
        assert!(feed.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_lagging_subscriber_is_closed() {
        let feed = MemoryFeed::new();
        let mut sub = feed.subscribe(None).await.unwrap();
        let _snapshot = sub.next_batch().await.unwrap();

        // The forwarder does not run until this task yields.
        for date in 0..(CHANGE_BUS_CAPACITY as i64 + 76) {
            feed.create(NewMessage::new("burst", date)).await.unwrap();
        }

        let next = tokio::time::timeout(std::time::Duration::from_secs(1), sub.next_batch())
            .await
            .unwrap();
        assert!(next.is_none());

        // A fresh subscription sees everything.
        let mut sub = feed.subscribe(None).await.unwrap();
        assert_eq!(sub.next_batch().await.unwrap().len(), CHANGE_BUS_CAPACITY + 76);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_errors() {
        let feed = MemoryFeed::new();
        let ghost = MessageId::from("ghost");

        assert!(feed.delete(&ghost).await.is_ok());
        assert!(!feed.modify(&ghost, "x").unwrap());
    }
}
