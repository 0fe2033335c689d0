//! Message feed domain and the remote feed service contract.
//!
//! The chat view never talks to storage directly. Everything it knows about
//! messages arrives through a [`FeedService`]: one-shot ordered queries, a live
//! subscription delivering batches of [`ChangeEvent`]s, and create/delete.
//!
//! # Ordering
//!
//! Documents are ordered by `date`, ties broken by id, so every document has a
//! strict position. A [`Cursor`] names one of those positions. Cursors are
//! handed out by the service together with the document they point at and are
//! only ever passed back to it; the rest of the crate cannot build or read one.
//!
//! # Example
//!
//! ```rust
//! use live_chat_feed::feed::{FeedService, MemoryFeed, NewMessage};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let feed = MemoryFeed::new();
//! feed.create(NewMessage::new("hello", 100)).await.unwrap();
//!
//! let latest = feed.latest(10).await.unwrap();
//! assert_eq!(latest[0].message.text, "hello");
//! # }
//! ```

mod memory;

pub use memory::MemoryFeed;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::FeedError;

/// Service-assigned message identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A chat message as stored by the feed service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub text: String,
    /// Epoch milliseconds, assigned by the sender at send time.
    pub date: i64,
}

/// Payload of a create request. The id is assigned by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub text: String,
    pub date: i64,
}

impl NewMessage {
    pub fn new(text: impl Into<String>, date: i64) -> Self {
        Self {
            text: text.into(),
            date,
        }
    }
}

/// Opaque position of one document in the feed ordering.
#[derive(Clone, PartialEq, Eq)]
pub struct Cursor {
    date: i64,
    id: MessageId,
}

impl Cursor {
    pub(in crate::feed) fn at(message: &Message) -> Self {
        Self {
            date: message.date,
            id: message.id.clone(),
        }
    }

    pub(in crate::feed) fn key(&self) -> (i64, MessageId) {
        (self.date, self.id.clone())
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cursor(..)")
    }
}

/// A message paired with the cursor that points at it.
#[derive(Debug, Clone)]
pub struct Document {
    pub message: Message,
    pub cursor: Cursor,
}

/// Kind of delta carried by a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One delta delivered by a live subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub data: Message,
}

impl ChangeEvent {
    pub fn added(data: Message) -> Self {
        Self {
            kind: ChangeKind::Added,
            data,
        }
    }

    pub fn modified(data: Message) -> Self {
        Self {
            kind: ChangeKind::Modified,
            data,
        }
    }

    pub fn removed(data: Message) -> Self {
        Self {
            kind: ChangeKind::Removed,
            data,
        }
    }
}

/// Receiving half of a live subscription.
///
/// Batches arrive in service order and must be applied in that order. The
/// first batch describes the current contents of the window as `added` events.
/// Dropping the subscription detaches the listener.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<Vec<ChangeEvent>>,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<Vec<ChangeEvent>>) -> Self {
        Self { rx }
    }

    /// Wait for the next batch. `None` once the service closes the stream.
    ///
    /// A closed stream may have missed changes; resubscribe to resync.
    pub async fn next_batch(&mut self) -> Option<Vec<ChangeEvent>> {
        self.rx.recv().await
    }
}

/// Contract the chat view needs from the remote feed service.
#[async_trait]
pub trait FeedService: Send + Sync + fmt::Debug {
    /// The most recent `limit` documents, newest first.
    async fn latest(&self, limit: usize) -> Result<Vec<Document>, FeedError>;

    /// Up to `limit` documents strictly older than `cursor`, newest first.
    async fn page_before(&self, cursor: &Cursor, limit: usize)
    -> Result<Vec<Document>, FeedError>;

    /// Live changes at or after `from`, ascending. `None` covers the whole feed.
    async fn subscribe(&self, from: Option<&Cursor>) -> Result<Subscription, FeedError>;

    /// Store a new message and return its assigned id.
    async fn create(&self, message: NewMessage) -> Result<MessageId, FeedError>;

    /// Delete a message. Unknown ids are not an error.
    async fn delete(&self, id: &MessageId) -> Result<(), FeedError>;
}
