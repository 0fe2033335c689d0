//! Message input and sending.

use chrono::Utc;
use serde::Serialize;

use crate::error::FeedError;
use crate::feed::{FeedService, MessageId, NewMessage};

/// Result of a send attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SendOutcome {
    Sent { id: MessageId },
    /// Nothing to send; the draft was left as it was.
    Empty,
}

/// Holds the draft being typed and submits it to the feed.
///
/// Sent messages are not echoed locally; they show up through the live
/// subscription like anyone else's.
#[derive(Debug, Default)]
pub struct Composer {
    draft: String,
}

impl Composer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    #[must_use]
    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// Whitespace-only drafts are not sendable.
    #[must_use]
    pub fn is_sendable(&self) -> bool {
        !self.draft.trim().is_empty()
    }

    /// Submit the draft stamped with `date`, clearing it once the feed accepts it.
    ///
    /// On failure the draft is kept so it can be sent again.
    pub async fn send(&mut self, feed: &dyn FeedService, date: i64) -> Result<SendOutcome, FeedError> {
        if !self.is_sendable() {
            return Ok(SendOutcome::Empty);
        }
        let id = feed.create(NewMessage::new(self.draft.clone(), date)).await?;
        self.draft.clear();
        Ok(SendOutcome::Sent { id })
    }
}

/// Current time in epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
