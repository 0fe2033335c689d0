//! View update events pushed to the browser.
//!
//! Every mutation of a mounted chat view is announced as a [`ViewEvent`].
//! The page listens on a Server-Sent Events stream and re-renders the message
//! list on each one, scrolling to the bottom only when asked to.
//!
//! # Example
//!
//! ```rust
//! use live_chat_feed::events::{ViewEvent, event_name};
//!
//! let event = ViewEvent::Notice {
//!     message: "Could not send message".to_string(),
//! };
//! assert_eq!(event_name(&event), "notice");
//! ```

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::feed::MessageId;

/// Events emitted by a mounted chat view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum ViewEvent {
    // ─────────────────────────────────────────────────────────────────────
    // Live window
    // ─────────────────────────────────────────────────────────────────────
    /// A subscription batch changed the live list.
    #[serde(rename = "live.changed")]
    LiveChanged {
        appended: usize,
        replaced: usize,
        removed: usize,
        live_len: usize,
        /// New arrivals pull the view to the bottom.
        scroll_to_bottom: bool,
    },

    // ─────────────────────────────────────────────────────────────────────
    // History
    // ─────────────────────────────────────────────────────────────────────
    /// An older page request went out.
    #[serde(rename = "history.loading")]
    HistoryLoading,

    /// An older page was prepended. Never moves the scroll position.
    #[serde(rename = "history.prepended")]
    HistoryPrepended {
        count: usize,
        has_more: bool,
        history_len: usize,
    },

    /// The floor moved; history was dropped and paging restarts below it.
    #[serde(rename = "history.reset")]
    HistoryReset { has_more: bool },

    /// A history message was deleted locally.
    #[serde(rename = "history.removed")]
    HistoryRemoved { id: MessageId },

    // ─────────────────────────────────────────────────────────────────────
    // Errors
    // ─────────────────────────────────────────────────────────────────────
    /// A feed service call failed; the view is still usable.
    #[serde(rename = "notice")]
    Notice { message: String },
}

impl ViewEvent {
    #[must_use]
    pub fn scrolls_to_bottom(&self) -> bool {
        matches!(
            self,
            Self::LiveChanged {
                scroll_to_bottom: true,
                ..
            }
        )
    }
}

/// Get the SSE event name for a [`ViewEvent`].
pub fn event_name(evt: &ViewEvent) -> &'static str {
    match evt {
        ViewEvent::LiveChanged { .. } => "live.changed",
        ViewEvent::HistoryLoading => "history.loading",
        ViewEvent::HistoryPrepended { .. } => "history.prepended",
        ViewEvent::HistoryReset { .. } => "history.reset",
        ViewEvent::HistoryRemoved { .. } => "history.removed",
        ViewEvent::Notice { .. } => "notice",
    }
}

/// Convert a [`ViewEvent`] to an SSE event named after its type.
pub fn sse_event(evt: &ViewEvent) -> Event {
    let json = serde_json::to_string(evt).unwrap_or_else(|e| {
        serde_json::json!({ "type": "notice", "data": { "message": e.to_string() } }).to_string()
    });
    Event::default().event(event_name(evt)).data(json)
}

pub fn build_sse_response<S>(stream: S) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send>
where
    S: Stream<Item = ViewEvent> + Send + 'static,
{
    let stream = stream.map(|event| Ok(sse_event(&event)));

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
