//! Mounted chat view.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    ApplySummary, Composer, Floor, HistoryPager, LiveWindow, MinLatency, PageOutcome,
    SendOutcome, ViewSettings, determine_floor, now_millis, read, write,
};
use crate::error::{ChatError, FeedError, Result};
use crate::events::ViewEvent;
use crate::feed::{ChangeEvent, FeedService, Message, MessageId, Subscription};

/// Which list a displayed message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    History,
    Live,
}

/// One row of the rendered list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayItem {
    #[serde(flatten)]
    pub message: Message,
    pub provenance: Provenance,
}

/// History followed by live, oldest first.
#[derive(Debug, Clone, Serialize)]
pub struct DisplayList {
    pub items: Vec<DisplayItem>,
    pub has_more: bool,
    pub loading: bool,
    pub history_len: usize,
    pub live_len: usize,
}

impl DisplayList {
    pub fn ids(&self) -> impl Iterator<Item = &MessageId> {
        self.items.iter().map(|item| &item.message.id)
    }
}

/// A chat page mounted against a feed service.
///
/// Dropping the view tears down its live subscription.
#[derive(Debug)]
pub struct ChatView {
    inner: Arc<ViewInner>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug)]
struct ViewInner {
    id: String,
    feed: Arc<dyn FeedService>,
    floor: RwLock<Floor>,
    live: RwLock<LiveWindow>,
    pager: HistoryPager,
    composer: Mutex<Composer>,
    events: broadcast::Sender<ViewEvent>,
    last_activity: RwLock<DateTime<Utc>>,
}

impl ViewInner {
    fn emit(&self, event: ViewEvent) {
        // No receivers just means no page is listening right now.
        let _ = self.events.send(event);
    }

    fn apply_batch(&self, batch: Vec<ChangeEvent>) {
        self.update_live(|live| live.apply(batch));
    }

    /// Replace the live list with a subscription's first batch.
    fn reset_live(&self, snapshot: Vec<ChangeEvent>) {
        self.update_live(|live| {
            let dropped = live.len();
            live.clear();
            let mut summary = live.apply(snapshot);
            summary.removed += dropped;
            summary
        });
    }

    fn update_live<F>(&self, update: F)
    where
        F: FnOnce(&mut LiveWindow) -> ApplySummary,
    {
        let (summary, before, after) = {
            let mut live = write(&self.live);
            let before = live.len();
            let summary = update(&mut live);
            (summary, before, live.len())
        };

        if summary.ignored > 0 {
            debug!(view_id = %self.id, ignored = summary.ignored, "Change events for unknown ids ignored");
        }
        if summary.is_noop() && before == after {
            return;
        }

        self.emit(ViewEvent::LiveChanged {
            appended: summary.appended,
            replaced: summary.replaced,
            removed: summary.removed,
            live_len: after,
            scroll_to_bottom: after > before,
        });
    }

    /// Subscribe at `floor` and rebuild the live list from the first batch.
    async fn open(&self, floor: &Floor) -> Result<Subscription> {
        let mut subscription = self
            .feed
            .subscribe(floor.cursor())
            .await
            .map_err(|e| self.report(e, "subscribe to live messages"))?;
        let snapshot = subscription.next_batch().await.unwrap_or_default();
        self.reset_live(snapshot);
        Ok(subscription)
    }

    async fn listen(self: Arc<Self>, mut subscription: Subscription) {
        loop {
            while let Some(batch) = subscription.next_batch().await {
                self.apply_batch(batch);
            }

            // The service closed the stream, possibly after dropping changes.
            let floor = read(&self.floor).clone();
            info!(name: "view.subscription.reopened", view_id = %self.id, "Live subscription closed, resubscribing");
            let Ok(next) = self.open(&floor).await else {
                debug!(name: "view.subscription.ended", view_id = %self.id, "Live subscription ended");
                return;
            };
            subscription = next;
        }
    }

    /// Log a feed failure and tell the page about it.
    fn report(&self, err: FeedError, action: &str) -> ChatError {
        warn!(
            name: "view.feed.failed",
            view_id = %self.id,
            action,
            error = %err,
            "Feed service call failed"
        );
        self.emit(ViewEvent::Notice {
            message: format!("Could not {action}: {err}"),
        });
        ChatError::Feed(err)
    }
}

impl ChatView {
    /// Determine the floor, open the live subscription and apply its first batch.
    pub async fn mount(feed: Arc<dyn FeedService>, settings: &ViewSettings) -> Result<Self> {
        let floor = determine_floor(feed.as_ref(), settings.message_limit).await?;
        let pager = HistoryPager::new(
            floor.cursor().cloned(),
            settings.message_limit,
            MinLatency::new(settings.page_delay),
        );
        let (events, _) = broadcast::channel(settings.event_buffer.max(1));

        let view = Self {
            inner: Arc::new(ViewInner {
                id: Uuid::new_v4().to_string(),
                feed,
                floor: RwLock::new(floor.clone()),
                live: RwLock::new(LiveWindow::new()),
                pager,
                composer: Mutex::new(Composer::new()),
                events,
                last_activity: RwLock::new(Utc::now()),
            }),
            listener: Mutex::new(None),
        };
        view.attach(floor).await?;

        info!(
            name: "view.mounted",
            view_id = %view.id(),
            live_len = read(&view.inner.live).len(),
            has_history = view.inner.pager.has_more(),
            "Chat view mounted"
        );
        Ok(view)
    }

    /// Replace the live subscription with one anchored at `floor`.
    ///
    /// The previous listener is fully stopped before the new one starts, and
    /// the live list is rebuilt from the new subscription's first batch. A
    /// different floor also restarts history paging below it.
    pub async fn resubscribe(&self, floor: Floor) -> Result<()> {
        self.touch();
        self.attach(floor).await
    }

    async fn attach(&self, floor: Floor) -> Result<()> {
        let mut listener = self.listener.lock().await;
        if let Some(previous) = listener.take() {
            previous.abort();
            let _ = previous.await;
        }

        // History must stay strictly below the live window.
        let moved = *read(&self.inner.floor) != floor;
        if moved {
            self.inner.pager.reset(floor.cursor().cloned()).await;
            *write(&self.inner.floor) = floor.clone();
            self.inner.emit(ViewEvent::HistoryReset {
                has_more: self.inner.pager.has_more(),
            });
        }

        let subscription = self.inner.open(&floor).await?;
        let inner = Arc::clone(&self.inner);
        *listener = Some(tokio::spawn(inner.listen(subscription)));
        Ok(())
    }

    /// Stop the live subscription. Further live changes are not applied.
    pub async fn unmount(&self) {
        if let Some(handle) = self.listener.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
        info!(name: "view.unmounted", view_id = %self.id(), "Chat view unmounted");
    }

    /// Fetch the next older page, unless one is in flight or history is exhausted.
    pub async fn fetch_older_page(&self) -> Result<PageOutcome> {
        self.touch();
        let inner = &self.inner;
        let outcome = inner
            .pager
            .fetch_older_page(inner.feed.as_ref(), || inner.emit(ViewEvent::HistoryLoading))
            .await
            .map_err(|e| inner.report(e, "load older messages"))?;

        match outcome {
            PageOutcome::Fetched { count, has_more } => {
                info!(
                    name: "view.history.fetched",
                    view_id = %inner.id,
                    count,
                    has_more,
                    "Older page prepended"
                );
                inner.emit(ViewEvent::HistoryPrepended {
                    count,
                    has_more,
                    history_len: inner.pager.len(),
                });
            }
            skipped => debug!(view_id = %inner.id, outcome = ?skipped, "Older page request skipped"),
        }
        Ok(outcome)
    }

    /// Set the draft and send it.
    pub async fn send(&self, text: impl Into<String>) -> Result<SendOutcome> {
        self.touch();
        let mut composer = self.inner.composer.lock().await;
        composer.set_draft(text);
        self.send_locked(&mut composer).await
    }

    /// Send whatever is in the draft.
    pub async fn send_draft(&self) -> Result<SendOutcome> {
        self.touch();
        let mut composer = self.inner.composer.lock().await;
        self.send_locked(&mut composer).await
    }

    async fn send_locked(&self, composer: &mut Composer) -> Result<SendOutcome> {
        let outcome = composer
            .send(self.inner.feed.as_ref(), now_millis())
            .await
            .map_err(|e| self.inner.report(e, "send message"))?;
        if let SendOutcome::Sent { id } = &outcome {
            debug!(name: "view.message.sent", view_id = %self.id(), message_id = %id, "Message sent");
        }
        Ok(outcome)
    }

    pub async fn set_draft(&self, text: impl Into<String>) {
        self.inner.composer.lock().await.set_draft(text);
    }

    pub async fn draft(&self) -> String {
        self.inner.composer.lock().await.draft().to_string()
    }

    /// Delete a displayed message.
    ///
    /// History messages leave the history list immediately. Live messages
    /// stay until the subscription reports their removal. The service delete
    /// is issued either way; the returned provenance is `None` for ids that
    /// are not displayed.
    pub async fn delete(&self, id: &MessageId) -> Result<Option<Provenance>> {
        self.touch();
        let provenance = if self.inner.pager.remove(id).is_some() {
            self.inner.emit(ViewEvent::HistoryRemoved { id: id.clone() });
            Some(Provenance::History)
        } else if read(&self.inner.live).contains(id) {
            Some(Provenance::Live)
        } else {
            None
        };

        self.inner
            .feed
            .delete(id)
            .await
            .map_err(|e| self.inner.report(e, "delete message"))?;

        debug!(
            name: "view.message.deleted",
            view_id = %self.id(),
            message_id = %id,
            provenance = ?provenance,
            "Delete issued"
        );
        Ok(provenance)
    }

    /// Current rendered list.
    #[must_use]
    pub fn display(&self) -> DisplayList {
        let history = self.inner.pager.messages();
        let live = read(&self.inner.live).messages().to_vec();
        let history_len = history.len();
        let live_len = live.len();

        let items = history
            .into_iter()
            .map(|message| DisplayItem {
                message,
                provenance: Provenance::History,
            })
            .chain(live.into_iter().map(|message| DisplayItem {
                message,
                provenance: Provenance::Live,
            }))
            .collect();

        DisplayList {
            items,
            has_more: self.inner.pager.has_more(),
            loading: self.inner.pager.is_loading(),
            history_len,
            live_len,
        }
    }

    /// Receive every [`ViewEvent`] emitted from now on.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<ViewEvent> {
        self.touch();
        self.inner.events.subscribe()
    }

    /// Whether any page is listening for events.
    #[must_use]
    pub fn has_listeners(&self) -> bool {
        self.inner.events.receiver_count() > 0
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    #[must_use]
    pub fn floor(&self) -> Floor {
        read(&self.inner.floor).clone()
    }

    /// Time since the last operation on this view.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        let last = *read(&self.inner.last_activity);
        (Utc::now() - last).to_std().unwrap_or(Duration::ZERO)
    }

    fn touch(&self) {
        *write(&self.inner.last_activity) = Utc::now();
    }
}

impl Drop for ChatView {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().take() {
            handle.abort();
        }
    }
}
