//! Store of mounted chat views.
//!
//! Each open page mounts its own [`ChatView`], with its own floor, live window
//! and history. Views are identified by UUID and removed when the page goes
//! away or after sitting idle with nobody listening.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use live_chat_feed::chat::ViewSettings;
//! use live_chat_feed::feed::MemoryFeed;
//! use live_chat_feed::views::ViewStore;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = ViewStore::new(Arc::new(MemoryFeed::new()), ViewSettings::default());
//! let view = store.mount().await.unwrap();
//!
//! assert!(store.get(view.id()).is_some());
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::info;

use crate::chat::{ChatView, ViewSettings, read, write};
use crate::error::{ChatError, Result};
use crate::feed::FeedService;

/// Thread-safe store for views.
#[derive(Debug, Clone)]
pub struct ViewStore {
    inner: Arc<ViewStoreInner>,
}

#[derive(Debug)]
struct ViewStoreInner {
    views: RwLock<HashMap<String, Arc<ChatView>>>,
    feed: Arc<dyn FeedService>,
    settings: ViewSettings,
}

impl ViewStore {
    #[must_use]
    pub fn new(feed: Arc<dyn FeedService>, settings: ViewSettings) -> Self {
        Self {
            inner: Arc::new(ViewStoreInner {
                views: RwLock::new(HashMap::new()),
                feed,
                settings,
            }),
        }
    }

    /// Mount a new view against the shared feed and register it.
    pub async fn mount(&self) -> Result<Arc<ChatView>> {
        let view = Arc::new(ChatView::mount(Arc::clone(&self.inner.feed), &self.inner.settings).await?);
        write(&self.inner.views).insert(view.id().to_string(), Arc::clone(&view));
        Ok(view)
    }

    /// Get a view by ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<ChatView>> {
        read(&self.inner.views).get(id).cloned()
    }

    /// Get a view by ID or fail with [`ChatError::ViewNotFound`].
    pub fn require(&self, id: &str) -> Result<Arc<ChatView>> {
        self.get(id)
            .ok_or_else(|| ChatError::ViewNotFound(id.to_string()))
    }

    /// Remove a view, stopping its subscription.
    pub async fn remove(&self, id: &str) -> Option<Arc<ChatView>> {
        let view = write(&self.inner.views).remove(id)?;
        view.unmount().await;
        Some(view)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        read(&self.inner.views).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn settings(&self) -> &ViewSettings {
        &self.inner.settings
    }

    /// Drop views idle longer than `timeout` that no page is listening to.
    ///
    /// Returns the number of views removed.
    pub fn cleanup_idle(&self, timeout: Duration) -> usize {
        let mut views = write(&self.inner.views);
        let before = views.len();
        views.retain(|_, view| view.has_listeners() || view.idle_for() <= timeout);
        let removed = before - views.len();
        if removed > 0 {
            info!(name: "views.cleanup", removed, remaining = views.len(), "Idle views removed");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::MemoryFeed;

    fn store() -> ViewStore {
        ViewStore::new(Arc::new(MemoryFeed::new()), ViewSettings::default())
    }

    #[tokio::test]
    async fn test_view_store() {
        let store = store();
        assert!(store.is_empty());

        let view = store.mount().await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.require(view.id()).unwrap().id(), view.id());

        assert!(store.remove(view.id()).await.is_some());
        assert!(store.is_empty());
        assert!(matches!(
            store.require(view.id()),
            Err(ChatError::ViewNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cleanup_keeps_listened_views() {
        let store = store();
        let watched = store.mount().await.unwrap();
        let _events = watched.subscribe_events();
        let abandoned = store.mount().await.unwrap();

        let removed = store.cleanup_idle(Duration::ZERO);
        // `abandoned` may not have aged past zero yet on a fast clock.
        assert!(removed <= 1);
        assert!(store.get(watched.id()).is_some());

        tokio::time::sleep(Duration::from_millis(5)).await;
        store.cleanup_idle(Duration::ZERO);
        assert!(store.get(abandoned.id()).is_none());
        assert!(store.get(watched.id()).is_some());
    }
}
