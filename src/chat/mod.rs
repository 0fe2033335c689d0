//! Chat view: live window, history pagination and their composition.
//!
//! A mounted view keeps two lists that never share an id:
//!
//! - the **history** list, grown by prepending older pages on demand, and
//! - the **live** list, fed only by the change subscription.
//!
//! Both are anchored at one [`Floor`] document. The subscription covers the
//! floor and everything after it; history pages are always strictly older.
//! Rendering concatenates history then live.
//!
//! # Architecture
//!
//! - [`LiveWindow`]: applies change batches to the live list
//! - [`HistoryPager`]: cursor-based backward pagination, one request at a time
//! - [`determine_floor`]: picks the boundary document on mount
//! - [`Composer`]: draft handling and sending
//! - [`ChatView`]: owns all of the above plus the subscription task

mod composer;
mod floor;
mod live;
mod pager;
mod view;

pub use composer::{Composer, SendOutcome, now_millis};
pub use floor::{Floor, determine_floor};
pub use live::{ApplySummary, LiveWindow};
pub use pager::{HistoryPager, MinLatency, PageOutcome};
pub use view::{ChatView, DisplayItem, DisplayList, Provenance};

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Page size for the initial window and every history page.
pub const MESSAGE_LIMIT: usize = 10;

/// Minimum duration of a history page request.
pub const PAGE_DELAY: Duration = Duration::from_millis(2000);

/// Tunables for a mounted view.
#[derive(Debug, Clone)]
pub struct ViewSettings {
    pub message_limit: usize,
    pub page_delay: Duration,
    /// Capacity of the per-view event channel.
    pub event_buffer: usize,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            message_limit: MESSAGE_LIMIT,
            page_delay: PAGE_DELAY,
            event_buffer: 64,
        }
    }
}

// A poisoned lock still guards a valid list.
pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
