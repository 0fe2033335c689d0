//! Live window reconciliation.

use serde::Serialize;

use crate::feed::{ChangeEvent, ChangeKind, Message, MessageId};

/// What one batch of change events did to the live list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplySummary {
    pub appended: usize,
    pub replaced: usize,
    pub removed: usize,
    /// `modified`/`removed` events whose id was not in the list.
    pub ignored: usize,
}

impl ApplySummary {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.appended == 0 && self.replaced == 0 && self.removed == 0
    }
}

/// Messages covered by the live subscription, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct LiveWindow {
    messages: Vec<Message>,
}

impl LiveWindow {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one notification batch in order.
    ///
    /// Added messages are appended, modified ones replaced where they stand,
    /// removed ones dropped. Unknown ids are ignored.
    pub fn apply(&mut self, events: impl IntoIterator<Item = ChangeEvent>) -> ApplySummary {
        let mut summary = ApplySummary::default();

        for event in events {
            match event.kind {
                ChangeKind::Added => {
                    self.messages.push(event.data);
                    summary.appended += 1;
                }
                ChangeKind::Modified => match self.position(&event.data.id) {
                    Some(index) => {
                        self.messages[index] = event.data;
                        summary.replaced += 1;
                    }
                    None => summary.ignored += 1,
                },
                ChangeKind::Removed => match self.position(&event.data.id) {
                    Some(index) => {
                        self.messages.remove(index);
                        summary.removed += 1;
                    }
                    None => summary.ignored += 1,
                },
            }
        }

        summary
    }

    #[must_use]
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.position(id).map(|index| &self.messages[index])
    }

    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.position(id).is_some()
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.id == id)
    }
}
