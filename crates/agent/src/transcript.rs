//! In-memory transcript store with change notification.

use proto::{Message, MessageId, ProtoError};
use tokio::sync::watch;
use tracing::debug;

/// Ordered sequence of messages; insertion order is display order.
///
/// Every mutation is published through a [`watch`] channel so a renderer can
/// redraw on each change via [`TranscriptStore::subscribe`].
pub struct TranscriptStore {
    tx: watch::Sender<Vec<Message>>,
}

impl TranscriptStore {
    /// Creates a store holding exactly `[seed]`.
    pub fn new(seed: Message) -> Self {
        let (tx, _rx) = watch::channel(vec![seed]);
        Self { tx }
    }

    /// Appends a message to the end.
    ///
    /// Fails only when a message with the same id is already present.
    pub fn append(&self, message: Message) -> Result<(), ProtoError> {
        let mut duplicate = None;
        self.tx.send_if_modified(|messages| {
            if messages.iter().any(|m| m.id == message.id) {
                duplicate = Some(message.id.clone());
                return false;
            }
            messages.push(message);
            true
        });
        match duplicate {
            Some(id) => Err(ProtoError::DuplicateMessageId(id.to_string())),
            None => Ok(()),
        }
    }

    /// Applies `updater` to the message matching `id`, keeping its position.
    ///
    /// Returns `false` (and publishes nothing) when no such message exists.
    /// The id is preserved even if the updater returns a different one.
    pub fn replace(&self, id: &MessageId, updater: impl FnOnce(&Message) -> Message) -> bool {
        let applied = self.tx.send_if_modified(|messages| {
            let Some(slot) = messages.iter_mut().find(|m| &m.id == id) else {
                return false;
            };
            let mut updated = updater(slot);
            updated.id = id.clone();
            *slot = updated;
            true
        });
        if !applied {
            debug!(message_id = %id, "Replace skipped: message no longer in transcript");
        }
        applied
    }

    /// Replaces the whole sequence with `[seed]`.
    pub fn reset(&self, seed: Message) {
        self.tx.send_replace(vec![seed]);
    }

    /// Returns a copy of the current sequence.
    pub fn snapshot(&self) -> Vec<Message> {
        self.tx.borrow().clone()
    }

    /// Returns a copy of the message with the given id.
    pub fn get(&self, id: &MessageId) -> Option<Message> {
        self.tx.borrow().iter().find(|m| &m.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.tx.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.borrow().is_empty()
    }

    /// Number of messages still receiving fragments.
    pub fn streaming_count(&self) -> usize {
        self.tx.borrow().iter().filter(|m| m.streaming).count()
    }

    /// Subscribes to transcript changes.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Message>> {
        self.tx.subscribe()
    }
}
