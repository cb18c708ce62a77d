use tokio::sync::broadcast;
use uuid::Uuid;

use meetnow_shared::ChatId;

/// Buffered events per session before slow receivers start lagging.
pub const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A merge added `added` new confirmed messages to the log.
    Merged { chat_id: ChatId, added: usize },
    /// An outgoing draft was rejected or could not be delivered.
    SendFailed {
        chat_id: ChatId,
        local_id: Uuid,
        reason: String,
    },
    Closed { chat_id: ChatId },
}

pub(crate) fn emit_event(tx: &broadcast::Sender<SessionEvent>, event: SessionEvent) {
    // No receivers is the normal state for headless sessions.
    if let Err(e) = tx.send(event) {
        tracing::trace!(event = ?e.0, "no session event subscribers");
    }
}
