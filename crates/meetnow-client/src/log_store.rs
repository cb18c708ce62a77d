//! Durable per-chat message log.
//!
//! The server stays authoritative, so this is a best-effort cache: a read
//! that fails looks like an empty log and a write that fails is dropped.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use meetnow_shared::{ChatId, Message};
use meetnow_store::Database;

use crate::merge::merge_messages;

#[derive(Clone)]
pub struct LogStore {
    db: Option<Arc<Mutex<Database>>>,
}

impl LogStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Some(Arc::new(Mutex::new(db))),
        }
    }

    /// A store with no backing storage. Loads are empty, saves are no-ops.
    pub fn unavailable() -> Self {
        Self { db: None }
    }

    /// Open the cache database at `path`, degrading to [`LogStore::unavailable`]
    /// when there is no path or the file cannot be opened.
    pub fn open(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            debug!("no cache path configured, chat logs will not persist");
            return Self::unavailable();
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(path = %parent.display(), error = %e, "cannot create cache directory");
            }
        }

        match Database::open_at(path) {
            Ok(db) => Self::new(db),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cache unavailable, continuing without it");
                Self::unavailable()
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.db.is_some()
    }

    /// The persisted log of `chat_id`, deduplicated and in time order, or an
    /// empty log.
    pub fn load(&self, chat_id: &ChatId) -> Vec<Message> {
        let Some(db) = self.lock() else {
            return Vec::new();
        };

        match db.get_json::<Vec<Message>>(&log_key(chat_id)) {
            Ok(Some(stored)) => {
                // Stored data is not trusted to be deduplicated or ordered.
                let messages = merge_messages(Vec::new(), &stored);
                if messages.len() != stored.len() {
                    warn!(
                        chat = %chat_id,
                        dropped = stored.len() - messages.len(),
                        "dropped duplicate entries from cached chat log"
                    );
                }
                debug!(chat = %chat_id, count = messages.len(), "loaded cached chat log");
                messages
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(chat = %chat_id, error = %e, "discarding unreadable chat log");
                Vec::new()
            }
        }
    }

    /// Overwrite the persisted log of `chat_id` with `messages`.
    pub fn save(&self, chat_id: &ChatId, messages: &[Message]) {
        let Some(db) = self.lock() else {
            return;
        };

        if let Err(e) = db.put_json(&log_key(chat_id), messages) {
            warn!(chat = %chat_id, error = %e, "failed to persist chat log");
        }
    }

    fn lock(&self) -> Option<MutexGuard<'_, Database>> {
        self.db
            .as_ref()
            .map(|db| db.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

fn log_key(chat_id: &ChatId) -> String {
    format!("messages:{chat_id}")
}
