//! Chat sessions: the in-memory view of the chat being displayed.
//!
//! [`ChatClient::open_chat`] rehydrates the cached log, then polls the server
//! on a fixed interval. Every poll tick runs its own fetch+merge cycle, so a
//! slow request never holds back the next tick.
//!
//! Each session carries a generation number. Opening another chat or closing
//! the session advances the client's current generation, and any cycle that
//! finishes afterwards drops its result instead of merging it.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use meetnow_shared::constants::{DEFAULT_MAX_TEXT_LEN, DEFAULT_PAGE_SIZE, DEFAULT_POLL_INTERVAL_MS};
use meetnow_shared::{ChatId, CreateMessageRequest, MediaRef, Message, MessageId, UserId};

use crate::error::{GatewayError, SyncError};
use crate::events::{emit_event, SessionEvent, EVENT_CAPACITY};
use crate::gateway::MessageGateway;
use crate::log_store::LogStore;
use crate::merge::{merge_messages, newest_id};

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub poll_interval: Duration,
    pub page_size: u32,
    /// Additional older pages one cycle may request after a full page.
    pub max_catchup_pages: u32,
    pub max_text_len: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            page_size: DEFAULT_PAGE_SIZE,
            max_catchup_pages: 5,
            max_text_len: DEFAULT_MAX_TEXT_LEN,
        }
    }
}

/// A message written locally that the server has not confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub local_id: Uuid,
    pub chat_id: ChatId,
    pub author_id: UserId,
    pub request: CreateMessageRequest,
    pub queued_at: DateTime<Utc>,
    /// Server id once the create call succeeded. The draft stays in the log
    /// until a fetch brings that message in.
    pub delivered_id: Option<MessageId>,
}

/// One row of the chat as the view should render it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    Confirmed(Message),
    Pending(Draft),
    Failed { draft: Draft, reason: String },
}

impl LogEntry {
    pub fn id(&self) -> Option<&MessageId> {
        match self {
            LogEntry::Confirmed(m) => Some(&m.id),
            _ => None,
        }
    }

    pub fn local_id(&self) -> Option<Uuid> {
        match self {
            LogEntry::Confirmed(_) => None,
            LogEntry::Pending(d) | LogEntry::Failed { draft: d, .. } => Some(d.local_id),
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            LogEntry::Confirmed(m) => m.text.as_deref(),
            LogEntry::Pending(d) | LogEntry::Failed { draft: d, .. } => d.request.text.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Merged { added: usize },
    /// More full pages remain than one cycle may request. Nothing was merged;
    /// the next cycle resumes where this one stopped.
    CatchingUp { buffered: usize },
    /// The session was torn down while the fetch was in flight.
    Discarded,
}

/// Opens chat sessions and enforces that only one of them is live.
pub struct ChatClient {
    gateway: Arc<dyn MessageGateway>,
    store: LogStore,
    author_id: UserId,
    settings: SyncSettings,
    generation: Arc<AtomicU64>,
    active: Mutex<Weak<SessionInner>>,
}

impl ChatClient {
    pub fn new(
        gateway: Arc<dyn MessageGateway>,
        store: LogStore,
        author_id: UserId,
        settings: SyncSettings,
    ) -> Self {
        Self {
            gateway,
            store,
            author_id,
            settings,
            generation: Arc::new(AtomicU64::new(0)),
            active: Mutex::new(Weak::new()),
        }
    }

    /// Open `chat_id` and start polling it. Must run inside a tokio runtime.
    ///
    /// Any previously opened session is torn down first.
    pub fn open_chat(&self, chat_id: ChatId) -> ChatSession {
        let session = self.open_chat_idle(chat_id);
        session.start_polling();
        session
    }

    /// Open `chat_id` without polling; the caller drives
    /// [`ChatSession::refresh`].
    pub fn open_chat_idle(&self, chat_id: ChatId) -> ChatSession {
        // Held for the whole open so concurrent opens cannot tear each other down.
        let mut active = lock(&self.active);
        if let Some(previous) = std::mem::take(&mut *active).upgrade() {
            previous.shutdown();
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let confirmed = self.store.load(&chat_id);
        info!(
            chat = %chat_id,
            generation,
            cached = confirmed.len(),
            "opening chat session"
        );

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = Arc::new(SessionInner {
            chat_id,
            author_id: self.author_id.clone(),
            generation,
            current: Arc::clone(&self.generation),
            closed: AtomicBool::new(false),
            gateway: Arc::clone(&self.gateway),
            store: self.store.clone(),
            settings: self.settings.clone(),
            state: Mutex::new(SessionState {
                confirmed,
                outbox: Vec::new(),
            }),
            events,
            poller: Mutex::new(None),
            catch_up: Mutex::new(None),
        });

        *active = Arc::downgrade(&inner);
        ChatSession { inner }
    }
}

/// Handle owned by the chat view. Dropping it tears the session down.
pub struct ChatSession {
    inner: Arc<SessionInner>,
}

impl ChatSession {
    pub fn chat_id(&self) -> &ChatId {
        &self.inner.chat_id
    }

    /// Whether this session is still the client's live session.
    pub fn is_active(&self) -> bool {
        self.inner.is_current()
    }

    pub fn is_polling(&self) -> bool {
        lock(&self.inner.poller).is_some()
    }

    /// Confirmed messages followed by outgoing drafts.
    pub fn entries(&self) -> Vec<LogEntry> {
        let state = lock(&self.inner.state);
        state
            .confirmed
            .iter()
            .cloned()
            .map(LogEntry::Confirmed)
            .chain(state.outbox.iter().cloned())
            .collect()
    }

    /// Confirmed messages only, oldest first.
    pub fn messages(&self) -> Vec<Message> {
        lock(&self.inner.state).confirmed.clone()
    }

    pub fn cursor(&self) -> Option<MessageId> {
        self.inner.cursor()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Start the poll timer; the first cycle runs immediately.
    pub fn start_polling(&self) {
        if !self.inner.is_current() {
            return;
        }
        let mut poller = lock(&self.inner.poller);
        if poller.is_none() {
            *poller = Some(tokio::spawn(run_poller(Arc::clone(&self.inner))));
        }
    }

    /// Run one fetch+merge cycle now.
    pub async fn refresh(&self) -> Result<RefreshOutcome, SyncError> {
        self.inner.refresh().await
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<Message, SyncError> {
        self.send(CreateMessageRequest::text(text)).await
    }

    pub async fn send_with_media(
        &self,
        text: Option<String>,
        media: Vec<MediaRef>,
    ) -> Result<Message, SyncError> {
        self.send(CreateMessageRequest {
            text,
            media,
            reply_to_id: None,
        })
        .await
    }

    /// Show `request` immediately as a pending draft, then deliver it.
    ///
    /// On success the draft is replaced by the confirmed message. On failure
    /// it stays in the log as [`LogEntry::Failed`] for [`retry`](Self::retry).
    pub async fn send(&self, request: CreateMessageRequest) -> Result<Message, SyncError> {
        request.validate(self.inner.settings.max_text_len)?;

        let draft = Draft {
            local_id: Uuid::new_v4(),
            chat_id: self.inner.chat_id.clone(),
            author_id: self.inner.author_id.clone(),
            request,
            queued_at: Utc::now(),
            delivered_id: None,
        };
        let local_id = draft.local_id;
        let request = draft.request.clone();

        let cursor = {
            let mut state = lock(&self.inner.state);
            if !self.inner.is_current() {
                return Err(SyncError::SessionClosed);
            }
            state.outbox.push(LogEntry::Pending(draft));
            newest_id(&state.confirmed).cloned()
        };

        debug!(chat = %self.inner.chat_id, %local_id, "draft queued");
        self.inner.deliver(local_id, request, cursor).await
    }

    /// Send a failed draft again.
    pub async fn retry(&self, local_id: Uuid) -> Result<Message, SyncError> {
        let (request, cursor) = {
            let mut state = lock(&self.inner.state);
            if !self.inner.is_current() {
                return Err(SyncError::SessionClosed);
            }
            let slot = state
                .outbox
                .iter_mut()
                .find(|e| matches!(e, LogEntry::Failed { draft, .. } if draft.local_id == local_id))
                .ok_or(SyncError::UnknownDraft(local_id))?;

            let LogEntry::Failed { draft, .. } = slot.clone() else {
                return Err(SyncError::UnknownDraft(local_id));
            };
            let request = draft.request.clone();
            *slot = LogEntry::Pending(draft);
            (request, newest_id(&state.confirmed).cloned())
        };

        debug!(chat = %self.inner.chat_id, %local_id, "retrying draft");
        self.inner.deliver(local_id, request, cursor).await
    }

    /// Local ids of drafts that failed to send, in send order.
    pub fn failed_drafts(&self) -> Vec<Uuid> {
        lock(&self.inner.state)
            .outbox
            .iter()
            .filter_map(|e| match e {
                LogEntry::Failed { draft, .. } => Some(draft.local_id),
                _ => None,
            })
            .collect()
    }

    /// Drop a failed draft from the log.
    pub fn discard(&self, local_id: Uuid) -> Result<(), SyncError> {
        let mut state = lock(&self.inner.state);
        let before = state.outbox.len();
        state
            .outbox
            .retain(|e| !matches!(e, LogEntry::Failed { draft, .. } if draft.local_id == local_id));
        if state.outbox.len() == before {
            return Err(SyncError::UnknownDraft(local_id));
        }
        Ok(())
    }

    /// Stop polling and clear the in-memory log. The cached log is kept.
    pub fn close(&self) {
        self.inner.shutdown();
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

struct SessionState {
    /// Ascending by `(created_at, id)`.
    confirmed: Vec<Message>,
    /// `Pending` and `Failed` entries in send order.
    outbox: Vec<LogEntry>,
}

/// Pages already pulled by a catch-up that ran out of budget.
struct CatchUp {
    cursor: MessageId,
    offset: u32,
    fetched: Vec<Message>,
}

enum Fetched {
    Complete(Vec<Message>),
    Partial { buffered: usize },
}

struct SessionInner {
    chat_id: ChatId,
    author_id: UserId,
    generation: u64,
    current: Arc<AtomicU64>,
    closed: AtomicBool,
    gateway: Arc<dyn MessageGateway>,
    store: LogStore,
    settings: SyncSettings,
    state: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    poller: Mutex<Option<JoinHandle<()>>>,
    catch_up: Mutex<Option<CatchUp>>,
}

impl SessionInner {
    fn is_current(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.current.load(Ordering::SeqCst) == self.generation
    }

    fn cursor(&self) -> Option<MessageId> {
        newest_id(&lock(&self.state).confirmed).cloned()
    }

    async fn refresh(&self) -> Result<RefreshOutcome, SyncError> {
        let cursor = self.cursor();
        match self.fetch_since(cursor.as_ref()).await? {
            Fetched::Complete(fetched) => Ok(self.apply(fetched, None)),
            Fetched::Partial { buffered } => Ok(RefreshOutcome::CatchingUp { buffered }),
        }
    }

    /// Everything newer than `cursor`, walking back through full pages.
    ///
    /// Without a cursor only the newest page is fetched. Nothing is handed
    /// out for merging until a short page proves the window is covered:
    /// merging part of it would move the cursor past the messages still
    /// missing. When the page budget runs out, or a page fails, the pages
    /// pulled so far are kept and the next cycle with the same cursor
    /// continues from there. Offsets count from the newest message, so new
    /// arrivals in between only cause overlap, never a gap.
    async fn fetch_since(&self, cursor: Option<&MessageId>) -> Result<Fetched, GatewayError> {
        let limit = self.settings.page_size.max(1);
        let Some(cursor) = cursor else {
            let page = self.gateway.fetch_page(&self.chat_id, None, 0, limit).await?;
            return Ok(Fetched::Complete(page));
        };

        let (mut offset, mut fetched) = match lock(&self.catch_up).take() {
            Some(saved) if &saved.cursor == cursor => {
                debug!(chat = %self.chat_id, offset = saved.offset, "resuming catch-up");
                (saved.offset, saved.fetched)
            }
            _ => (0, Vec::new()),
        };

        for _ in 0..=self.settings.max_catchup_pages {
            let page = match self
                .gateway
                .fetch_page(&self.chat_id, Some(cursor), offset, limit)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    self.keep_catch_up(cursor, offset, fetched);
                    return Err(e);
                }
            };
            let full = page.len() >= limit as usize;
            fetched.extend(page);

            if !full {
                return Ok(Fetched::Complete(fetched));
            }
            offset += limit;
            if !self.is_current() {
                break;
            }
            debug!(chat = %self.chat_id, offset, "page full, catching up");
        }

        let buffered = fetched.len();
        debug!(chat = %self.chat_id, buffered, "catch-up budget spent, continuing next cycle");
        self.keep_catch_up(cursor, offset, fetched);
        Ok(Fetched::Partial { buffered })
    }

    fn keep_catch_up(&self, cursor: &MessageId, offset: u32, fetched: Vec<Message>) {
        if offset == 0 || !self.is_current() {
            return;
        }
        *lock(&self.catch_up) = Some(CatchUp {
            cursor: cursor.clone(),
            offset,
            fetched,
        });
    }

    /// Merge `fetched` into the log and persist it, unless the session went
    /// stale. `confirmed_draft` and any delivered draft whose message is now
    /// in the log leave the outbox in the same step.
    fn apply(&self, fetched: Vec<Message>, confirmed_draft: Option<Uuid>) -> RefreshOutcome {
        let added = {
            let mut state = lock(&self.state);
            if !self.is_current() {
                debug!(chat = %self.chat_id, generation = self.generation, "discarding stale fetch");
                return RefreshOutcome::Discarded;
            }

            let merged = merge_messages(fetched, &state.confirmed);
            let added = {
                let known: HashSet<&MessageId> = state.confirmed.iter().map(|m| &m.id).collect();
                merged.iter().filter(|m| !known.contains(&m.id)).count()
            };

            state.outbox.retain(|entry| {
                if confirmed_draft.is_some() && entry.local_id() == confirmed_draft {
                    return false;
                }
                match entry {
                    LogEntry::Pending(Draft {
                        delivered_id: Some(id),
                        ..
                    }) => !merged.iter().any(|m| &m.id == id),
                    _ => true,
                }
            });

            if merged != state.confirmed {
                self.store.save(&self.chat_id, &merged);
            }
            state.confirmed = merged;
            added
        };

        if added > 0 {
            debug!(chat = %self.chat_id, added, "merged messages");
            emit_event(
                &self.events,
                SessionEvent::Merged {
                    chat_id: self.chat_id.clone(),
                    added,
                },
            );
        }
        RefreshOutcome::Merged { added }
    }

    async fn deliver(
        &self,
        local_id: Uuid,
        request: CreateMessageRequest,
        cursor: Option<MessageId>,
    ) -> Result<Message, SyncError> {
        match self.gateway.create_message(&self.chat_id, &request).await {
            Ok(created) => {
                // Use the pre-send cursor so messages other participants
                // posted before ours are not skipped.
                match self.fetch_since(cursor.as_ref()).await {
                    Ok(Fetched::Complete(mut fetched)) => {
                        fetched.push(created.clone());
                        self.apply(fetched, Some(local_id));
                    }
                    Ok(Fetched::Partial { .. }) => self.mark_delivered(local_id, &created.id),
                    Err(e) => {
                        warn!(chat = %self.chat_id, error = %e, "refresh after send failed");
                        self.mark_delivered(local_id, &created.id);
                    }
                }

                info!(chat = %self.chat_id, id = %created.id, "message sent");
                Ok(created)
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(chat = %self.chat_id, %local_id, error = %reason, "send failed");
                self.mark_failed(local_id, &reason);
                Err(SyncError::Send {
                    local_id,
                    source: e,
                })
            }
        }
    }

    /// Keep the draft on screen until a fetch from the old cursor merges
    /// `id` together with anything posted before it.
    fn mark_delivered(&self, local_id: Uuid, id: &MessageId) {
        let mut state = lock(&self.state);
        if !self.is_current() {
            return;
        }
        for entry in state.outbox.iter_mut() {
            if let LogEntry::Pending(draft) = entry {
                if draft.local_id == local_id {
                    draft.delivered_id = Some(id.clone());
                }
            }
        }
    }

    fn mark_failed(&self, local_id: Uuid, reason: &str) {
        {
            let mut state = lock(&self.state);
            if !self.is_current() {
                return;
            }
            let Some(slot) = state.outbox.iter_mut().find(|e| e.local_id() == Some(local_id)) else {
                return;
            };
            if let LogEntry::Pending(draft) = slot {
                *slot = LogEntry::Failed {
                    draft: draft.clone(),
                    reason: reason.to_string(),
                };
            }
        }

        emit_event(
            &self.events,
            SessionEvent::SendFailed {
                chat_id: self.chat_id.clone(),
                local_id,
                reason: reason.to_string(),
            },
        );
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Only advance the counter if no newer session has taken over.
        let _ = self.current.compare_exchange(
            self.generation,
            self.generation + 1,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );

        if let Some(handle) = lock(&self.poller).take() {
            handle.abort();
        }
        *lock(&self.catch_up) = None;

        {
            let mut state = lock(&self.state);
            state.confirmed.clear();
            state.outbox.clear();
        }

        info!(chat = %self.chat_id, generation = self.generation, "chat session closed");
        emit_event(
            &self.events,
            SessionEvent::Closed {
                chat_id: self.chat_id.clone(),
            },
        );
    }
}

async fn run_poller(inner: Arc<SessionInner>) {
    let mut ticker = tokio::time::interval(inner.settings.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Dropping the set when the task is aborted cancels in-flight cycles.
    let mut cycles = JoinSet::new();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !inner.is_current() {
                    break;
                }
                let cycle = Arc::clone(&inner);
                cycles.spawn(async move {
                    if let Err(e) = cycle.refresh().await {
                        warn!(chat = %cycle.chat_id, error = %e, "poll cycle failed");
                    }
                });
            }
            Some(_) = cycles.join_next(), if !cycles.is_empty() => {}
        }
    }

    debug!(chat = %inner.chat_id, "poller stopped");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use meetnow_store::Database;

    use super::*;
    use crate::test_support::{message, FakeGateway};

    fn settings() -> SyncSettings {
        SyncSettings {
            poll_interval: Duration::from_millis(50),
            page_size: 30,
            max_catchup_pages: 5,
            max_text_len: 100,
        }
    }

    fn client_with(gateway: Arc<FakeGateway>, store: LogStore) -> ChatClient {
        ChatClient::new(gateway, store, UserId::from("alice"), settings())
    }

    fn memory_store() -> LogStore {
        LogStore::new(Database::open_in_memory().unwrap())
    }

    fn ids(session: &ChatSession) -> Vec<String> {
        session
            .messages()
            .into_iter()
            .map(|m| m.id.0)
            .collect()
    }

    #[tokio::test]
    async fn first_refresh_without_cursor_loads_recent_page() {
        let gateway = Arc::new(FakeGateway::with_messages(vec![
            message("t1", 1),
            message("t2", 2),
            message("t3", 3),
        ]));
        let client = client_with(gateway.clone(), memory_store());
        let session = client.open_chat_idle(ChatId::from("c1"));

        let outcome = session.refresh().await.unwrap();

        assert_eq!(outcome, RefreshOutcome::Merged { added: 3 });
        assert_eq!(ids(&session), ["t1", "t2", "t3"]);
        assert_eq!(gateway.fetch_cursors.lock().unwrap()[0], None);
    }

    #[tokio::test]
    async fn refresh_uses_newest_id_as_cursor() {
        let store = memory_store();
        let chat = ChatId::from("c1");
        store.save(&chat, &[message("t1", 1), message("t2", 2)]);

        let gateway = Arc::new(FakeGateway::with_messages(vec![
            message("t1", 1),
            message("t2", 2),
            message("t3", 3),
        ]));
        let client = client_with(gateway.clone(), store);
        let session = client.open_chat_idle(chat);
        assert_eq!(ids(&session), ["t1", "t2"]);

        session.refresh().await.unwrap();

        assert_eq!(ids(&session), ["t1", "t2", "t3"]);
        assert_eq!(
            gateway.fetch_cursors.lock().unwrap()[0],
            Some(MessageId::from("t2"))
        );
    }

    #[tokio::test]
    async fn resent_message_does_not_duplicate() {
        let store = memory_store();
        let chat = ChatId::from("c1");
        store.save(&chat, &[message("t1", 1), message("t2", 2), message("t3", 3)]);

        let gateway = Arc::new(FakeGateway::default());
        gateway.script_page(vec![message("t3", 3)]);
        let client = client_with(gateway, store);
        let session = client.open_chat_idle(chat);

        let outcome = session.refresh().await.unwrap();

        assert_eq!(outcome, RefreshOutcome::Merged { added: 0 });
        assert_eq!(ids(&session), ["t1", "t2", "t3"]);
    }

    #[tokio::test]
    async fn merged_log_is_persisted() {
        let store = memory_store();
        let gateway = Arc::new(FakeGateway::with_messages(vec![message("t1", 1)]));
        let client = client_with(gateway, store.clone());
        let session = client.open_chat_idle(ChatId::from("c1"));

        session.refresh().await.unwrap();

        assert_eq!(store.load(&ChatId::from("c1")), vec![message("t1", 1)]);
    }

    #[tokio::test]
    async fn full_pages_trigger_catch_up() {
        let server: Vec<_> = (1..=8).map(|i| message(&format!("m{i}"), i)).collect();
        let gateway = Arc::new(FakeGateway::with_messages(server));
        let store = memory_store();
        let chat = ChatId::from("c1");
        store.save(&chat, &[message("m1", 1)]);

        let client = ChatClient::new(
            gateway.clone(),
            store,
            UserId::from("alice"),
            SyncSettings {
                page_size: 3,
                ..settings()
            },
        );
        let session = client.open_chat_idle(chat);
        session.refresh().await.unwrap();

        // 7 newer messages: pages of 3, 3, 1.
        assert_eq!(gateway.fetch_count.load(Ordering::SeqCst), 3);
        assert_eq!(session.messages().len(), 8);
    }

    #[tokio::test]
    async fn failed_fetch_leaves_log_untouched() {
        let gateway = Arc::new(FakeGateway::with_messages(vec![message("t1", 1)]));
        gateway.fail_fetch.store(true, Ordering::SeqCst);
        let client = client_with(gateway, memory_store());
        let session = client.open_chat_idle(ChatId::from("c1"));

        assert!(matches!(
            session.refresh().await,
            Err(SyncError::Gateway(GatewayError::Unavailable(_)))
        ));
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn send_shows_draft_then_confirmed_message() {
        let store = memory_store();
        let chat = ChatId::from("c1");
        let log = vec![message("t1", 1), message("t2", 2)];
        store.save(&chat, &log);

        let gateway = Arc::new(FakeGateway::gated(log));
        let client = client_with(gateway.clone(), store);
        let session = client.open_chat_idle(chat);

        let send = session.send_text("on my way");
        tokio::pin!(send);

        // Drive the send until it is blocked on the post-send fetch.
        tokio::select! {
            _ = &mut send => panic!("send finished while fetch was gated"),
            _ = gateway.gate().started.notified() => {}
        }
        let entries = session.entries();
        assert_eq!(entries.len(), 3);
        assert!(matches!(entries.last(), Some(LogEntry::Pending(d)) if d.request.text.as_deref() == Some("on my way")));

        gateway.gate().release(1);
        let created = send.await.unwrap();

        let entries = session.entries();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|e| matches!(e, LogEntry::Confirmed(_))));
        assert_eq!(entries.last().and_then(LogEntry::id), Some(&created.id));
    }

    #[tokio::test]
    async fn send_keeps_messages_posted_by_others_before_ours() {
        let gateway = Arc::new(FakeGateway::with_messages(vec![message("t1", 1)]));
        let client = client_with(gateway.clone(), memory_store());
        let session = client.open_chat_idle(ChatId::from("c1"));
        session.refresh().await.unwrap();

        gateway.push_server_message(message("t2", 2));
        session.send_text("me too").await.unwrap();

        let texts: Vec<_> = session.entries().iter().map(|e| e.text().map(String::from)).collect();
        assert_eq!(texts.len(), 3);
        assert_eq!(texts[2].as_deref(), Some("me too"));
        assert_eq!(ids(&session)[..2], ["t1", "t2"]);
    }

    #[tokio::test]
    async fn failed_send_stays_visible_and_can_be_retried() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.fail_create.store(true, Ordering::SeqCst);
        let client = client_with(gateway.clone(), memory_store());
        let session = client.open_chat_idle(ChatId::from("c1"));
        let mut events = session.subscribe();

        let local_id = match session.send_text("hello?").await {
            Err(SyncError::Send { local_id, .. }) => local_id,
            other => panic!("unexpected result: {other:?}"),
        };

        let entries = session.entries();
        assert_eq!(entries.len(), 1);
        assert!(matches!(&entries[0], LogEntry::Failed { draft, .. } if draft.local_id == local_id));
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::SendFailed { local_id: id, .. } if id == local_id
        ));

        assert_eq!(session.failed_drafts(), vec![local_id]);

        gateway.fail_create.store(false, Ordering::SeqCst);
        let created = session.retry(local_id).await.unwrap();
        assert!(session.failed_drafts().is_empty());

        let entries = session.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id(), Some(&created.id));
    }

    #[tokio::test]
    async fn discard_removes_failed_draft_only() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.fail_create.store(true, Ordering::SeqCst);
        let client = client_with(gateway, memory_store());
        let session = client.open_chat_idle(ChatId::from("c1"));

        let local_id = match session.send_text("oops").await {
            Err(SyncError::Send { local_id, .. }) => local_id,
            other => panic!("send should fail, got {other:?}"),
        };
        assert_eq!(session.failed_drafts(), vec![local_id]);
        session.discard(local_id).unwrap();
        assert!(session.entries().is_empty());
        assert!(session.failed_drafts().is_empty());
        assert!(matches!(
            session.discard(local_id),
            Err(SyncError::UnknownDraft(_))
        ));
        assert!(matches!(
            session.retry(local_id).await,
            Err(SyncError::UnknownDraft(_))
        ));
    }

    #[tokio::test]
    async fn blank_message_is_rejected_before_queueing() {
        let client = client_with(Arc::new(FakeGateway::default()), memory_store());
        let session = client.open_chat_idle(ChatId::from("c1"));

        assert!(matches!(
            session.send_text("  ").await,
            Err(SyncError::Invalid(_))
        ));
        assert!(session.entries().is_empty());
    }

    #[tokio::test]
    async fn fetch_resolving_after_close_is_discarded() {
        let gateway = Arc::new(FakeGateway::gated(vec![message("t1", 1)]));
        let store = memory_store();
        let client = client_with(gateway.clone(), store.clone());
        let session = client.open_chat_idle(ChatId::from("c1"));

        let (outcome, _) = tokio::join!(session.refresh(), async {
            gateway.gate().started.notified().await;
            session.close();
            gateway.gate().release(1);
        });

        assert_eq!(outcome.unwrap(), RefreshOutcome::Discarded);
        assert!(session.messages().is_empty());
        assert!(store.load(&ChatId::from("c1")).is_empty());
    }

    #[tokio::test]
    async fn opening_another_chat_tears_down_the_first() {
        let gateway = Arc::new(FakeGateway::with_messages(vec![message("t1", 1)]));
        let client = client_with(gateway, memory_store());

        let first = client.open_chat_idle(ChatId::from("c1"));
        first.refresh().await.unwrap();
        let mut first_events = first.subscribe();
        assert!(first.is_active());

        let second = client.open_chat_idle(ChatId::from("c2"));

        assert!(!first.is_active());
        assert!(second.is_active());
        assert!(first.messages().is_empty());
        assert_eq!(
            first_events.recv().await.unwrap(),
            SessionEvent::Closed {
                chat_id: ChatId::from("c1")
            }
        );
        assert_eq!(first.refresh().await.unwrap(), RefreshOutcome::Discarded);
        assert!(matches!(
            first.send_text("late").await,
            Err(SyncError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn closing_an_old_session_does_not_affect_the_new_one() {
        let client = client_with(Arc::new(FakeGateway::default()), memory_store());
        let first = client.open_chat_idle(ChatId::from("c1"));
        let second = client.open_chat_idle(ChatId::from("c2"));

        drop(first);
        assert!(second.is_active());
    }

    #[tokio::test]
    async fn poller_fetches_immediately_and_on_every_tick() {
        let gateway = Arc::new(FakeGateway::with_messages(vec![message("t1", 1)]));
        let client = client_with(gateway.clone(), memory_store());
        let session = client.open_chat(ChatId::from("c1"));
        let mut events = session.subscribe();
        assert!(session.is_polling());

        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::Merged { added: 1, .. }
        ));

        gateway.push_server_message(message("t2", 2));
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::Merged { added: 1, .. }
        ));
        assert_eq!(ids(&session), ["t1", "t2"]);
        assert!(gateway.fetch_count.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn poller_survives_failing_ticks() {
        let gateway = Arc::new(FakeGateway::with_messages(vec![message("t1", 1)]));
        gateway.fail_fetch.store(true, Ordering::SeqCst);
        let client = client_with(gateway.clone(), memory_store());
        let session = client.open_chat(ChatId::from("c1"));
        let mut events = session.subscribe();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(session.messages().is_empty());

        gateway.fail_fetch.store(false, Ordering::SeqCst);
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::Merged { added: 1, .. }
        ));
    }

    #[tokio::test]
    async fn dropping_a_polling_session_cancels_in_flight_fetch() {
        let gateway = Arc::new(FakeGateway::gated(vec![message("t1", 1)]));
        let store = memory_store();
        let client = client_with(gateway.clone(), store.clone());
        let session = client.open_chat(ChatId::from("c1"));

        gateway.gate().started.notified().await;
        drop(session);
        gateway.gate().release(10);
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(store.load(&ChatId::from("c1")).is_empty());
        assert_eq!(gateway.fetch_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn send_with_failed_follow_up_fetch_keeps_earlier_messages() {
        let store = memory_store();
        let chat = ChatId::from("c1");
        let gateway = Arc::new(FakeGateway::with_messages(vec![message("t1", 1)]));
        let client = client_with(gateway.clone(), store.clone());
        let session = client.open_chat_idle(chat.clone());
        session.refresh().await.unwrap();

        gateway.push_server_message(message("t2", 2));
        gateway.fail_fetch.store(true, Ordering::SeqCst);
        let created = session.send_text("mine").await.unwrap();

        // Delivered but not merged: the cursor must not jump past t2.
        assert_eq!(session.cursor(), Some(MessageId::from("t1")));
        let entries = session.entries();
        assert_eq!(entries.len(), 2);
        assert!(matches!(
            &entries[1],
            LogEntry::Pending(d) if d.delivered_id.as_ref() == Some(&created.id)
        ));

        gateway.fail_fetch.store(false, Ordering::SeqCst);
        session.refresh().await.unwrap();

        assert_eq!(ids(&session), ["t1", "t2", created.id.as_str()]);
        assert!(session
            .entries()
            .iter()
            .all(|e| matches!(e, LogEntry::Confirmed(_))));

        session.close();
        let reopened = client.open_chat_idle(chat);
        assert_eq!(ids(&reopened), ["t1", "t2", created.id.as_str()]);
    }

    #[tokio::test]
    async fn duplicate_entries_in_cache_do_not_break_merging() {
        let db = Database::open_in_memory().unwrap();
        db.put_json("messages:c1", &vec![message("t1", 1), message("t1", 1)])
            .unwrap();
        let client = client_with(Arc::new(FakeGateway::default()), LogStore::new(db));
        let session = client.open_chat_idle(ChatId::from("c1"));
        assert_eq!(ids(&session), ["t1"]);

        assert_eq!(
            session.refresh().await.unwrap(),
            RefreshOutcome::Merged { added: 0 }
        );
        assert_eq!(ids(&session), ["t1"]);
    }

    #[tokio::test]
    async fn catch_up_past_page_budget_resumes_without_gaps() {
        let server: Vec<_> = (1..=9).map(|i| message(&format!("m{i}"), i)).collect();
        let gateway = Arc::new(FakeGateway::with_messages(server));
        let store = memory_store();
        let chat = ChatId::from("c1");
        store.save(&chat, &[message("m1", 1)]);

        let client = ChatClient::new(
            gateway.clone(),
            store.clone(),
            UserId::from("alice"),
            SyncSettings {
                page_size: 3,
                max_catchup_pages: 1,
                ..settings()
            },
        );
        let session = client.open_chat_idle(chat.clone());

        // 8 newer messages; two pages of 3 fit in the first cycle.
        assert_eq!(
            session.refresh().await.unwrap(),
            RefreshOutcome::CatchingUp { buffered: 6 }
        );
        assert_eq!(ids(&session), ["m1"]);
        assert_eq!(session.cursor(), Some(MessageId::from("m1")));

        assert_eq!(
            session.refresh().await.unwrap(),
            RefreshOutcome::Merged { added: 8 }
        );
        let expected: Vec<String> = (1..=9).map(|i| format!("m{i}")).collect();
        assert_eq!(ids(&session), expected);
        assert_eq!(store.load(&chat).len(), 9);
        assert_eq!(gateway.fetch_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn replaced_copy_of_a_known_message_is_persisted() {
        let store = memory_store();
        let chat = ChatId::from("c1");
        let mut stale = message("t1", 1);
        stale.text = Some("stale".into());
        store.save(&chat, &[stale]);

        let gateway = Arc::new(FakeGateway::default());
        gateway.script_page(vec![message("t1", 1)]);
        let client = client_with(gateway, store.clone());
        let session = client.open_chat_idle(chat.clone());

        assert_eq!(
            session.refresh().await.unwrap(),
            RefreshOutcome::Merged { added: 0 }
        );
        assert_eq!(store.load(&chat), vec![message("t1", 1)]);
    }

    #[test]
    fn concurrent_opens_leave_exactly_one_active_session() {
        for _ in 0..50 {
            let client = Arc::new(client_with(
                Arc::new(FakeGateway::default()),
                LogStore::unavailable(),
            ));
            let handles: Vec<_> = ["c1", "c2"]
                .into_iter()
                .map(|chat| {
                    let client = Arc::clone(&client);
                    std::thread::spawn(move || client.open_chat_idle(ChatId::from(chat)))
                })
                .collect();
            let sessions: Vec<ChatSession> =
                handles.into_iter().map(|h| h.join().unwrap()).collect();

            assert_eq!(sessions.iter().filter(|s| s.is_active()).count(), 1);
        }
    }
}
