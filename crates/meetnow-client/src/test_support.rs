//! In-memory gateway and fixtures for session tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::{Notify, Semaphore};

use meetnow_shared::{ChatId, CreateMessageRequest, Message, MessageId, UserId};

use crate::error::GatewayError;
use crate::gateway::MessageGateway;

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 18, 0, 0).unwrap() + Duration::seconds(secs)
}

/// Message `id` in chat `c1`, created `secs` seconds after a fixed origin.
pub fn message(id: &str, secs: i64) -> Message {
    Message {
        id: MessageId::from(id),
        chat_id: ChatId::from("c1"),
        author_id: UserId::from("bob"),
        text: Some(format!("hello from {id}")),
        media: Vec::new(),
        reply_to_id: None,
        created_at: ts(secs),
    }
}

/// Fake server holding an ascending message list.
#[derive(Default)]
pub struct FakeGateway {
    messages: Mutex<Vec<Message>>,
    scripted_pages: Mutex<VecDeque<Vec<Message>>>,
    pub fetch_cursors: Mutex<Vec<Option<MessageId>>>,
    pub fetch_count: AtomicUsize,
    pub fail_fetch: AtomicBool,
    pub fail_create: AtomicBool,
    gate: Option<FetchGate>,
}

/// Holds every fetch until the test releases it.
pub struct FetchGate {
    pub started: Notify,
    release: Semaphore,
}

impl FakeGateway {
    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages: Mutex::new(messages),
            ..Self::default()
        }
    }

    pub fn gated(messages: Vec<Message>) -> Self {
        Self {
            messages: Mutex::new(messages),
            gate: Some(FetchGate {
                started: Notify::new(),
                release: Semaphore::new(0),
            }),
            ..Self::default()
        }
    }

    pub fn gate(&self) -> &FetchGate {
        self.gate.as_ref().expect("gateway is not gated")
    }

    pub fn push_server_message(&self, message: Message) {
        self.messages.lock().unwrap().push(message);
    }

    /// Return `page` verbatim from the next fetch.
    pub fn script_page(&self, page: Vec<Message>) {
        self.scripted_pages.lock().unwrap().push_back(page);
    }
}

impl FetchGate {
    pub fn release(&self, fetches: usize) {
        self.release.add_permits(fetches);
    }
}

#[async_trait]
impl MessageGateway for FakeGateway {
    async fn fetch_page(
        &self,
        _chat_id: &ChatId,
        after: Option<&MessageId>,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Message>, GatewayError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        self.fetch_cursors.lock().unwrap().push(after.cloned());

        if let Some(gate) = &self.gate {
            gate.started.notify_one();
            gate.release.acquire().await.unwrap().forget();
        }

        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("fetch failed".into()));
        }

        if let Some(page) = self.scripted_pages.lock().unwrap().pop_front() {
            return Ok(page);
        }

        let all = self.messages.lock().unwrap().clone();
        let newer: Vec<Message> = match after.and_then(|c| all.iter().position(|m| &m.id == c)) {
            Some(pos) => all[pos + 1..].to_vec(),
            None => all,
        };

        Ok(newer
            .into_iter()
            .rev()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn create_message(
        &self,
        chat_id: &ChatId,
        request: &CreateMessageRequest,
    ) -> Result<Message, GatewayError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("create failed".into()));
        }

        let mut messages = self.messages.lock().unwrap();
        let secs = messages.last().map(|m| (m.created_at - ts(0)).num_seconds() + 1).unwrap_or(0);
        let created = Message {
            id: MessageId(format!("srv-{}", messages.len() + 1)),
            chat_id: chat_id.clone(),
            author_id: UserId::from("alice"),
            text: request.text.clone(),
            media: request.media.clone(),
            reply_to_id: request.reply_to_id.clone(),
            created_at: ts(secs),
        };
        messages.push(created.clone());
        Ok(created)
    }
}
