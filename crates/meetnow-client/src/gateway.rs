//! Access to the message server.
//!
//! [`MessageGateway`] is the seam between the sync core and the network.
//! [`HttpGateway`] talks to `meetnow-server` over JSON/HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, Url};
use tracing::{debug, instrument};

use meetnow_shared::constants::USER_HEADER;
use meetnow_shared::{ChatId, CreateMessageRequest, FetchMessagesQuery, Message, MessageId, UserId};

use crate::error::GatewayError;

#[async_trait]
pub trait MessageGateway: Send + Sync {
    /// Messages of `chat_id` strictly newer than `after`, newest first.
    ///
    /// If `after` no longer exists on the server the newest page is returned
    /// instead. `offset` skips that many of the newest matching messages.
    async fn fetch_page(
        &self,
        chat_id: &ChatId,
        after: Option<&MessageId>,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Message>, GatewayError>;

    /// Persist a new message authored by the caller.
    async fn create_message(
        &self,
        chat_id: &ChatId,
        request: &CreateMessageRequest,
    ) -> Result<Message, GatewayError>;
}

/// Client for the MeetNow message server.
pub struct HttpGateway {
    http: reqwest::Client,
    base_url: Url,
    user_id: UserId,
}

impl HttpGateway {
    pub fn new(base_url: &str, user_id: UserId, timeout: Duration) -> Result<Self, GatewayError> {
        let base_url =
            Url::parse(base_url).map_err(|e| GatewayError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::InvalidUrl(base_url.to_string()));
        }

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url,
            user_id,
        })
    }

    fn messages_url(&self, chat_id: &ChatId) -> Result<Url, GatewayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["chats", chat_id.as_str(), "messages"]);
        Ok(url)
    }
}

#[async_trait]
impl MessageGateway for HttpGateway {
    #[instrument(skip(self), fields(chat = %chat_id))]
    async fn fetch_page(
        &self,
        chat_id: &ChatId,
        after: Option<&MessageId>,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Message>, GatewayError> {
        let query = FetchMessagesQuery {
            cursor: after.cloned(),
            offset: (offset > 0).then_some(offset),
            limit: Some(limit),
        };

        let response = self
            .http
            .get(self.messages_url(chat_id)?)
            .header(USER_HEADER, self.user_id.as_str())
            .query(&query)
            .send()
            .await?;

        let page: Vec<Message> = check_status(response).await?.json().await?;
        debug!(count = page.len(), "fetched message page");
        Ok(page)
    }

    #[instrument(skip(self, request), fields(chat = %chat_id))]
    async fn create_message(
        &self,
        chat_id: &ChatId,
        request: &CreateMessageRequest,
    ) -> Result<Message, GatewayError> {
        let response = self
            .http
            .post(self.messages_url(chat_id)?)
            .header(USER_HEADER, self.user_id.as_str())
            .json(request)
            .send()
            .await?;

        let created: Message = check_status(response).await?.json().await?;
        debug!(id = %created.id, "message created");
        Ok(created)
    }
}

async fn check_status(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body: serde_json::Value = response.json().await.unwrap_or(serde_json::Value::Null);
    Err(status_error(status.as_u16(), &body))
}

/// Map a non-success status and its `{"error": ...}` body to an error.
fn status_error(status: u16, body: &serde_json::Value) -> GatewayError {
    let message = body
        .get("error")
        .and_then(|m| m.as_str())
        .unwrap_or("Unknown error")
        .to_string();

    match status {
        401 | 403 => GatewayError::Unauthorized { status, message },
        _ => GatewayError::Api { status, message },
    }
}
