use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    routing::{get, put},
    Json, Router,
};
use chrono::{SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use meetnow_shared::constants::{DEFAULT_PAGE_SIZE, USER_HEADER};
use meetnow_shared::{
    ChatId, CreateMessageRequest, FetchMessagesQuery, Message, MessageId, ParticipantStatus,
    UserId,
};
use meetnow_store::Database;

use crate::config::ServerConfig;
use crate::error::ServerError;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route(
            "/chats/:chat_id/messages",
            get(fetch_messages).post(create_message),
        )
        .route(
            "/admin/chats/:chat_id/participants",
            put(admin_set_participant),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParticipantRequest {
    user_id: UserId,
    status: ParticipantStatus,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ParticipantResponse {
    chat_id: ChatId,
    user_id: UserId,
    status: ParticipantStatus,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn fetch_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Query(query): Query<FetchMessagesQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<Message>>, ServerError> {
    let caller = caller_id(&headers)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, state.config.max_page_size);
    let offset = query.offset.unwrap_or(0);

    let db = state.db.lock().await;
    require_accepted(&db, &chat_id, &caller)?;

    let after = match &query.cursor {
        Some(cursor) => {
            let pos = db.message_position(&chat_id, cursor)?;
            if pos.is_none() {
                // Unknown cursor: hand back the newest page so the client resyncs.
                warn!(chat = %chat_id, cursor = %cursor, "cursor not found, returning newest page");
            }
            pos
        }
        None => None,
    };

    let page = db.get_messages_page(&chat_id, after.as_ref(), offset, limit)?;
    debug!(chat = %chat_id, caller = %caller, count = page.len(), offset, limit, "page served");
    Ok(Json(page))
}

async fn create_message(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    headers: HeaderMap,
    Json(request): Json<CreateMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ServerError> {
    let caller = caller_id(&headers)?;
    request.validate(state.config.max_text_len)?;

    let db = state.db.lock().await;
    require_accepted(&db, &chat_id, &caller)?;

    if let Some(reply_to) = &request.reply_to_id {
        if db.message_position(&chat_id, reply_to)?.is_none() {
            return Err(ServerError::BadRequest(format!(
                "reply target {reply_to} is not in this chat"
            )));
        }
    }

    // Timestamps never go backwards within a chat, even if the clock does.
    let mut created_at = Utc::now().trunc_subsecs(6);
    if let Some(newest) = db.get_messages_page(&chat_id, None, 0, 1)?.first() {
        created_at = created_at.max(newest.created_at);
    }

    let message = Message {
        id: MessageId::generate(),
        chat_id,
        author_id: caller,
        text: request
            .text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()),
        media: request.media,
        reply_to_id: request.reply_to_id,
        created_at,
    };
    db.insert_message(&message)?;

    info!(chat = %message.chat_id, id = %message.id, author = %message.author_id, "message created");
    Ok((StatusCode::CREATED, Json(message)))
}

async fn admin_set_participant(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    headers: HeaderMap,
    Json(request): Json<ParticipantRequest>,
) -> Result<Json<ParticipantResponse>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    let db = state.db.lock().await;
    db.upsert_participant(&chat_id, &request.user_id, request.status)?;

    info!(chat = %chat_id, user = %request.user_id, status = %request.status, "Admin: participant updated");
    Ok(Json(ParticipantResponse {
        chat_id,
        user_id: request.user_id,
        status: request.status,
    }))
}

fn caller_id(headers: &HeaderMap) -> Result<UserId, ServerError> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(UserId::from)
        .ok_or_else(|| ServerError::Unauthorized(format!("missing {USER_HEADER} header")))
}

fn require_accepted(db: &Database, chat_id: &ChatId, user_id: &UserId) -> Result<(), ServerError> {
    match db.participant_status(chat_id, user_id)? {
        Some(ParticipantStatus::Accepted) => Ok(()),
        _ => Err(ServerError::Forbidden(format!(
            "{user_id} is not an accepted participant of {chat_id}"
        ))),
    }
}

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);
    info!(addr = %addr, "Starting HTTP API server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
