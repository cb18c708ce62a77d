//! `meetnow-chat`: terminal view of one MeetNow chat.
//!
//! Prints the chat as it syncs and sends every line typed on stdin.
//! `/retry` resends every failed message, `/discard` drops them.
//!
//! ```text
//! MEETNOW_USER_ID=alice meetnow-chat <chat-id>
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::info;
use tracing_subscriber::EnvFilter;

use meetnow_client::{
    ChatClient, ChatSession, ClientConfig, HttpGateway, LogStore, SessionEvent, SyncError,
};
use meetnow_shared::{ChatId, MessageId};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("meetnow_client=info,meetnow_store=info,warn"));

    // Chat output goes to stdout, logs to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let chat_id = std::env::args()
        .nth(1)
        .map(ChatId::from)
        .context("usage: meetnow-chat <chat-id>")?;

    let config = ClientConfig::from_env();
    let user_id = config
        .user_id
        .clone()
        .context("MEETNOW_USER_ID must be set")?;
    info!(server = %config.server_url, user = %user_id, chat = %chat_id, "starting chat client");

    let gateway = HttpGateway::new(&config.server_url, user_id.clone(), config.request_timeout)?;
    let store = LogStore::open(config.cache_path.as_deref());
    let client = ChatClient::new(Arc::new(gateway), store, user_id, config.sync_settings());

    let session = client.open_chat(chat_id);
    let mut events = session.subscribe();
    let mut printed = HashSet::new();
    print_new(&session, &mut printed);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let command = line.trim().to_owned();
                match command.as_str() {
                    "" => continue,
                    "/retry" => {
                        for local_id in session.failed_drafts() {
                            report(session.retry(local_id).await);
                        }
                    }
                    "/discard" => {
                        for local_id in session.failed_drafts() {
                            report(session.discard(local_id));
                        }
                    }
                    _ => report(session.send_text(line).await),
                }
                print_new(&session, &mut printed);
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Merged { .. }) | Err(RecvError::Lagged(_)) => {
                    print_new(&session, &mut printed);
                }
                Ok(SessionEvent::SendFailed { reason, .. }) => {
                    eprintln!(
                        "! {} message(s) not sent ({reason}); /retry or /discard",
                        session.failed_drafts().len()
                    );
                }
                Ok(SessionEvent::Closed { .. }) | Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.close();
    info!("chat client stopped");
    Ok(())
}

/// Delivery failures are reported through `SessionEvent::SendFailed`.
fn report<T>(result: Result<T, SyncError>) {
    match result {
        Ok(_) | Err(SyncError::Send { .. }) => {}
        Err(e) => eprintln!("! {e}"),
    }
}

fn print_new(session: &ChatSession, printed: &mut HashSet<MessageId>) {
    for message in session.messages() {
        if !printed.insert(message.id.clone()) {
            continue;
        }
        let when = message.created_at.format("%H:%M");
        let text = message.text.as_deref().unwrap_or("");
        let media = if message.media.is_empty() {
            String::new()
        } else {
            format!(" [{} attachment(s)]", message.media.len())
        };
        println!("[{when}] {}: {text}{media}", message.author_id);
    }
}
