//! Live chatroom stream with token keepalive
//!
//! Authenticates in ephemeral mode (refresh-token continuity stays in
//! memory, no disk cache), joins a chatroom over REST, then runs the
//! WebSocket session until interrupted or unrecoverable.

pub mod session;
pub mod socket;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::api::{chat, MessengerClient};
use crate::auth::{TokenManager, TokenStore, STREAM_SAFETY_MARGIN_SECS};
use crate::config::Config;

/// Join a chatroom and run the message/keepalive loop until interrupted.
pub async fn run(config: &Config, room: Option<String>) -> Result<()> {
    let settings = config
        .auth_settings()
        .with_safety_margin(STREAM_SAFETY_MARGIN_SECS);
    let store = TokenStore::new(Config::token_cache_path()?);
    let manager =
        Arc::new(TokenManager::new(settings, store).context("Authentication setup failed")?);

    let initial = manager
        .get_token(false)
        .await
        .context("Authentication failed")?;
    println!("Authenticated.");

    let client = MessengerClient::new(config.api_url(), Arc::clone(&manager), false);

    let rooms = chat::list_chatrooms(&client)
        .await
        .context("Chatroom lookup failed")?;
    let room_id = match room {
        Some(id) => id,
        None => rooms
            .first()
            .map(|r| r.chatroom_id.clone())
            .context("No chatrooms associated with this account")?,
    };
    chat::join_chatroom(&client, &room_id)
        .await
        .context("Chatroom join failed")?;

    let socket = socket::ChatSocket::connect(config.stream_url())
        .await
        .context("Stream connection failed")?;
    let (writer, events) = socket.split();

    println!("Listening on chatroom {}... (Ctrl-C to stop)", room_id);

    let session = session::StreamSession::new(
        writer,
        events,
        Arc::clone(&manager),
        client,
        room_id,
        Duration::from_secs(session::RENEWAL_LEAD_SECS),
    );
    session.run(initial).await
}
