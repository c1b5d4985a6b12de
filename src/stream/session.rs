//! Stream session: message dispatch plus token keepalive
//!
//! The session owns the write half of the socket and the renewal timer.
//! Inbound frames arrive over a channel from the read task, so a renewal
//! round-trip never blocks receiving.

use anyhow::{bail, Context, Result};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time;

use super::socket::{SocketEvent, StreamWriter};
use crate::api::{chat, MessengerClient};
use crate::auth::{Credential, TokenManager};
use crate::models::StreamFrame;

/// Wake this long before the derived expiry to renew.
pub const RENEWAL_LEAD_SECS: u64 = 60;

/// The stream server times out a session after five minutes regardless of
/// the validity the token service reports.
pub const STREAM_SESSION_MAX_SECS: u64 = 300;

fn auth_frame(command: &str, access_token: &str) -> String {
    // Fresh random reqId per frame
    let req_id = rand::thread_rng().gen_range(0..1_000_000);
    serde_json::json!({
        "reqId": req_id.to_string(),
        "command": command,
        "payload": { "stsToken": access_token }
    })
    .to_string()
}

/// Initial authentication payload for a newly opened stream.
pub fn connect_frame(access_token: &str) -> String {
    auth_frame("connect", access_token)
}

/// In-band re-authentication payload for an already-open stream.
pub fn reauth_frame(access_token: &str) -> String {
    auth_frame("authenticate", access_token)
}

/// How long to sleep before renewing the given credential on the stream.
///
/// Errors when the validity leaves no room for a renewal round-trip before
/// the session times out.
pub fn renewal_delay(credential: &Credential, lead: Duration) -> Result<Duration> {
    let validity = credential.expires_in.min(STREAM_SESSION_MAX_SECS);
    if validity <= lead.as_secs() {
        bail!(
            "Token validity {}s leaves no room for the {}s renewal lead",
            validity,
            lead.as_secs()
        );
    }
    Ok(Duration::from_secs(validity - lead.as_secs()))
}

pub struct StreamSession {
    writer: StreamWriter,
    events: mpsc::Receiver<SocketEvent>,
    manager: Arc<TokenManager>,
    api: MessengerClient,
    room_id: String,
    renewal_lead: Duration,
}

impl StreamSession {
    pub fn new(
        writer: StreamWriter,
        events: mpsc::Receiver<SocketEvent>,
        manager: Arc<TokenManager>,
        api: MessengerClient,
        room_id: String,
        renewal_lead: Duration,
    ) -> Self {
        Self {
            writer,
            events,
            manager,
            api,
            room_id,
            renewal_lead,
        }
    }

    /// Run until the stream closes, a renewal fails, or the user interrupts.
    pub async fn run(mut self, initial: Credential) -> Result<()> {
        self.writer
            .send_text(&connect_frame(&initial.access_token))
            .await
            .context("Failed to send stream connect request")?;

        let mut renewal = Box::pin(time::sleep(renewal_delay(&initial, self.renewal_lead)?));

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(SocketEvent::Text(text)) => self.handle_frame(&text).await,
                    Some(SocketEvent::Ping(data)) => self.writer.send_pong(data).await?,
                    None => {
                        // Read task ended: remote close or receive error.
                        // Renewals must not fire against a dead connection.
                        self.writer.close().await;
                        bail!("Stream closed");
                    }
                },
                _ = &mut renewal => {
                    tracing::info!("Renewing stream token");
                    let credential = match self.manager.get_token(false).await {
                        Ok(credential) => credential,
                        Err(e) => {
                            // A stale token would be silently dropped by the
                            // server; treat the session as unrecoverable.
                            self.writer.close().await;
                            return Err(e).context("Token renewal failed, closing stream");
                        }
                    };
                    self.writer
                        .send_text(&reauth_frame(&credential.access_token))
                        .await
                        .context("Failed to push re-auth frame")?;
                    renewal = Box::pin(time::sleep(renewal_delay(&credential, self.renewal_lead)?));
                }
                _ = tokio::signal::ctrl_c() => {
                    println!("Shutting down...");
                    self.writer.close().await;
                    return Ok(());
                }
            }
        }
    }

    async fn handle_frame(&self, text: &str) {
        let frame = match StreamFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Unparseable stream frame: {:#}", e);
                return;
            }
        };

        if let Some(post) = frame.chatroom_post() {
            let sender = post
                .sender
                .as_ref()
                .and_then(|s| s.email.as_deref())
                .unwrap_or("unknown");
            println!("[{}] {}", sender, post.message);

            let reply = match post.message.trim() {
                "/help" => Some("Say 'hello' and I will greet you back.".to_string()),
                m if m.eq_ignore_ascii_case("hello") => Some(format!("Hello {}", sender)),
                _ => None,
            };

            if let Some(reply) = reply {
                if let Err(e) = chat::post_to_chatroom(&self.api, &self.room_id, &reply).await {
                    tracing::warn!("Failed to post reply: {:#}", e);
                }
            }
        } else if let Some(req_id) = &frame.req_id {
            tracing::debug!("Stream ack (reqId={})", req_id);
        } else {
            tracing::debug!("Unhandled stream frame: {}", text);
        }
    }
}
