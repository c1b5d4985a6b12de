//! Messenger stream WebSocket connection and frame plumbing

use anyhow::{Context, Result};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::connect_async;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Inbound activity surfaced to the session loop.
pub enum SocketEvent {
    Text(String),
    Ping(Vec<u8>),
}

pub struct ChatSocket {
    stream: WsStream,
}

impl ChatSocket {
    /// Connect to the stream endpoint with the messenger-json subprotocol.
    pub async fn connect(url: &str) -> Result<Self> {
        let mut request = url.into_client_request().context("Invalid stream URL")?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static("messenger-json"),
        );

        tracing::info!("Connecting WebSocket to {}", url);

        let (stream, response) = connect_async(request)
            .await
            .context("WebSocket connection failed")?;

        tracing::info!("WebSocket connected (status={})", response.status());

        Ok(Self { stream })
    }

    /// Split into a write half and a channel of inbound events fed by a
    /// spawned read task, so receiving continues while the session loop is
    /// inside a renewal round-trip.
    ///
    /// The read task ends on remote close or receive error; the closed
    /// channel is how the session loop learns the stream is dead.
    pub fn split(self) -> (StreamWriter, mpsc::Receiver<SocketEvent>) {
        let (sink, mut source) = self.stream.split();
        let (tx, rx) = mpsc::channel(32);

        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        tracing::debug!("WS recv: {}", text);
                        if tx.send(SocketEvent::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Ping(data)) => {
                        if tx.send(SocketEvent::Ping(data)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        tracing::info!("WebSocket closed: {:?}", frame);
                        break;
                    }
                    Ok(other) => {
                        tracing::debug!("WS frame (ignored): {:?}", other);
                    }
                    Err(e) => {
                        tracing::warn!("WebSocket receive error: {:#}", e);
                        break;
                    }
                }
            }
        });

        (StreamWriter { sink, reader }, rx)
    }
}

/// Write half of the stream. All outbound frames funnel through it, so
/// keepalive re-auth frames cannot interleave mid-send with anything else.
pub struct StreamWriter {
    sink: SplitSink<WsStream, Message>,
    reader: JoinHandle<()>,
}

impl StreamWriter {
    pub async fn send_text(&mut self, msg: &str) -> Result<()> {
        tracing::debug!("WS send: {}", msg);
        self.sink
            .send(Message::Text(msg.to_string()))
            .await
            .context("Failed to send WebSocket message")
    }

    pub async fn send_pong(&mut self, data: Vec<u8>) -> Result<()> {
        self.sink
            .send(Message::Pong(data))
            .await
            .context("Failed to send pong")
    }

    /// Best-effort close with a bounded timeout, then stop the read task.
    /// Shutdown must never hang on network I/O.
    pub async fn close(&mut self) {
        if tokio::time::timeout(CLOSE_TIMEOUT, self.sink.send(Message::Close(None)))
            .await
            .is_err()
        {
            tracing::warn!("Timed out sending close frame");
        }
        self.reader.abort();
    }
}
