//! Typed envelopes for inbound Messenger stream frames
//!
//! Frames are JSON text: command acknowledgements carry a `reqId`,
//! server-initiated events carry an `event` discriminator. Required fields
//! are enforced here at the parse boundary rather than at point of use.

use serde::Deserialize;

/// One inbound frame on the Messenger stream.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamFrame {
    /// Echoed request ID on acknowledgements of connect/authenticate commands.
    pub req_id: Option<String>,
    /// Event name on server-initiated frames (e.g. "chatroomPost").
    pub event: Option<String>,
    /// Payload of a chatroomPost event.
    pub post: Option<ChatroomPost>,
}

/// A message posted into a chatroom the bot has joined.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatroomPost {
    pub message: String,
    pub chatroom_id: Option<String>,
    pub sender: Option<Sender>,
}

#[derive(Debug, Deserialize)]
pub struct Sender {
    pub email: Option<String>,
}

impl StreamFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// The chatroom post carried by this frame, if it is one.
    pub fn chatroom_post(&self) -> Option<&ChatroomPost> {
        match self.event.as_deref() {
            Some("chatroomPost") => self.post.as_ref(),
            _ => None,
        }
    }
}
