//! Chatroom and direct-message operations

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;

use super::client::MessengerClient;

#[derive(Debug, Deserialize)]
struct ChatroomsResponse {
    chatrooms: Option<Vec<Chatroom>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chatroom {
    pub chatroom_id: String,
    pub name: Option<String>,
}

/// List chatrooms associated with the bot account.
pub async fn list_chatrooms(client: &MessengerClient) -> Result<Vec<Chatroom>> {
    let resp = client.get("/chatrooms").await?;
    let parsed: ChatroomsResponse = resp.json().await.context("Failed to parse chatroom list")?;
    Ok(parsed.chatrooms.unwrap_or_default())
}

pub async fn join_chatroom(client: &MessengerClient, room_id: &str) -> Result<()> {
    client
        .post(&format!("/chatrooms/{}/join", room_id), None)
        .await?;
    tracing::info!("Joined chatroom {}", room_id);
    Ok(())
}

pub async fn post_to_chatroom(client: &MessengerClient, room_id: &str, text: &str) -> Result<()> {
    client
        .post(
            &format!("/chatrooms/{}/post", room_id),
            Some(&json!({ "message": text })),
        )
        .await?;
    Ok(())
}

pub async fn leave_chatroom(client: &MessengerClient, room_id: &str) -> Result<()> {
    client
        .post(&format!("/chatrooms/{}/leave", room_id), None)
        .await?;
    tracing::info!("Left chatroom {}", room_id);
    Ok(())
}

/// Send a 1:1 message to a contact email, without a chatroom.
pub async fn send_direct_message(
    client: &MessengerClient,
    contact_email: &str,
    text: &str,
) -> Result<()> {
    client
        .post(
            "/message",
            Some(&json!({ "recipientEmail": contact_email, "message": text })),
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chatroom_list() {
        let parsed: ChatroomsResponse = serde_json::from_str(
            r#"{"chatrooms":[{"chatroomId":"groupchat-1","name":"FX desk"}]}"#,
        )
        .unwrap();

        let rooms = parsed.chatrooms.unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].chatroom_id, "groupchat-1");
        assert_eq!(rooms[0].name.as_deref(), Some("FX desk"));
    }

    #[test]
    fn test_parse_empty_chatroom_list() {
        let parsed: ChatroomsResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.chatrooms.is_none());
    }
}
