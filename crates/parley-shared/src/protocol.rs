use serde::{Deserialize, Serialize};

use crate::message::{Message, MessageKey};
use crate::types::{RoomId, UserId};

/// Events a client sends over the chat socket.
///
/// Every frame is `{"event": "<name>", "data": <payload>}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Bind this connection to a user and mark them online
    Online(UserId),

    /// Liveness renewal
    Heartbeat(UserId),

    /// Subscribe to a room's broadcasts
    JoinRoom(RoomId),

    /// New message for a joined room
    ChatMessage(Message),

    /// Recipient's client received the message
    Delivered(AckRef),

    /// Recipient has displayed the message
    Seen(AckRef),

    /// Typing indicator, relayed verbatim
    Typing(TypingPayload),
}

/// Events the server pushes to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    Status(StatusPayload),
    ChatMessage(Message),
    NewMessageNotification(MessageNotification),
    /// The full record after the delivered flag was set
    Delivered(Message),
    /// The full record after the seen flag was set
    Seen(Message),
    Typing(TypingPayload),
}

/// Reference to a message by identity key, as carried by `delivered`/`seen`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AckRef {
    pub room_id: RoomId,
    pub from: UserId,
    pub time: i64,
}

impl AckRef {
    pub fn key(&self) -> MessageKey {
        MessageKey {
            from: self.from.clone(),
            time: self.time,
        }
    }
}

/// Typing indicator. Only `roomId` is interpreted; the rest is opaque.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TypingPayload {
    #[serde(rename = "roomId")]
    pub room_id: RoomId,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Online/offline transition of a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub user_id: UserId,
    pub online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<i64>,
}

/// Unicast to the recipient's personal channel when a message is sent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageNotification {
    pub from: UserId,
    pub to: UserId,
    pub time: i64,
    pub room_id: RoomId,
}

impl ClientEvent {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Event name as it appears on the wire, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Online(_) => "online",
            ClientEvent::Heartbeat(_) => "heartbeat",
            ClientEvent::JoinRoom(_) => "joinRoom",
            ClientEvent::ChatMessage(_) => "chatMessage",
            ClientEvent::Delivered(_) => "delivered",
            ClientEvent::Seen(_) => "seen",
            ClientEvent::Typing(_) => "typing",
        }
    }
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_client_events() {
        let online = ClientEvent::from_json(r#"{"event":"online","data":"alice"}"#).unwrap();
        assert_eq!(online, ClientEvent::Online(UserId::from("alice")));

        let join = ClientEvent::from_json(r#"{"event":"joinRoom","data":"r1"}"#).unwrap();
        assert_eq!(join, ClientEvent::JoinRoom(RoomId::from("r1")));

        let seen =
            ClientEvent::from_json(r#"{"event":"seen","data":{"roomId":"r1","from":"alice","time":5}}"#)
                .unwrap();
        match seen {
            ClientEvent::Seen(ack) => assert_eq!(ack.key(), MessageKey::new("alice", 5)),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_typing_keeps_extra_fields() {
        let raw = json!({"event": "typing", "data": {"roomId": "r1", "from": "alice", "typing": true}});
        let event: ClientEvent = serde_json::from_value(raw.clone()).unwrap();
        let ClientEvent::Typing(payload) = event else {
            panic!("expected typing");
        };
        assert_eq!(payload.room_id, RoomId::from("r1"));
        assert_eq!(payload.extra.get("typing"), Some(&json!(true)));

        let out = serde_json::to_value(ServerEvent::Typing(payload)).unwrap();
        assert_eq!(out, raw);
    }

    #[test]
    fn test_status_shape() {
        let online = ServerEvent::Status(StatusPayload {
            user_id: UserId::from("alice"),
            online: true,
            last_seen: None,
        });
        assert_eq!(
            serde_json::to_value(online).unwrap(),
            json!({"event": "status", "data": {"userId": "alice", "online": true}})
        );

        let offline = ServerEvent::Status(StatusPayload {
            user_id: UserId::from("alice"),
            online: false,
            last_seen: Some(1234),
        });
        assert_eq!(
            serde_json::to_value(offline).unwrap(),
            json!({"event": "status", "data": {"userId": "alice", "online": false, "lastSeen": 1234}})
        );
    }

    #[test]
    fn test_notification_event_name() {
        let event = ServerEvent::NewMessageNotification(MessageNotification {
            from: "alice".into(),
            to: "bob".into(),
            time: 1000,
            room_id: "r1".into(),
        });
        let value = serde_json::to_value(event).unwrap();
        assert_eq!(value["event"], "newMessageNotification");
        assert_eq!(value["data"]["roomId"], "r1");
    }

    #[test]
    fn test_relayed_chat_message_carries_cleared_flags() {
        let inbound = json!({
            "event": "chatMessage",
            "data": {"from": "alice", "to": "bob", "roomId": "r1", "time": 1000, "text": "hi"}
        });
        let ClientEvent::ChatMessage(message) = serde_json::from_value(inbound).unwrap() else {
            panic!("expected chatMessage");
        };

        let out = serde_json::to_value(ServerEvent::ChatMessage(message)).unwrap();
        assert_eq!(
            out,
            json!({
                "event": "chatMessage",
                "data": {
                    "from": "alice",
                    "to": "bob",
                    "roomId": "r1",
                    "time": 1000,
                    "text": "hi",
                    "delivered": false,
                    "seen": false,
                    "edited": false
                }
            })
        );
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        assert!(ClientEvent::from_json(r#"{"event":"explode","data":null}"#).is_err());
    }
}
