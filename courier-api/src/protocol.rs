//! Wire protocol for the client session. Transport-agnostic JSON messages;
//! the WebSocket layer just frames them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use courier_core::types::Notification;

/// Messages sent by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Handshake; must be the first frame on a fresh socket.
    Connect {
        auth_token: String,
        device_id: String,
    },
    /// Receipt confirmation for a pushed notification. Fire-and-forget;
    /// the client retries if the connection drops before the send.
    Ack { notification_id: Uuid },
    MarkRead { notification_id: Uuid },
    MarkAllRead,
    Delete { notification_id: Uuid },
    ClearAll,
}

/// Messages sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake reply: everything that accumulated while offline.
    Connected { backlog: Vec<Notification> },
    /// Live push of a single notification.
    Notification {
        #[serde(flatten)]
        notification: Notification,
    },
    /// Sent on connect and after any state change affecting the count.
    UnreadCount { count: u64 },
    Error { code: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::types::{NewNotification, NotificationKind, Priority};
    use chrono::Utc;

    #[test]
    fn client_messages_round_trip() {
        let id = Uuid::new_v4();
        let messages = vec![
            ClientMessage::Connect {
                auth_token: "tok".to_string(),
                device_id: "d1".to_string(),
            },
            ClientMessage::Ack {
                notification_id: id,
            },
            ClientMessage::MarkRead {
                notification_id: id,
            },
            ClientMessage::MarkAllRead,
            ClientMessage::Delete {
                notification_id: id,
            },
            ClientMessage::ClearAll,
        ];

        for msg in messages {
            let json = serde_json::to_string(&msg).unwrap();
            let parsed: ClientMessage = serde_json::from_str(&json).unwrap();
            assert_eq!(
                serde_json::to_value(&parsed).unwrap(),
                serde_json::to_value(&msg).unwrap()
            );
        }
    }

    #[test]
    fn ack_wire_shape() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(ClientMessage::Ack {
            notification_id: id,
        })
        .unwrap();
        assert_eq!(json["type"], "ack");
        assert_eq!(json["notification_id"], id.to_string());
    }

    #[test]
    fn notification_push_is_flattened() {
        let notification = NewNotification {
            recipient_id: "u1".to_string(),
            kind: NotificationKind::Alert,
            title: "t".to_string(),
            body: "b".to_string(),
            priority: Priority::High,
            metadata: None,
            action_url: None,
        }
        .into_notification(Utc::now());
        let id = notification.id;

        let json = serde_json::to_value(ServerMessage::Notification { notification }).unwrap();
        assert_eq!(json["type"], "notification");
        // Fields live at the top level, not under a nested object.
        assert_eq!(json["id"], id.to_string());
        assert_eq!(json["priority"], "high");
    }

    #[test]
    fn unknown_message_type_fails_to_parse() {
        let result: Result<ClientMessage, _> =
            serde_json::from_str(r#"{"type":"launch_missiles"}"#);
        assert!(result.is_err());
    }
}
