//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the browser client and the
//! API server for live marketplace subscriptions.

use scribe_market_core::domain::{AssignmentListing, ChatSession, NotificationInbox};
use serde::{Deserialize, Serialize};

/// Something a client can watch over the socket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TopicSpec {
    /// The caller's own notification inbox.
    Inbox,
    /// One chat the caller takes part in.
    Chat { chat_id: String },
    /// The available-work listing.
    OpenAssignments,
}

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start pushing snapshots for a topic. Re-subscribing is a no-op.
    Subscribe { topic: TopicSpec },

    /// Stop pushing snapshots for a topic.
    Unsubscribe { topic: TopicSpec },
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================
// Every snapshot carries the full current state of its topic, so a client
// never has to merge deltas.
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Subscribed { topic: TopicSpec },

    Unsubscribed { topic: TopicSpec },

    Inbox { inbox: NotificationInbox },

    Chat { chat: ChatSession },

    /// The chat was closed with feedback and no longer exists.
    ChatClosed { chat_id: String },

    OpenAssignments { assignments: Vec<AssignmentListing> },

    /// Reports a refused subscription or a malformed message.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subscriptions() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"subscribe","topic":{"kind":"chat","chat_id":"a_b"}}"#,
        )
        .unwrap();
        assert!(matches!(
            msg,
            ClientMessage::Subscribe { topic: TopicSpec::Chat { chat_id } } if chat_id == "a_b"
        ));

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"unsubscribe","topic":{"kind":"open_assignments"}}"#)
                .unwrap();
        assert!(matches!(
            msg,
            ClientMessage::Unsubscribe {
                topic: TopicSpec::OpenAssignments
            }
        ));
    }

    #[test]
    fn server_messages_are_tagged() {
        let json = serde_json::to_value(ServerMessage::ChatClosed {
            chat_id: "a_b".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "chat_closed");
        assert_eq!(json["chat_id"], "a_b");
    }
}
