//! JSON frames exchanged with the presence server over the persistent socket.
//!
//! Every frame is a single object tagged by `type`. Field names are camelCase
//! on the wire.

use crate::NotificationCategory;
use serde::{Deserialize, Serialize};

/// One tab reduced to what is published: its host id and normalized URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TabSnapshot {
    #[serde(rename = "id")]
    pub tab_id: i64,
    #[serde(rename = "url")]
    pub normalized_url: String,
}

impl TabSnapshot {
    pub fn new(tab_id: i64, normalized_url: impl Into<String>) -> Self {
        Self {
            tab_id,
            normalized_url: normalized_url.into(),
        }
    }
}

/// The focused tab, tagged with its owner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTab {
    pub id: i64,
    #[serde(default)]
    pub user_id: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum OutboundEvent {
    #[serde(rename = "all_tabs_update", rename_all = "camelCase")]
    AllTabs {
        user_id: String,
        tabs: Vec<TabSnapshot>,
    },
    #[serde(rename = "active_tab_update", rename_all = "camelCase")]
    ActiveTab { user_id: String, tab: ActiveTab },
}

impl OutboundEvent {
    pub fn all_tabs(user_id: &str, tabs: Vec<TabSnapshot>) -> Self {
        OutboundEvent::AllTabs {
            user_id: user_id.to_string(),
            tabs,
        }
    }

    pub fn active_tab(user_id: &str, tab: TabSnapshot) -> Self {
        OutboundEvent::ActiveTab {
            user_id: user_id.to_string(),
            tab: ActiveTab {
                id: tab.tab_id,
                user_id: user_id.to_string(),
                url: tab.normalized_url,
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundEvent::AllTabs { .. } => "all_tabs_update",
            OutboundEvent::ActiveTab { .. } => "active_tab_update",
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            OutboundEvent::AllTabs { user_id, .. } | OutboundEvent::ActiveTab { user_id, .. } => {
                user_id
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewMessagePayload {
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub conversation_id: String,
    pub message_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FriendOnlinePayload {
    pub user_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl FriendOnlinePayload {
    pub fn friend_name(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.username,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FriendOfflinePayload {
    pub user_id: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequestPayload {
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub sender_username: String,
    pub request_id: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequestAcceptedPayload {
    pub accepter_id: String,
    #[serde(default)]
    pub accepter_name: String,
    #[serde(default)]
    pub accepter_username: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FriendTabsPayload {
    pub user_id: String,
    #[serde(default)]
    pub tabs: Vec<TabSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FriendActiveTabPayload {
    pub user_id: String,
    pub tab: ActiveTab,
}

/// Events pushed by the server. Unrecognised `type` values decode to
/// [`InboundEvent::Unknown`] so newer servers do not break older clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    NewMessage(NewMessagePayload),
    FriendOnline(FriendOnlinePayload),
    FriendOffline(FriendOfflinePayload),
    FriendRequestReceived(FriendRequestPayload),
    FriendRequestAccepted(FriendRequestAcceptedPayload),
    #[serde(rename = "all_tabs_update")]
    FriendTabs(FriendTabsPayload),
    #[serde(rename = "active_tab_update")]
    FriendActiveTab(FriendActiveTabPayload),
    #[serde(other)]
    Unknown,
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::NewMessage(_) => "new_message",
            InboundEvent::FriendOnline(_) => "friend_online",
            InboundEvent::FriendOffline(_) => "friend_offline",
            InboundEvent::FriendRequestReceived(_) => "friend_request_received",
            InboundEvent::FriendRequestAccepted(_) => "friend_request_accepted",
            InboundEvent::FriendTabs(_) => "all_tabs_update",
            InboundEvent::FriendActiveTab(_) => "active_tab_update",
            InboundEvent::Unknown => "unknown",
        }
    }

    /// Identity of the user whose action produced the event.
    pub fn source_id(&self) -> Option<&str> {
        match self {
            InboundEvent::NewMessage(payload) => Some(&payload.sender_id),
            InboundEvent::FriendOnline(payload) => Some(&payload.user_id),
            InboundEvent::FriendOffline(payload) => Some(&payload.user_id),
            InboundEvent::FriendRequestReceived(payload) => Some(&payload.sender_id),
            InboundEvent::FriendRequestAccepted(payload) => Some(&payload.accepter_id),
            InboundEvent::FriendTabs(payload) => Some(&payload.user_id),
            InboundEvent::FriendActiveTab(payload) => Some(&payload.user_id),
            InboundEvent::Unknown => None,
        }
    }

    /// Notification category, for events that surface as desktop notifications.
    pub fn category(&self) -> Option<NotificationCategory> {
        match self {
            InboundEvent::NewMessage(_) => Some(NotificationCategory::Messages),
            InboundEvent::FriendOnline(_) => Some(NotificationCategory::FriendOnline),
            InboundEvent::FriendRequestReceived(_) => Some(NotificationCategory::FriendRequests),
            InboundEvent::FriendRequestAccepted(_) => {
                Some(NotificationCategory::FriendRequestAccepted)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outbound_frames_match_server_schema() {
        let all = OutboundEvent::all_tabs(
            "u1",
            vec![TabSnapshot::new(4, "https://example.com")],
        );
        assert_eq!(
            serde_json::to_value(&all).expect("serialize"),
            json!({
                "type": "all_tabs_update",
                "userId": "u1",
                "tabs": [{"id": 4, "url": "https://example.com"}]
            })
        );

        let active = OutboundEvent::active_tab("u1", TabSnapshot::new(4, "chrome://settings"));
        assert_eq!(
            serde_json::to_value(&active).expect("serialize"),
            json!({
                "type": "active_tab_update",
                "userId": "u1",
                "tab": {"id": 4, "userId": "u1", "url": "chrome://settings"}
            })
        );
        assert_eq!(active.kind(), "active_tab_update");
        assert_eq!(active.user_id(), "u1");
    }

    #[test]
    fn inbound_categories_decode_with_source_identity() {
        let message: InboundEvent = serde_json::from_value(json!({
            "type": "new_message",
            "senderId": "u2",
            "senderName": "Grace",
            "content": "hello",
            "conversationId": "c-1",
            "messageId": "m-1"
        }))
        .expect("decode message");
        assert_eq!(message.source_id(), Some("u2"));
        assert_eq!(message.category(), Some(NotificationCategory::Messages));

        let accepted: InboundEvent = serde_json::from_value(json!({
            "type": "friend_request_accepted",
            "accepterId": "u3",
            "accepterName": "Linus",
            "accepterUsername": "linus",
            "timestamp": "2026-10-16T09:00:00Z"
        }))
        .expect("decode accepted");
        assert_eq!(accepted.source_id(), Some("u3"));

        let tabs: InboundEvent = serde_json::from_value(json!({
            "type": "all_tabs_update",
            "userId": "u4",
            "tabs": [{"id": 1, "url": "https://rust-lang.org"}]
        }))
        .expect("decode tabs");
        assert_eq!(tabs.category(), None);
        assert_eq!(tabs.kind(), "all_tabs_update");
    }

    #[test]
    fn unknown_type_decodes_to_unknown() {
        let event: InboundEvent =
            serde_json::from_value(json!({"type": "leaderboard_changed", "rank": 3}))
                .expect("decode unknown");
        assert_eq!(event, InboundEvent::Unknown);
        assert_eq!(event.source_id(), None);
    }

    #[test]
    fn missing_identifier_is_a_decode_error() {
        let result = serde_json::from_value::<InboundEvent>(json!({
            "type": "friend_request_received",
            "senderId": "u2",
            "senderName": "Grace"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn friend_name_prefers_display_name() {
        let payload = FriendOnlinePayload {
            user_id: "u2".to_string(),
            username: "grace".to_string(),
            display_name: Some("Grace H.".to_string()),
            timestamp: None,
        };
        assert_eq!(payload.friend_name(), "Grace H.");

        let anonymous = FriendOnlinePayload {
            display_name: Some(" ".to_string()),
            ..payload
        };
        assert_eq!(anonymous.friend_name(), "grace");
    }
}
