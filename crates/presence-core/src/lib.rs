pub mod frame;
pub mod normalize;
pub mod wire;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub use normalize::normalize_url;

/// Identity the background process acts for. Only the id and token matter to
/// the sync core; everything else the login response carries stays in
/// [`UserRecord`].
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub token: String,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// The `user` record as the popup stores it after a successful login.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

impl UserRecord {
    pub fn session(&self) -> Option<Session> {
        let user_id = self.id.trim();
        let token = self.token.trim();
        if user_id.is_empty() || token.is_empty() {
            return None;
        }
        Some(Session {
            user_id: user_id.to_string(),
            token: token.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationCategory {
    Messages,
    FriendOnline,
    FriendRequests,
    FriendRequestAccepted,
}

impl NotificationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationCategory::Messages => "messages",
            NotificationCategory::FriendOnline => "friend_online",
            NotificationCategory::FriendRequests => "friend_requests",
            NotificationCategory::FriendRequestAccepted => "friend_request_accepted",
        }
    }
}

impl fmt::Display for NotificationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationCategory {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "messages" | "message" | "new_message" => Ok(NotificationCategory::Messages),
            "friend_online" | "friendonline" => Ok(NotificationCategory::FriendOnline),
            "friend_requests" | "friendrequests" | "friend_request_received" => {
                Ok(NotificationCategory::FriendRequests)
            }
            "friend_request_accepted" | "friendrequestaccepted" => {
                Ok(NotificationCategory::FriendRequestAccepted)
            }
            other => Err(format!("Unknown notification category: {other}")),
        }
    }
}

/// Per-category toggles kept under the `notificationSettings` storage key.
/// An unset toggle means the category is enabled.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friend_online: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friend_requests: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friend_request_accepted: Option<bool>,
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

impl NotificationSettings {
    pub fn is_enabled(&self, category: NotificationCategory) -> bool {
        let toggle = match category {
            NotificationCategory::Messages => self.messages,
            NotificationCategory::FriendOnline => self.friend_online,
            NotificationCategory::FriendRequests => self.friend_requests,
            NotificationCategory::FriendRequestAccepted => self.friend_request_accepted,
        };
        toggle.unwrap_or(true)
    }

    pub fn set(&mut self, category: NotificationCategory, enabled: bool) {
        let slot = match category {
            NotificationCategory::Messages => &mut self.messages,
            NotificationCategory::FriendOnline => &mut self.friend_online,
            NotificationCategory::FriendRequests => &mut self.friend_requests,
            NotificationCategory::FriendRequestAccepted => &mut self.friend_request_accepted,
        };
        *slot = Some(enabled);
    }
}

/// Host-neutral description of one desktop notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub message: String,
    pub priority: u8,
}

/// Deserialize an ID that can be either a string or a number into a String
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let val: Value = Value::deserialize(deserializer)?;
    match val {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(serde::de::Error::custom("expected string or number for id")),
    }
}
