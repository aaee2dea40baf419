//! What the UI shows about friends: who is online and which tabs they have
//! open, folded from inbound events.

use chrono::{DateTime, Utc};
use presence_core::wire::{ActiveTab, InboundEvent, TabSnapshot};
use presence_storage::SessionStore;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FriendPresence {
    pub online: bool,
    pub last_seen_ms: Option<i64>,
    pub active_tab: Option<ActiveTab>,
    pub tabs: Vec<TabSnapshot>,
    pub updated_at_ms: i64,
}

/// Per-friend presence keyed by friend id. Every update overwrites, so a
/// repeated snapshot leaves the store unchanged apart from `updated_at_ms`.
pub struct PresenceStateStore {
    friends: Mutex<BTreeMap<String, FriendPresence>>,
    revision: watch::Sender<u64>,
}

impl Default for PresenceStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceStateStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            friends: Mutex::new(BTreeMap::new()),
            revision,
        }
    }

    /// Fold one inbound event in. Returns whether the store changed.
    pub fn apply(&self, event: &InboundEvent, local_user: Option<&str>) -> bool {
        let Some(friend_id) = event.source_id() else {
            return false;
        };
        if local_user == Some(friend_id) {
            return false;
        }

        let now_ms = Utc::now().timestamp_millis();
        let mut friends = self.lock();
        match event {
            InboundEvent::FriendOnline(_) => {
                let entry = friends.entry(friend_id.to_string()).or_default();
                entry.online = true;
                entry.updated_at_ms = now_ms;
            }
            InboundEvent::FriendOffline(payload) => {
                let entry = friends.entry(friend_id.to_string()).or_default();
                entry.online = false;
                entry.last_seen_ms = Some(
                    payload
                        .timestamp
                        .as_deref()
                        .and_then(parse_timestamp_ms)
                        .unwrap_or(now_ms),
                );
                entry.active_tab = None;
                entry.tabs.clear();
                entry.updated_at_ms = now_ms;
            }
            InboundEvent::FriendTabs(payload) => {
                let entry = friends.entry(friend_id.to_string()).or_default();
                entry.online = true;
                entry.tabs = payload.tabs.clone();
                entry.updated_at_ms = now_ms;
            }
            InboundEvent::FriendActiveTab(payload) => {
                let entry = friends.entry(friend_id.to_string()).or_default();
                entry.online = true;
                let mut tab = payload.tab.clone();
                if tab.user_id.is_empty() {
                    tab.user_id = friend_id.to_string();
                }
                entry.active_tab = Some(tab);
                entry.updated_at_ms = now_ms;
            }
            _ => return false,
        }
        drop(friends);
        self.revision.send_modify(|revision| *revision += 1);
        true
    }

    pub fn get(&self, friend_id: &str) -> Option<FriendPresence> {
        self.lock().get(friend_id).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, FriendPresence> {
        self.lock().clone()
    }

    /// Revision counter, bumped after every change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn clear(&self) {
        let mut friends = self.lock();
        if friends.is_empty() {
            return;
        }
        friends.clear();
        drop(friends);
        self.revision.send_modify(|revision| *revision += 1);
    }

    /// Apply events from a connection subscription until it closes.
    pub async fn run(
        self: Arc<Self>,
        sessions: SessionStore,
        mut rx: mpsc::Receiver<Arc<InboundEvent>>,
    ) {
        while let Some(event) = rx.recv().await {
            let local_user = sessions.current().await.map(|session| session.user_id);
            if self.apply(&event, local_user.as_deref()) {
                debug!(event = "presence_updated", kind = event.kind());
            }
        }
        debug!(event = "presence_consumer_stopped");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, FriendPresence>> {
        self.friends
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn parse_timestamp_ms(raw: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc).timestamp_millis())
}
