use crate::host::{HostNotifier, NotifyError};
use presence_core::wire::InboundEvent;
use presence_core::{Notification, NotificationCategory};
use presence_storage::SessionStore;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const DEDUP_MAX_KEYS: usize = 512;
pub const DEDUP_WINDOW: Duration = Duration::from_secs(10 * 60);
const BODY_MAX_CHARS: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    NotNotifiable,
    NoSession,
    OwnEvent,
    Disabled(NotificationCategory),
    Duplicate(String),
    HostUnavailable,
    HostRejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Raised(String),
    Dropped(DropReason),
}

/// Keys raised recently, bounded by count and age. Oldest keys are evicted
/// first once the cap is reached.
pub struct RecentKeys {
    max: usize,
    ttl: Duration,
    seen: HashMap<String, Instant>,
    order: VecDeque<String>,
}

impl RecentKeys {
    pub fn new(max: usize, ttl: Duration) -> Self {
        Self {
            max,
            ttl,
            seen: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn contains(&mut self, key: &str, now: Instant) -> bool {
        self.expire(now);
        self.seen.contains_key(key)
    }

    pub fn insert(&mut self, key: String, now: Instant) {
        self.expire(now);
        if self.seen.insert(key.clone(), now).is_none() {
            self.order.push_back(key);
        }
        while self.order.len() > self.max {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn expire(&mut self, now: Instant) {
        while let Some(oldest) = self.order.front() {
            let stale = self
                .seen
                .get(oldest)
                .map_or(true, |stored_at| now.saturating_duration_since(*stored_at) > self.ttl);
            if !stale {
                break;
            }
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
    }
}

impl Default for RecentKeys {
    fn default() -> Self {
        Self::new(DEDUP_MAX_KEYS, DEDUP_WINDOW)
    }
}

/// Raises host notifications for inbound social events.
pub struct NotificationDispatcher {
    sessions: SessionStore,
    notifier: Arc<dyn HostNotifier>,
    recent: Mutex<RecentKeys>,
}

impl NotificationDispatcher {
    pub fn new(sessions: SessionStore, notifier: Arc<dyn HostNotifier>) -> Self {
        Self::with_recent_keys(sessions, notifier, RecentKeys::default())
    }

    pub fn with_recent_keys(
        sessions: SessionStore,
        notifier: Arc<dyn HostNotifier>,
        recent: RecentKeys,
    ) -> Self {
        Self {
            sessions,
            notifier,
            recent: Mutex::new(recent),
        }
    }

    pub async fn handle(&self, event: &InboundEvent) -> DispatchOutcome {
        let Some(category) = event.category() else {
            return DispatchOutcome::Dropped(DropReason::NotNotifiable);
        };
        let Some(session) = self.sessions.current().await else {
            debug!(event = "notification_dropped_no_session", kind = event.kind());
            return DispatchOutcome::Dropped(DropReason::NoSession);
        };
        if event.source_id() == Some(session.user_id.as_str()) {
            return DispatchOutcome::Dropped(DropReason::OwnEvent);
        }

        let settings = self.sessions.notification_settings().await;
        if !settings.is_enabled(category) {
            debug!(event = "notification_disabled", category = %category);
            return DispatchOutcome::Dropped(DropReason::Disabled(category));
        }

        let Some(notification) = build_notification(event) else {
            return DispatchOutcome::Dropped(DropReason::NotNotifiable);
        };
        let now = Instant::now();
        if self.recent_keys().contains(&notification.id, now) {
            debug!(event = "notification_duplicate", id = %notification.id);
            return DispatchOutcome::Dropped(DropReason::Duplicate(notification.id));
        }

        if !self.notifier.is_available() {
            warn!(event = "notification_surface_unavailable", id = %notification.id);
            return DispatchOutcome::Dropped(DropReason::HostUnavailable);
        }
        match self.notifier.create(&notification) {
            Ok(()) => {
                self.recent_keys().insert(notification.id.clone(), now);
                info!(event = "notification_raised", id = %notification.id, category = %category);
                DispatchOutcome::Raised(notification.id)
            }
            Err(NotifyError::Unavailable) => {
                warn!(event = "notification_surface_unavailable", id = %notification.id);
                DispatchOutcome::Dropped(DropReason::HostUnavailable)
            }
            Err(err) => {
                warn!(event = "notification_failed", id = %notification.id, error = %err);
                DispatchOutcome::Dropped(DropReason::HostRejected)
            }
        }
    }

    /// Consume events until the sender side goes away.
    pub async fn run(self, mut rx: mpsc::Receiver<Arc<InboundEvent>>) {
        while let Some(event) = rx.recv().await {
            self.handle(&event).await;
        }
        debug!(event = "notification_dispatcher_stopped");
    }

    fn recent_keys(&self) -> std::sync::MutexGuard<'_, RecentKeys> {
        self.recent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub fn build_notification(event: &InboundEvent) -> Option<Notification> {
    let notification = match event {
        InboundEvent::NewMessage(payload) => Notification {
            id: format!("message-{}", payload.message_id),
            title: format!("New message \n{}", payload.sender_name),
            message: truncate_body(&payload.content),
            priority: 1,
        },
        InboundEvent::FriendOnline(payload) => Notification {
            id: format!("friend-online-{}", payload.user_id),
            title: "Friend Online".to_string(),
            message: format!("{} is now online", payload.friend_name()),
            priority: 0,
        },
        InboundEvent::FriendRequestReceived(payload) => Notification {
            id: format!("friend-request-{}", payload.request_id),
            title: "New Friend Request".to_string(),
            message: format!("{} sent you a friend request", payload.sender_name),
            priority: 1,
        },
        InboundEvent::FriendRequestAccepted(payload) => Notification {
            id: format!("friend-accepted-{}", payload.accepter_id),
            title: "Friend Request Accepted".to_string(),
            message: format!("{} accepted your friend request", payload.accepter_name),
            priority: 1,
        },
        _ => return None,
    };
    Some(notification)
}

/// Cut `content` to 80 characters, marking the cut with `...`.
pub fn truncate_body(content: &str) -> String {
    match content.char_indices().nth(BODY_MAX_CHARS) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use presence_core::wire::{
        FriendOnlinePayload, FriendRequestAcceptedPayload, NewMessagePayload,
    };
    use presence_core::{NotificationSettings, UserRecord};
    use presence_storage::MemoryStorage;

    #[derive(Default)]
    struct RecordingNotifier {
        unavailable: bool,
        reject: bool,
        raised: Mutex<Vec<Notification>>,
    }

    impl HostNotifier for RecordingNotifier {
        fn is_available(&self) -> bool {
            !self.unavailable
        }

        fn create(&self, notification: &Notification) -> Result<(), NotifyError> {
            if self.reject {
                return Err(NotifyError::Rejected("quota".to_string()));
            }
            self.raised
                .lock()
                .expect("notifier lock")
                .push(notification.clone());
            Ok(())
        }
    }

    async fn signed_in_as(user_id: &str) -> SessionStore {
        let store = SessionStore::new(Arc::new(MemoryStorage::new()));
        store
            .save(&UserRecord {
                id: user_id.to_string(),
                token: "tok".to_string(),
                username: None,
                display_name: None,
                extra: HashMap::new(),
            })
            .await
            .expect("save session");
        store
    }

    fn message_from(sender_id: &str, message_id: &str, content: &str) -> InboundEvent {
        InboundEvent::NewMessage(NewMessagePayload {
            sender_id: sender_id.to_string(),
            sender_name: "Grace".to_string(),
            content: content.to_string(),
            conversation_id: "c1".to_string(),
            message_id: message_id.to_string(),
        })
    }

    #[tokio::test]
    async fn own_events_are_never_notified() {
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = NotificationDispatcher::new(signed_in_as("u1").await, notifier.clone());

        let own = dispatcher.handle(&message_from("u1", "m1", "hi")).await;
        assert_eq!(own, DispatchOutcome::Dropped(DropReason::OwnEvent));

        let other = dispatcher.handle(&message_from("u2", "m2", "hi")).await;
        assert_eq!(other, DispatchOutcome::Raised("message-m2".to_string()));

        let raised = notifier.raised.lock().expect("notifier lock");
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].title, "New message \nGrace");
        assert_eq!(raised[0].priority, 1);
    }

    #[tokio::test]
    async fn same_identifier_notifies_once() {
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = NotificationDispatcher::new(signed_in_as("u1").await, notifier.clone());
        let online = InboundEvent::FriendOnline(FriendOnlinePayload {
            user_id: "u2".to_string(),
            username: "grace".to_string(),
            display_name: Some("Grace H".to_string()),
            timestamp: None,
        });

        assert_eq!(
            dispatcher.handle(&online).await,
            DispatchOutcome::Raised("friend-online-u2".to_string())
        );
        assert_eq!(
            dispatcher.handle(&online).await,
            DispatchOutcome::Dropped(DropReason::Duplicate("friend-online-u2".to_string()))
        );

        let raised = notifier.raised.lock().expect("notifier lock");
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].message, "Grace H is now online");
        assert_eq!(raised[0].priority, 0);
    }

    #[tokio::test]
    async fn signed_out_drops_everything() {
        let notifier = Arc::new(RecordingNotifier::default());
        let sessions = SessionStore::new(Arc::new(MemoryStorage::new()));
        let dispatcher = NotificationDispatcher::new(sessions, notifier.clone());

        assert_eq!(
            dispatcher.handle(&message_from("u2", "m1", "hi")).await,
            DispatchOutcome::Dropped(DropReason::NoSession)
        );
        assert!(notifier.raised.lock().expect("notifier lock").is_empty());
    }

    #[tokio::test]
    async fn disabled_category_is_dropped() {
        let sessions = signed_in_as("u1").await;
        let mut settings = NotificationSettings::default();
        settings.set(NotificationCategory::FriendRequestAccepted, false);
        sessions
            .save_notification_settings(&settings)
            .await
            .expect("save settings");
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = NotificationDispatcher::new(sessions, notifier.clone());

        let accepted = InboundEvent::FriendRequestAccepted(FriendRequestAcceptedPayload {
            accepter_id: "u3".to_string(),
            accepter_name: "Linus".to_string(),
            accepter_username: "linus".to_string(),
            timestamp: None,
        });
        assert_eq!(
            dispatcher.handle(&accepted).await,
            DispatchOutcome::Dropped(DropReason::Disabled(
                NotificationCategory::FriendRequestAccepted
            ))
        );
        assert_eq!(
            dispatcher.handle(&message_from("u3", "m9", "still on")).await,
            DispatchOutcome::Raised("message-m9".to_string())
        );
    }

    #[tokio::test]
    async fn unavailable_host_is_not_remembered() {
        let sessions = signed_in_as("u1").await;
        let offline = NotificationDispatcher::new(
            sessions.clone(),
            Arc::new(RecordingNotifier {
                unavailable: true,
                ..Default::default()
            }),
        );
        assert_eq!(
            offline.handle(&message_from("u2", "m1", "hi")).await,
            DispatchOutcome::Dropped(DropReason::HostUnavailable)
        );
        assert!(offline.recent_keys().is_empty());

        let rejecting = NotificationDispatcher::new(
            sessions,
            Arc::new(RecordingNotifier {
                reject: true,
                ..Default::default()
            }),
        );
        assert_eq!(
            rejecting.handle(&message_from("u2", "m1", "hi")).await,
            DispatchOutcome::Dropped(DropReason::HostRejected)
        );
    }

    #[tokio::test]
    async fn presence_only_events_are_not_notifiable() {
        let dispatcher = NotificationDispatcher::new(
            signed_in_as("u1").await,
            Arc::new(RecordingNotifier::default()),
        );
        assert_eq!(
            dispatcher.handle(&InboundEvent::Unknown).await,
            DispatchOutcome::Dropped(DropReason::NotNotifiable)
        );
    }

    #[test]
    fn long_bodies_are_truncated_to_eighty_chars() {
        let long = "é".repeat(100);
        let cut = truncate_body(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), 83);
        assert_eq!(truncate_body(&"a".repeat(80)), "a".repeat(80));
        assert_eq!(truncate_body("short"), "short");
    }

    #[test]
    fn recent_keys_expire_and_respect_cap() {
        let start = Instant::now();
        let mut keys = RecentKeys::new(2, Duration::from_secs(60));
        keys.insert("a".to_string(), start);
        keys.insert("b".to_string(), start);
        keys.insert("c".to_string(), start);
        assert_eq!(keys.len(), 2);
        assert!(!keys.contains("a", start));
        assert!(keys.contains("c", start));

        let later = start + Duration::from_secs(61);
        assert!(!keys.contains("c", later));
        assert!(keys.is_empty());
    }
}
