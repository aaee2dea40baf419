//! Wiring between host signals and the sync components.

use crate::connection::{ConnectionConfig, ConnectionManager, ConnectionState, OutboundSink};
use crate::host::{HostNotifier, HostSignal, TabSource};
use crate::notify::NotificationDispatcher;
use crate::presence::PresenceStateStore;
use crate::tracker::TabActivityTracker;
use presence_storage::SessionStore;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub connection: ConnectionConfig,
    pub publish_on_open: bool,
}

pub struct Runtime {
    sessions: SessionStore,
    connection: Arc<ConnectionManager>,
    tracker: Arc<TabActivityTracker>,
    presence: Arc<PresenceStateStore>,
    tasks: Vec<JoinHandle<()>>,
}

impl Runtime {
    /// Build the components and start their consumer tasks. Must be called
    /// from inside a tokio runtime.
    pub fn start(
        options: RuntimeOptions,
        sessions: SessionStore,
        tabs: Arc<dyn TabSource>,
        notifier: Arc<dyn HostNotifier>,
    ) -> Self {
        let connection = Arc::new(ConnectionManager::new(
            options.connection,
            sessions.clone(),
        ));
        let tracker = Arc::new(TabActivityTracker::new(
            sessions.clone(),
            tabs,
            connection.clone() as Arc<dyn OutboundSink>,
        ));
        let presence = Arc::new(PresenceStateStore::new());

        let mut tasks = Vec::new();
        let dispatcher = NotificationDispatcher::new(sessions.clone(), notifier);
        tasks.push(tokio::spawn(
            dispatcher.run(connection.subscribe("notifications")),
        ));
        tasks.push(tokio::spawn(
            presence
                .clone()
                .run(sessions.clone(), connection.subscribe("presence")),
        ));
        if options.publish_on_open {
            tasks.push(tokio::spawn(publish_on_open(
                connection.watch_state(),
                tracker.clone(),
            )));
        }

        Self {
            sessions,
            connection,
            tracker,
            presence,
            tasks,
        }
    }

    pub async fn handle(&self, signal: HostSignal) {
        match signal {
            HostSignal::Installed | HostSignal::Started | HostSignal::UiOpened => {
                self.connection.connect().await;
            }
            HostSignal::LoginSucceeded(user) => {
                if let Err(err) = self.sessions.save(&user).await {
                    warn!(event = "session_save_failed", error = %err);
                    return;
                }
                info!(event = "login", user_id = %user.id);
                // A fresh login replaces whatever socket the old identity held.
                self.connection.close();
                self.connection.connect().await;
            }
            HostSignal::Logout => {
                if let Err(err) = self.sessions.clear().await {
                    warn!(event = "session_clear_failed", error = %err);
                }
                self.connection.close();
                self.presence.clear();
                info!(event = "logout");
            }
            HostSignal::Tab(event) => {
                self.tracker.handle(&event).await;
            }
            HostSignal::PublishNow => {
                let delivered = self.tracker.publish_now().await;
                debug!(event = "publish_now", delivered);
            }
        }
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn presence(&self) -> &Arc<PresenceStateStore> {
        &self.presence
    }

    pub fn shutdown(self) {
        self.connection.close();
        for task in &self.tasks {
            task.abort();
        }
        info!(event = "runtime_stopped");
    }
}

async fn publish_on_open(
    mut state: watch::Receiver<ConnectionState>,
    tracker: Arc<TabActivityTracker>,
) {
    loop {
        if state.changed().await.is_err() {
            return;
        }
        let current = *state.borrow_and_update();
        if current == ConnectionState::Open {
            let delivered = tracker.publish_now().await;
            debug!(event = "publish_on_open", delivered);
        }
    }
}
