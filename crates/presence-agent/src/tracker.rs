use crate::connection::OutboundSink;
use crate::host::{HostTab, TabEvent, TabSource, TabStatus};
use presence_core::normalize_url;
use presence_core::wire::{OutboundEvent, TabSnapshot};
use presence_storage::SessionStore;
use std::sync::Arc;
use tracing::debug;

/// Turns host tab events into `all_tabs_update` / `active_tab_update`
/// publications. Every qualifying event publishes a full snapshot; nothing is
/// coalesced, so consumers must treat each frame as an overwrite.
pub struct TabActivityTracker {
    sessions: SessionStore,
    tabs: Arc<dyn TabSource>,
    sink: Arc<dyn OutboundSink>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Publication {
    all_tabs: bool,
    active_tab: bool,
}

impl Publication {
    fn for_event(event: &TabEvent) -> Self {
        match event {
            TabEvent::Created(_) | TabEvent::Removed { .. } => Publication {
                all_tabs: true,
                active_tab: false,
            },
            TabEvent::Updated {
                status: TabStatus::Complete,
                ..
            }
            | TabEvent::Snapshot { .. } => Publication {
                all_tabs: true,
                active_tab: true,
            },
            TabEvent::Updated { .. } => Publication::default(),
            TabEvent::Activated { .. } => Publication {
                all_tabs: false,
                active_tab: true,
            },
        }
    }

    fn is_empty(&self) -> bool {
        !self.all_tabs && !self.active_tab
    }
}

impl TabActivityTracker {
    pub fn new(
        sessions: SessionStore,
        tabs: Arc<dyn TabSource>,
        sink: Arc<dyn OutboundSink>,
    ) -> Self {
        Self {
            sessions,
            tabs,
            sink,
        }
    }

    /// Publish whatever `event` calls for. Returns how many frames reached an
    /// open socket.
    pub async fn handle(&self, event: &TabEvent) -> usize {
        let wanted = Publication::for_event(event);
        if wanted.is_empty() {
            return 0;
        }
        self.publish(wanted).await
    }

    /// Force one full and one focused-tab publication, whatever the last
    /// host event was.
    pub async fn publish_now(&self) -> usize {
        self.publish(Publication {
            all_tabs: true,
            active_tab: true,
        })
        .await
    }

    async fn publish(&self, wanted: Publication) -> usize {
        let Some(session) = self.sessions.current().await else {
            debug!(event = "tab_publish_skipped_no_session");
            return 0;
        };

        let mut delivered = 0;
        if wanted.all_tabs {
            let tabs = self
                .tabs
                .tabs()
                .iter()
                .filter_map(snapshot)
                .collect::<Vec<_>>();
            let count = tabs.len();
            if self
                .sink
                .send(&OutboundEvent::all_tabs(&session.user_id, tabs))
            {
                delivered += 1;
            }
            debug!(event = "all_tabs_published", tabs = count);
        }
        if wanted.active_tab {
            match self.tabs.active_tab().as_ref().and_then(snapshot) {
                Some(tab) => {
                    if self
                        .sink
                        .send(&OutboundEvent::active_tab(&session.user_id, tab))
                    {
                        delivered += 1;
                    }
                }
                None => debug!(event = "active_tab_unknown"),
            }
        }
        delivered
    }
}

fn snapshot(tab: &HostTab) -> Option<TabSnapshot> {
    let url = tab.url.as_deref().filter(|url| !url.trim().is_empty())?;
    Some(TabSnapshot::new(tab.id, normalize_url(url)))
}
