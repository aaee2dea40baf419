//! Typed view of the host browser: tab lifecycle, identity and process
//! signals coming in, notifications going out.

use presence_core::{Notification, UserRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use thiserror::Error;

/// A tab as the host reports it. `url` is absent until the tab commits its
/// first navigation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HostTab {
    pub id: i64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub window_id: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TabStatus {
    Loading,
    Complete,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabEvent {
    Created(HostTab),
    Updated {
        tab: HostTab,
        status: TabStatus,
    },
    Removed {
        tab_id: i64,
    },
    /// The user focused `tab_id`. The host sends the tab itself when it can,
    /// so tabs opened before the agent started still resolve to a URL.
    Activated {
        tab_id: i64,
        window_id: i64,
        tab: Option<HostTab>,
    },
    /// Every tab the host has open, replacing whatever the mirror held.
    Snapshot {
        tabs: Vec<HostTab>,
        focused_window: Option<i64>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostSignal {
    Installed,
    Started,
    LoginSucceeded(UserRecord),
    Logout,
    UiOpened,
    Tab(TabEvent),
    PublishNow,
}

/// Read access to the host's current tab set.
pub trait TabSource: Send + Sync {
    fn tabs(&self) -> Vec<HostTab>;
    fn active_tab(&self) -> Option<HostTab>;
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification surface unavailable")]
    Unavailable,
    #[error("host rejected notification: {0}")]
    Rejected(String),
}

/// Host notification surface.
pub trait HostNotifier: Send + Sync {
    fn is_available(&self) -> bool {
        true
    }

    fn create(&self, notification: &Notification) -> Result<(), NotifyError>;
}

#[derive(Default)]
struct TabTableInner {
    tabs: BTreeMap<i64, HostTab>,
    focused: Option<i64>,
    focused_window: Option<i64>,
}

/// Local mirror of the host tab table, kept current from [`TabEvent`]s so
/// snapshots can be taken without a round trip to the host.
///
/// `HostTab::active` is per window. Only the focused window's selected tab is
/// the user's active tab, and only activation (or a snapshot naming the
/// window) moves window focus.
#[derive(Default)]
pub struct TabTable {
    inner: Mutex<TabTableInner>,
}

impl TabTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, event: &TabEvent) {
        let mut inner = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match event {
            TabEvent::Created(tab) | TabEvent::Updated { tab, .. } => {
                let mut stored = tab.clone();
                stored.active = stored.active || inner.focused == Some(tab.id);
                inner.upsert(stored);
                if tab.active && inner.focused_window.map_or(true, |window| window == tab.window_id) {
                    inner.focused_window = Some(tab.window_id);
                    inner.focused = Some(tab.id);
                }
            }
            TabEvent::Removed { tab_id } => {
                inner.tabs.remove(tab_id);
                if inner.focused == Some(*tab_id) {
                    inner.focused = inner.selected_in_focused_window();
                }
            }
            TabEvent::Activated {
                tab_id,
                window_id,
                tab,
            } => {
                if let Some(tab) = tab {
                    let mut tab = tab.clone();
                    tab.id = *tab_id;
                    tab.window_id = *window_id;
                    inner.upsert(tab);
                }
                inner.select(*tab_id, *window_id);
                inner.focused_window = Some(*window_id);
                inner.focused = Some(*tab_id);
            }
            TabEvent::Snapshot {
                tabs,
                focused_window,
            } => {
                inner.tabs = tabs.iter().map(|tab| (tab.id, tab.clone())).collect();
                if focused_window.is_some() {
                    inner.focused_window = *focused_window;
                }
                if inner.focused_window.is_none() {
                    inner.focused_window = tabs.iter().find(|tab| tab.active).map(|tab| tab.window_id);
                }
                inner.focused = inner.selected_in_focused_window();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .tabs
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TabTableInner {
    fn upsert(&mut self, tab: HostTab) {
        if tab.active {
            self.select(tab.id, tab.window_id);
        }
        self.tabs.insert(tab.id, tab);
    }

    /// Mark `tab_id` as the selected tab of `window_id`.
    fn select(&mut self, tab_id: i64, window_id: i64) {
        for tab in self.tabs.values_mut() {
            if tab.window_id == window_id {
                tab.active = tab.id == tab_id;
            }
        }
    }

    fn selected_in_focused_window(&self) -> Option<i64> {
        let window = self.focused_window?;
        self.tabs
            .values()
            .find(|tab| tab.active && tab.window_id == window)
            .map(|tab| tab.id)
    }
}

impl TabSource for TabTable {
    fn tabs(&self) -> Vec<HostTab> {
        let inner = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.tabs.values().cloned().collect()
    }

    fn active_tab(&self) -> Option<HostTab> {
        let inner = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.focused.and_then(|id| inner.tabs.get(&id)).cloned()
    }
}
