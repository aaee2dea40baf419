//! NDJSON protocol spoken with the host over stdio. Host messages arrive on
//! stdin, host commands leave on stdout, one JSON object per line.

use crate::host::{HostNotifier, HostSignal, HostTab, NotifyError, TabEvent, TabStatus};
use presence_core::frame::{encode_line, DEFAULT_MAX_FRAME_BYTES};
use presence_core::{Notification, UserRecord};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

pub const COMMAND_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    Installed,
    Started,
    UiOpened,
    Logout,
    PublishNow,
    LoginSucceeded {
        user: UserRecord,
    },
    /// Every tab the host has open. Sent alongside `installed`, `started`
    /// and `ui_opened` so the mirror covers tabs opened before the agent.
    #[serde(rename_all = "camelCase")]
    TabsSnapshot {
        tabs: Vec<HostTab>,
        #[serde(default)]
        focused_window_id: Option<i64>,
    },
    TabCreated {
        tab: HostTab,
    },
    #[serde(rename_all = "camelCase")]
    TabUpdated {
        tab_id: i64,
        #[serde(default = "unknown_status")]
        status: TabStatus,
        tab: HostTab,
    },
    #[serde(rename_all = "camelCase")]
    TabRemoved {
        tab_id: i64,
    },
    #[serde(rename_all = "camelCase")]
    TabActivated {
        tab_id: i64,
        #[serde(default)]
        window_id: i64,
        #[serde(default)]
        tab: Option<HostTab>,
    },
}

fn unknown_status() -> TabStatus {
    TabStatus::Unknown
}

impl From<HostMessage> for HostSignal {
    fn from(message: HostMessage) -> Self {
        match message {
            HostMessage::Installed => HostSignal::Installed,
            HostMessage::Started => HostSignal::Started,
            HostMessage::UiOpened => HostSignal::UiOpened,
            HostMessage::Logout => HostSignal::Logout,
            HostMessage::PublishNow => HostSignal::PublishNow,
            HostMessage::LoginSucceeded { user } => HostSignal::LoginSucceeded(user),
            HostMessage::TabsSnapshot {
                tabs,
                focused_window_id,
            } => HostSignal::Tab(TabEvent::Snapshot {
                tabs,
                focused_window: focused_window_id,
            }),
            HostMessage::TabCreated { tab } => HostSignal::Tab(TabEvent::Created(tab)),
            HostMessage::TabUpdated {
                tab_id,
                status,
                mut tab,
            } => {
                tab.id = tab_id;
                HostSignal::Tab(TabEvent::Updated { tab, status })
            }
            HostMessage::TabRemoved { tab_id } => HostSignal::Tab(TabEvent::Removed { tab_id }),
            HostMessage::TabActivated {
                tab_id,
                window_id,
                tab,
            } => HostSignal::Tab(TabEvent::Activated {
                tab_id,
                window_id,
                tab,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostCommand {
    Notification(Notification),
}

/// Raises notifications by queueing `notification` command lines for a
/// writer task. `create` never waits on the output: when the host stops
/// reading and the queue fills, the notification is refused.
pub struct LineNotifier {
    lines: mpsc::Sender<Vec<u8>>,
}

impl LineNotifier {
    /// Start the writer task draining into `out`. The task hands `out` back
    /// once every notifier clone is dropped.
    pub fn spawn<W>(out: W, queue_depth: usize) -> (Self, JoinHandle<W>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (lines, rx) = mpsc::channel(queue_depth.max(1));
        let writer = tokio::spawn(write_lines(out, rx));
        (Self { lines }, writer)
    }
}

async fn write_lines<W>(mut out: W, mut rx: mpsc::Receiver<Vec<u8>>) -> W
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        let written = async {
            out.write_all(&line).await?;
            out.flush().await
        }
        .await;
        if let Err(err) = written {
            warn!(event = "host_command_write_failed", error = %err);
        }
    }
    out
}

impl HostNotifier for LineNotifier {
    fn is_available(&self) -> bool {
        !self.lines.is_closed()
    }

    fn create(&self, notification: &Notification) -> Result<(), NotifyError> {
        let command = HostCommand::Notification(notification.clone());
        let line = encode_line(&command, DEFAULT_MAX_FRAME_BYTES)
            .map_err(|err| NotifyError::Rejected(err.to_string()))?;
        self.lines.try_send(line).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => {
                NotifyError::Rejected("host command queue full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => NotifyError::Unavailable,
        })
    }
}
