//! Background presence agent: keeps one authenticated socket to the presence
//! server, publishes the local tab set, raises notifications for social
//! events and tracks what friends are doing.

pub mod bridge;
pub mod config;
pub mod connection;
pub mod host;
pub mod logging;
pub mod notify;
pub mod presence;
pub mod runtime;
pub mod tracker;

pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState, OutboundSink};
pub use host::{HostNotifier, HostSignal, HostTab, TabEvent, TabSource, TabStatus, TabTable};
pub use notify::{DispatchOutcome, DropReason, NotificationDispatcher};
pub use presence::{FriendPresence, PresenceStateStore};
pub use runtime::{Runtime, RuntimeOptions};
pub use tracker::TabActivityTracker;
