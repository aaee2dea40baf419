//! The single persistent socket to the presence server.
//!
//! [`ConnectionManager`] owns at most one live connection task per process.
//! Outbound frames are best effort: they are written only while the socket is
//! open and are never queued across reconnects. Inbound frames are decoded and
//! fanned out to subscriber queues without waiting on any subscriber.

use futures_util::{SinkExt, StreamExt};
use presence_core::frame::{decode_frame, encode_text};
use presence_core::wire::{InboundEvent, OutboundEvent};
use presence_core::Session;
use presence_storage::SessionStore;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard,
};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue, Request};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub endpoint: Url,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    pub max_frame_bytes: usize,
    pub subscriber_queue: usize,
}

/// Where outbound presence events go. Returns whether the event was handed
/// to an open socket.
pub trait OutboundSink: Send + Sync {
    fn send(&self, event: &OutboundEvent) -> bool;
}

struct Handle {
    id: u64,
    outbound: mpsc::UnboundedSender<String>,
    shutdown: watch::Sender<bool>,
}

struct Subscriber {
    name: &'static str,
    sender: mpsc::Sender<Arc<InboundEvent>>,
}

struct Shared {
    handle: Mutex<Option<Handle>>,
    state: watch::Sender<ConnectionState>,
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn set_state_if_current(&self, id: u64, state: ConnectionState) {
        let handle = lock(&self.handle);
        if handle.as_ref().map(|h| h.id) == Some(id) {
            self.state.send_replace(state);
        }
    }

    /// Called by a connection task on its way out.
    fn finish(&self, id: u64) {
        let mut handle = lock(&self.handle);
        match handle.as_ref() {
            Some(current) if current.id == id => {
                *handle = None;
                self.state.send_replace(ConnectionState::Disconnected);
            }
            None => {
                if *self.state.borrow() == ConnectionState::Closing {
                    self.state.send_replace(ConnectionState::Disconnected);
                }
            }
            Some(_) => {}
        }
    }

    fn dispatch(&self, raw: &[u8], max_frame_bytes: usize) {
        let event = match decode_frame::<InboundEvent>(raw, max_frame_bytes) {
            Ok(InboundEvent::Unknown) => {
                debug!(event = "inbound_unknown_type", bytes = raw.len());
                return;
            }
            Ok(event) => Arc::new(event),
            Err(err) => {
                warn!(event = "inbound_frame_dropped", error = %err, bytes = raw.len());
                return;
            }
        };

        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|subscriber| match subscriber.sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    event = "subscriber_lagging",
                    subscriber = subscriber.name,
                    kind = event.kind()
                );
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(event = "subscriber_gone", subscriber = subscriber.name);
                false
            }
        });
    }
}

pub struct ConnectionManager {
    config: ConnectionConfig,
    sessions: SessionStore,
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, sessions: SessionStore) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            sessions,
            shared: Arc::new(Shared {
                handle: Mutex::new(None),
                state,
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Register an inbound consumer. Each subscriber gets its own bounded
    /// queue; when it is full the event is dropped for that subscriber only.
    pub fn subscribe(&self, name: &'static str) -> mpsc::Receiver<Arc<InboundEvent>> {
        let (sender, receiver) = mpsc::channel(self.config.subscriber_queue.max(1));
        lock(&self.shared.subscribers).push(Subscriber { name, sender });
        receiver
    }

    /// Open the connection if none is open or opening. Without a session this
    /// is a no-op: an anonymous user has nothing to sync.
    pub async fn connect(&self) {
        if self.is_live() {
            debug!(event = "connect_skipped", state = ?self.state());
            return;
        }

        let Some(session) = self.sessions.current().await else {
            debug!(event = "connect_skipped_no_session");
            return;
        };

        let (id, outbound_rx, shutdown_rx) = {
            let mut handle = lock(&self.shared.handle);
            // Another connect may have won while the session was loading.
            if handle.is_some()
                && matches!(
                    self.state(),
                    ConnectionState::Open | ConnectionState::Connecting
                )
            {
                return;
            }
            if let Some(stale) = handle.take() {
                debug!(event = "connection_superseded", handle = stale.id);
                let _ = stale.shutdown.send(true);
            }

            let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let (outbound, outbound_rx) = mpsc::unbounded_channel();
            let (shutdown, shutdown_rx) = watch::channel(false);
            *handle = Some(Handle {
                id,
                outbound,
                shutdown,
            });
            self.shared.state.send_replace(ConnectionState::Connecting);
            (id, outbound_rx, shutdown_rx)
        };

        info!(
            event = "connection_start",
            handle = id,
            endpoint = %self.config.endpoint,
            user_id = %session.user_id
        );
        let task = ConnectionTask {
            id,
            config: self.config.clone(),
            sessions: self.sessions.clone(),
            shared: self.shared.clone(),
            outbound_rx,
            shutdown_rx,
        };
        tokio::spawn(task.run(session));
    }

    /// Tear down the connection and cancel any pending reconnect. Safe to call
    /// when nothing is connected.
    pub fn close(&self) {
        let mut handle = lock(&self.shared.handle);
        let Some(current) = handle.take() else {
            return;
        };
        self.shared.state.send_replace(ConnectionState::Closing);
        let _ = current.shutdown.send(true);
        info!(event = "connection_close", handle = current.id);
    }

    fn is_live(&self) -> bool {
        let handle = lock(&self.shared.handle);
        handle.is_some()
            && matches!(
                self.state(),
                ConnectionState::Open | ConnectionState::Connecting
            )
    }
}

impl OutboundSink for ConnectionManager {
    fn send(&self, event: &OutboundEvent) -> bool {
        if self.state() != ConnectionState::Open {
            debug!(event = "publish_dropped", kind = event.kind(), state = ?self.state());
            return false;
        }
        let text = match encode_text(event, self.config.max_frame_bytes) {
            Ok(text) => text,
            Err(err) => {
                warn!(event = "publish_encode_failed", kind = event.kind(), error = %err);
                return false;
            }
        };
        let handle = lock(&self.shared.handle);
        match handle.as_ref() {
            Some(current) => current.outbound.send(text).is_ok(),
            None => false,
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}

enum SocketEnd {
    Shutdown,
    Lost(String),
}

struct ConnectionTask {
    id: u64,
    config: ConnectionConfig,
    sessions: SessionStore,
    shared: Arc<Shared>,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ConnectionTask {
    async fn run(mut self, mut session: Session) {
        let mut backoff = self.config.reconnect_initial;
        loop {
            self.shared
                .set_state_if_current(self.id, ConnectionState::Connecting);
            let request = match build_request(&self.config.endpoint, &session.token) {
                Ok(request) => request,
                Err(err) => {
                    warn!(event = "connection_request_invalid", handle = self.id, error = %err);
                    break;
                }
            };

            let connected = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.shutdown_rx) => break,
                result = connect_async(request) => result,
            };

            match connected {
                Ok((socket, _response)) => {
                    backoff = self.config.reconnect_initial;
                    self.shared.set_state_if_current(self.id, ConnectionState::Open);
                    info!(event = "connection_open", handle = self.id);
                    match self.pump(socket).await {
                        SocketEnd::Shutdown => break,
                        SocketEnd::Lost(reason) => {
                            warn!(event = "connection_lost", handle = self.id, reason = %reason);
                        }
                    }
                }
                Err(err) => {
                    warn!(event = "connection_error", handle = self.id, error = %err);
                }
            }

            self.shared
                .set_state_if_current(self.id, ConnectionState::Disconnected);
            // Frames queued for the dead socket are stale by the time a new
            // one opens.
            while self.outbound_rx.try_recv().is_ok() {}

            debug!(
                event = "reconnect_scheduled",
                handle = self.id,
                delay_ms = backoff.as_millis() as u64
            );
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.shutdown_rx) => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = next_backoff(backoff, self.config.reconnect_max);

            match self.sessions.current().await {
                Some(current) => session = current,
                None => {
                    info!(event = "reconnect_abandoned_no_session", handle = self.id);
                    break;
                }
            }
        }
        self.shared.finish(self.id);
        debug!(event = "connection_task_exit", handle = self.id);
    }

    async fn pump<S>(&mut self, socket: S) -> SocketEnd
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
            + Unpin,
    {
        let (mut sink, mut stream) = socket.split();
        loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.shutdown_rx) => {
                    let _ = sink.send(Message::Close(None)).await;
                    return SocketEnd::Shutdown;
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        self.shared.dispatch(text.as_bytes(), self.config.max_frame_bytes);
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        self.shared.dispatch(&bytes, self.config.max_frame_bytes);
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|frame| format!("closed by server ({})", u16::from(frame.code)))
                            .unwrap_or_else(|| "closed by server".to_string());
                        return SocketEnd::Lost(reason);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return SocketEnd::Lost(err.to_string()),
                    None => return SocketEnd::Lost("stream ended".to_string()),
                },
                Some(text) = self.outbound_rx.recv() => {
                    if let Err(err) = sink.send(Message::Text(text)).await {
                        return SocketEnd::Lost(err.to_string());
                    }
                }
            }
        }
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum RequestError {
    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid token header: {0}")]
    Header(#[from] tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue),
}

fn build_request(endpoint: &Url, token: &str) -> Result<Request<()>, RequestError> {
    let mut request = endpoint.as_str().into_client_request()?;
    let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
    value.set_sensitive(true);
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(request)
}

pub(crate) fn next_backoff(current: Duration, max: Duration) -> Duration {
    let next = current + current;
    if next > max {
        max
    } else {
        next
    }
}
