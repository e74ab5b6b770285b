//! Realtime event router: one websocket connection, room subscriptions, and
//! listener fanout.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::http::BearerSlot;

use super::events::{decode_server_frame, EventType, OrderEvent, RoomType};
use super::listeners::{ListenerId, ListenerRegistry};
use super::rooms::RoomKey;

/// Connection lifecycle states published through the watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

struct Connection {
    outbound: mpsc::UnboundedSender<Message>,
    driver: JoinHandle<()>,
}

/// Owns at most one transport connection per instance and fans server-pushed
/// order events out to registered listeners.
///
/// Room subscriptions die with the connection: on any disconnect the room
/// set is cleared and callers must re-request after reconnecting (the
/// [`EventRouter::watch_connection`] channel gives them the signal).
pub struct EventRouter {
    config: ClientConfig,
    bearer: BearerSlot,
    listeners: Arc<ListenerRegistry>,
    rooms: Arc<Mutex<HashSet<RoomKey>>>,
    inner: Mutex<Option<Connection>>,
    state_tx: watch::Sender<ConnectionState>,
}

impl EventRouter {
    /// Build a router that authenticates its handshake from `bearer`
    /// (normally the session manager's slot, via `session.api().bearer_slot()`).
    pub fn new(config: ClientConfig, bearer: BearerSlot) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            bearer,
            listeners: Arc::new(ListenerRegistry::new()),
            rooms: Arc::new(Mutex::new(HashSet::new())),
            inner: Mutex::new(None),
            state_tx,
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Open the realtime channel. Idempotent: a second call while a driver
    /// task is alive does nothing.
    ///
    /// Reconnection is automatic with a fixed delay, bounded by
    /// `reconnect_attempts` consecutive failures; exhausting the bound tears
    /// the router down exactly like an explicit [`EventRouter::disconnect`].
    pub fn connect(&self) {
        let mut inner = self.inner.lock();
        if let Some(conn) = inner.as_ref() {
            if !conn.driver.is_finished() {
                return;
            }
        }
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(run_driver(
            self.config.clone(),
            self.bearer.clone(),
            self.listeners.clone(),
            self.rooms.clone(),
            self.state_tx.clone(),
            outbound_rx,
        ));
        *inner = Some(Connection { outbound, driver });
    }

    /// Tear down the transport and clear all listeners and all recorded room
    /// memberships.
    pub fn disconnect(&self) {
        let conn = self.inner.lock().take();
        if let Some(conn) = conn {
            conn.driver.abort();
            tracing::info!("realtime channel disconnected");
        }
        self.rooms.lock().clear();
        self.listeners.clear();
        self.state_tx.send_replace(ConnectionState::Disconnected);
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch connection transitions (reconnects, give-ups). Useful for
    /// re-joining rooms after a reconnect.
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    // -----------------------------------------------------------------------
    // Rooms
    // -----------------------------------------------------------------------

    /// Subscribe to a room. Idempotent per composite key: at most one join
    /// frame is sent per key for the lifetime of a connection.
    ///
    /// Ensures a connection exists and waits for the channel to report
    /// connected before sending; the frame is never sent on a half-open
    /// channel.
    pub async fn join_room(&self, room_type: RoomType, id: &str) -> Result<(), ClientError> {
        if id.is_empty() {
            tracing::debug!(room = room_type.key_prefix(), "ignoring join with empty id");
            return Ok(());
        }
        let key = RoomKey::new(room_type, id);
        // Reserve the key before any await so a concurrent join of the same
        // room cannot send a second frame.
        {
            let mut rooms = self.rooms.lock();
            if rooms.contains(&key) {
                tracing::debug!(room = %key, "already joined");
                return Ok(());
            }
            rooms.insert(key.clone());
        }
        self.connect();
        if let Err(err) = self.wait_connected().await {
            self.rooms.lock().remove(&key);
            return Err(err);
        }
        let frame = Message::Text(key.join_frame().to_string().into());
        if let Err(err) = self.send(frame) {
            self.rooms.lock().remove(&key);
            return Err(err);
        }
        tracing::debug!(room = %key, "joined room");
        Ok(())
    }

    /// Unsubscribe from a room. Sends a leave frame only if the key was
    /// actually recorded; a leave for a room never joined sends nothing.
    pub fn leave_room(&self, room_type: RoomType, id: &str) {
        let key = RoomKey::new(room_type, id);
        if !self.rooms.lock().remove(&key) {
            return;
        }
        let frame = Message::Text(key.leave_frame().to_string().into());
        match self.send(frame) {
            Ok(()) => tracing::debug!(room = %key, "left room"),
            Err(_) => tracing::debug!(room = %key, "leave frame dropped; channel not connected"),
        }
    }

    // -----------------------------------------------------------------------
    // Listeners
    // -----------------------------------------------------------------------

    pub fn add_listener(
        &self,
        event: EventType,
        callback: impl Fn(&OrderEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.listeners.add(event, callback)
    }

    pub fn remove_listener(&self, event: EventType, id: ListenerId) {
        self.listeners.remove(event, id);
    }

    pub fn listener_count(&self, event: EventType) -> usize {
        self.listeners.count(event)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn wait_connected(&self) -> Result<(), ClientError> {
        let mut rx = self.state_tx.subscribe();
        let wait = time::timeout(self.config.connect_wait, async move {
            loop {
                if *rx.borrow_and_update() == ConnectionState::Connected {
                    return Ok(());
                }
                if rx.changed().await.is_err() {
                    return Err(ClientError::NotConnected);
                }
            }
        });
        match wait.await {
            Ok(result) => result,
            Err(_elapsed) => Err(ClientError::ConnectTimeout),
        }
    }

    fn send(&self, msg: Message) -> Result<(), ClientError> {
        let inner = self.inner.lock();
        let Some(conn) = inner.as_ref() else {
            return Err(ClientError::NotConnected);
        };
        conn.outbound.send(msg).map_err(|_| ClientError::NotConnected)
    }
}

impl Drop for EventRouter {
    // Connections must not outlive the router that owns them.
    fn drop(&mut self) {
        if let Some(conn) = self.inner.lock().take() {
            conn.driver.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Driver task
// ---------------------------------------------------------------------------

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn run_driver(
    config: ClientConfig,
    bearer: BearerSlot,
    listeners: Arc<ListenerRegistry>,
    rooms: Arc<Mutex<HashSet<RoomKey>>>,
    state_tx: watch::Sender<ConnectionState>,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
) {
    let base = config.gateway_url.trim_end_matches('/').to_string();
    let mut failures: u32 = 0;
    loop {
        state_tx.send_replace(ConnectionState::Connecting);
        // Re-read the slot on every attempt; a refresh may have rotated the
        // token since the last connection.
        let token = bearer.lock().clone();
        if token.is_none() {
            tracing::warn!("connecting realtime channel without an access token");
        }
        let url = match &token {
            Some(t) => format!("{base}/orders?token={t}"),
            None => format!("{base}/orders"),
        };

        match tokio_tungstenite::connect_async(&url).await {
            Err(err) => {
                failures += 1;
                tracing::warn!(%err, attempt = failures, "realtime connect failed");
            }
            Ok((stream, _)) => {
                failures = 0;
                state_tx.send_replace(ConnectionState::Connected);
                tracing::info!("realtime channel connected");

                let clean_shutdown = pump(stream, &listeners, &mut outbound_rx).await;

                // Subscriptions do not survive the connection; callers
                // re-join once the channel reports connected again.
                rooms.lock().clear();
                if clean_shutdown {
                    break;
                }
                failures = 1;
            }
        }

        if failures >= config.reconnect_attempts {
            tracing::warn!(attempts = failures, "realtime reconnect attempts exhausted; giving up");
            break;
        }
        state_tx.send_replace(ConnectionState::Disconnected);
        time::sleep(config.reconnect_delay).await;
    }

    // Terminal teardown mirrors an explicit disconnect().
    rooms.lock().clear();
    listeners.clear();
    state_tx.send_replace(ConnectionState::Disconnected);
}

/// Run one live connection until it drops. Returns `true` when the router
/// closed the outbound channel (explicit shutdown; do not reconnect).
async fn pump(
    stream: WsStream,
    listeners: &ListenerRegistry,
    outbound_rx: &mut mpsc::UnboundedReceiver<Message>,
) -> bool {
    let (mut ws_tx, mut ws_rx) = stream.split();
    loop {
        tokio::select! {
            inbound = ws_rx.next() => match inbound {
                Some(Ok(Message::Text(text))) => handle_frame(listeners, &text),
                Some(Ok(Message::Close(_))) | None => {
                    tracing::debug!("realtime channel closed by server");
                    return false;
                }
                Some(Ok(_)) => {} // ping/pong/binary: nothing to do
                Some(Err(err)) => {
                    tracing::debug!(%err, "realtime read error");
                    return false;
                }
            },
            frame = outbound_rx.recv() => match frame {
                Some(msg) => {
                    if let Err(err) = ws_tx.send(msg).await {
                        tracing::debug!(%err, "realtime write error");
                        return false;
                    }
                }
                None => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return true;
                }
            },
        }
    }
}

fn handle_frame(listeners: &ListenerRegistry, text: &str) {
    match decode_server_frame(text) {
        Ok(Some((event, payload))) => {
            let delivered = listeners.dispatch(event, &payload);
            tracing::trace!(event = event.name(), delivered, "dispatched realtime event");
        }
        Ok(None) => tracing::debug!("ignoring unrecognized realtime event"),
        Err(err) => tracing::debug!(%err, "undecodable realtime frame"),
    }
}
