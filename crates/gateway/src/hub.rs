//! Per-process WebSocket hub.
//!
//! A single dispatcher task owns the `user_id → Connection` map, fed by
//! register/unregister channels. The hub knows nothing about games; it
//! ships opaque byte frames. One user holds at most one connection per
//! hub: a newer login closes the older socket.

use metrics::{counter, gauge};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outbound queue capacity per connection.
pub const OUTBOUND_QUEUE: usize = 1024;

/// Write deadline applied to every outgoing frame.
pub const WRITE_DEADLINE: Duration = Duration::from_secs(30);

/// Keepalive ping period. Must be shorter than [`READ_DEADLINE`].
pub const PING_PERIOD: Duration = Duration::from_secs(54);

/// Idle read deadline, refreshed by any inbound traffic including pongs.
pub const READ_DEADLINE: Duration = Duration::from_secs(60);

/// Maximum inbound message size in bytes.
pub const READ_LIMIT: usize = 4096;

/// Why a connection was closed. Logged exactly once per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    WriteError,
    PingError,
    ReadError,
    SendChanClosed,
    Replaced,
    Shutdown,
    BufferFull,
    Timeout,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::WriteError => "WRITE_ERROR",
            CloseReason::PingError => "PING_ERROR",
            CloseReason::ReadError => "READ_ERROR",
            CloseReason::SendChanClosed => "SEND_CHAN_CLOSED",
            CloseReason::Replaced => "REPLACED",
            CloseReason::Shutdown => "SHUTDOWN",
            CloseReason::BufferFull => "BUFFER_FULL",
            CloseReason::Timeout => "TIMEOUT",
        };
        f.write_str(s)
    }
}

/// One authenticated socket: a bounded outbound queue plus a one-shot
/// close latch. The write pump drains the queue; everyone else only
/// enqueues.
pub struct Connection {
    pub user_id: i64,
    conn_id: Uuid,
    tx: mpsc::Sender<Vec<u8>>,
    closed_tx: watch::Sender<Option<CloseReason>>,
}

impl Connection {
    /// Build a connection and hand back the queue consumer for the write
    /// pump.
    pub fn channel(user_id: i64, capacity: usize) -> (Arc<Self>, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let (closed_tx, _) = watch::channel(None);
        (
            Arc::new(Self {
                user_id,
                conn_id: Uuid::new_v4(),
                tx,
                closed_tx,
            }),
            rx,
        )
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    /// Fire the close latch. Returns true for the first caller only; the
    /// reason of that first call is the one logged.
    pub fn close(&self, reason: CloseReason) -> bool {
        let fired = self.closed_tx.send_if_modified(|state| {
            if state.is_none() {
                *state = Some(reason);
                true
            } else {
                false
            }
        });
        if fired {
            counter!("gateway_connections_closed_total", "reason" => reason.to_string())
                .increment(1);
            info!(user_id = self.user_id, conn_id = %self.conn_id, reason = %reason, "connection closed");
        }
        fired
    }

    pub fn is_closed(&self) -> bool {
        self.closed_tx.borrow().is_some()
    }

    /// Watch the close latch; used by the write pump to exit promptly.
    pub fn close_watch(&self) -> watch::Receiver<Option<CloseReason>> {
        self.closed_tx.subscribe()
    }

    pub(crate) fn try_enqueue(&self, frame: Vec<u8>) -> Result<(), mpsc::error::TrySendError<Vec<u8>>> {
        self.tx.try_send(frame)
    }
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Outbound queue capacity per connection.
    pub outbound_capacity: usize,
    /// How long `send_to_user` waits for a full queue to drain before the
    /// connection is closed.
    pub send_wait: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: OUTBOUND_QUEUE,
            send_wait: Duration::from_secs(5),
        }
    }
}

/// The per-process connection hub.
pub struct Hub {
    config: HubConfig,
    connections: Arc<RwLock<HashMap<i64, Arc<Connection>>>>,
    register_tx: mpsc::UnboundedSender<Arc<Connection>>,
    unregister_tx: mpsc::UnboundedSender<(i64, Uuid)>,
    shutdown_tx: mpsc::UnboundedSender<()>,
}

impl Hub {
    pub fn new() -> Arc<Self> {
        Self::with_config(HubConfig::default())
    }

    pub fn with_config(config: HubConfig) -> Arc<Self> {
        let connections: Arc<RwLock<HashMap<i64, Arc<Connection>>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let (register_tx, mut register_rx) = mpsc::unbounded_channel::<Arc<Connection>>();
        let (unregister_tx, mut unregister_rx) = mpsc::unbounded_channel::<(i64, Uuid)>();
        let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel::<()>();

        // The dispatcher is the only writer of the connection map.
        let map = connections.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = shutdown_rx.recv() => {
                        let drained: Vec<Arc<Connection>> = {
                            let mut map = map.write().expect("hub map poisoned");
                            map.drain().map(|(_, conn)| conn).collect()
                        };
                        for conn in drained {
                            conn.close(CloseReason::Shutdown);
                        }
                        gauge!("gateway_active_connections").set(0.0);
                        break;
                    }

                    conn = register_rx.recv() => {
                        let Some(conn) = conn else { break };
                        let old = {
                            let mut map = map.write().expect("hub map poisoned");
                            map.insert(conn.user_id, conn)
                        };
                        if let Some(old) = old {
                            old.close(CloseReason::Replaced);
                        }
                        let count = map.read().expect("hub map poisoned").len();
                        gauge!("gateway_active_connections").set(count as f64);
                    }

                    evicted = unregister_rx.recv() => {
                        let Some((user_id, conn_id)) = evicted else { break };
                        let removed = {
                            let mut map = map.write().expect("hub map poisoned");
                            // Only remove if the map still holds this exact
                            // connection; a newer login may have replaced it
                            let is_current = map
                                .get(&user_id)
                                .map(|current| current.conn_id() == conn_id)
                                .unwrap_or(false);
                            if is_current {
                                map.remove(&user_id)
                            } else {
                                None
                            }
                        };
                        if let Some(conn) = removed {
                            conn.close(CloseReason::ReadError);
                            debug!(user_id, "connection unregistered");
                        }
                        let count = map.read().expect("hub map poisoned").len();
                        gauge!("gateway_active_connections").set(count as f64);
                    }
                }
            }
        });

        Arc::new(Self {
            config,
            connections,
            register_tx,
            unregister_tx,
            shutdown_tx,
        })
    }

    /// Queue capacity for new connections.
    pub fn outbound_capacity(&self) -> usize {
        self.config.outbound_capacity
    }

    /// Register a connection with the dispatcher. An existing connection
    /// for the same user is closed with reason REPLACED.
    pub fn register(&self, conn: Arc<Connection>) {
        counter!("gateway_connections_total").increment(1);
        let _ = self.register_tx.send(conn);
    }

    /// Ask the dispatcher to drop a connection, identified exactly.
    pub fn unregister(&self, user_id: i64, conn_id: Uuid) {
        let _ = self.unregister_tx.send((user_id, conn_id));
    }

    /// Close every connection and stop the dispatcher.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().expect("hub map poisoned").len()
    }

    fn connection_for(&self, user_id: i64) -> Option<Arc<Connection>> {
        self.connections
            .read()
            .expect("hub map poisoned")
            .get(&user_id)
            .cloned()
    }

    /// Deliver a frame to one user, if their socket lives on this hub.
    ///
    /// Non-blocking first; on a full queue, waits up to the configured
    /// drain window, then closes the connection (TIMEOUT) to protect the
    /// server from one slow client.
    pub async fn send_to_user(&self, user_id: i64, frame: Vec<u8>) {
        let Some(conn) = self.connection_for(user_id) else {
            return;
        };

        match conn.try_enqueue(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(frame)) => {
                match tokio::time::timeout(self.config.send_wait, conn.tx.send(frame)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => {
                        // Write pump is gone
                        conn.close(CloseReason::SendChanClosed);
                        self.unregister(user_id, conn.conn_id());
                    }
                    Err(_) => {
                        warn!(user_id, "outbound queue full and drain timed out");
                        if conn.close(CloseReason::Timeout) {
                            self.unregister(user_id, conn.conn_id());
                        }
                    }
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                conn.close(CloseReason::SendChanClosed);
                self.unregister(user_id, conn.conn_id());
            }
        }
    }

    /// Deliver a frame to every connection. Non-blocking per connection: a
    /// full queue closes that connection (BUFFER_FULL); the map update is
    /// deferred to the dispatcher.
    pub async fn broadcast(&self, frame: &[u8]) {
        let conns: Vec<Arc<Connection>> = {
            let map = self.connections.read().expect("hub map poisoned");
            map.values().cloned().collect()
        };

        counter!("gateway_broadcasts_total").increment(1);
        for conn in conns {
            match conn.try_enqueue(frame.to_vec()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(user_id = conn.user_id, "outbound queue full on broadcast");
                    if conn.close(CloseReason::BufferFull) {
                        self.unregister(conn.user_id, conn.conn_id());
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    conn.close(CloseReason::SendChanClosed);
                    self.unregister(conn.user_id, conn.conn_id());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn settle() {
        // Let the dispatcher drain its command queue
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    fn small_hub() -> Arc<Hub> {
        Hub::with_config(HubConfig {
            outbound_capacity: 4,
            send_wait: Duration::from_millis(100),
        })
    }

    #[tokio::test]
    async fn test_at_most_one_connection_per_user() {
        let hub = Hub::new();
        let (first, _rx1) = Connection::channel(1001, hub.outbound_capacity());
        let (second, _rx2) = Connection::channel(1001, hub.outbound_capacity());

        hub.register(first.clone());
        hub.register(second.clone());
        settle().await;

        assert_eq!(hub.connection_count(), 1);
        assert!(first.is_closed());
        assert!(!second.is_closed());
    }

    #[tokio::test]
    async fn test_close_latch_fires_once() {
        let (conn, _rx) = Connection::channel(1, 4);
        assert!(conn.close(CloseReason::WriteError));
        assert!(!conn.close(CloseReason::Timeout));
        assert_eq!(*conn.close_watch().borrow(), Some(CloseReason::WriteError));
    }

    #[tokio::test]
    async fn test_send_to_user_delivers() {
        let hub = Hub::new();
        let (conn, mut rx) = Connection::channel(7, hub.outbound_capacity());
        hub.register(conn);
        settle().await;

        hub.send_to_user(7, b"hello".to_vec()).await;
        assert_eq!(rx.recv().await.unwrap(), b"hello");

        // Unknown user is a quiet no-op
        hub.send_to_user(8, b"nobody".to_vec()).await;
    }

    #[tokio::test]
    async fn test_slow_consumer_evicted_on_broadcast() {
        let hub = small_hub();
        let (slow, _slow_rx) = Connection::channel(1, hub.outbound_capacity());
        let (healthy, mut healthy_rx) = Connection::channel(2, hub.outbound_capacity());
        hub.register(slow.clone());
        hub.register(healthy);
        settle().await;
        assert_eq!(hub.connection_count(), 2);

        // Fill both queues to capacity, the slow reader paused
        for i in 0..4u8 {
            hub.broadcast(&[i]).await;
        }
        // The healthy client keeps reading; the slow one does not
        assert_eq!(healthy_rx.recv().await.unwrap(), vec![0]);
        hub.broadcast(&[4]).await;
        settle().await;

        // The slow client overflowed and was evicted; the healthy one
        // received everything
        assert!(slow.is_closed());
        assert_eq!(*slow.close_watch().borrow(), Some(CloseReason::BufferFull));
        assert_eq!(hub.connection_count(), 1);
        for i in 1..5u8 {
            assert_eq!(healthy_rx.recv().await.unwrap(), vec![i]);
        }
    }

    #[tokio::test]
    async fn test_send_to_user_times_out_and_closes() {
        let hub = small_hub();
        let (conn, _rx) = Connection::channel(9, hub.outbound_capacity());
        hub.register(conn.clone());
        settle().await;

        for i in 0..4u8 {
            hub.send_to_user(9, vec![i]).await;
        }
        // Queue is full and nobody drains: this send waits, times out, and
        // closes the connection
        hub.send_to_user(9, b"overflow".to_vec()).await;
        settle().await;

        assert!(conn.is_closed());
        assert_eq!(*conn.close_watch().borrow(), Some(CloseReason::Timeout));
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let hub = Hub::new();
        let (a, _rx_a) = Connection::channel(1, hub.outbound_capacity());
        let (b, _rx_b) = Connection::channel(2, hub.outbound_capacity());
        hub.register(a.clone());
        hub.register(b.clone());
        settle().await;

        hub.shutdown();
        settle().await;

        assert_eq!(hub.connection_count(), 0);
        assert_eq!(*a.close_watch().borrow(), Some(CloseReason::Shutdown));
        assert_eq!(*b.close_watch().borrow(), Some(CloseReason::Shutdown));
    }
}
