//! Per-session fan-out hub.
//!
//! Each connected client registers a bounded mpsc sender of serialised
//! frames; a writer task on the connection drains the receiver into the
//! socket. Broadcasting pushes into every sink's queue in emission order,
//! which gives the per-operation ordering guarantee, and a full or closed
//! queue gets that sink evicted without ever blocking the rest of the room.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use arbor_core::ids::ConnId;
use arbor_protocol::ServerEvent;

/// Outbound frames buffered per sink before the client counts as too slow.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

struct ClientSink {
    conn_id: ConnId,
    tx: mpsc::Sender<String>,
}

/// Fan-out state: one room of sinks per session.
///
/// The hub is the only mutator of its maps; callers interact exclusively
/// through these methods.
pub struct SessionHub {
    rooms: DashMap<String, Vec<ClientSink>>,
    sessions_by_conn: DashMap<ConnId, String>,
}

impl SessionHub {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            sessions_by_conn: DashMap::new(),
        }
    }

    /// Register a sink with a session room and greet it (the greeting goes
    /// to this sink only).
    pub fn connect(&self, session_id: &str, conn_id: ConnId, tx: mpsc::Sender<String>) {
        let greeting = ServerEvent::Connection {
            message: format!("Connected to session {session_id}"),
        };
        let _ = tx.try_send(greeting.to_json());

        self.sessions_by_conn
            .insert(conn_id.clone(), session_id.to_string());
        self.rooms
            .entry(session_id.to_string())
            .or_default()
            .push(ClientSink { conn_id: conn_id.clone(), tx });
        info!(session_id, conn_id = %conn_id, "client connected");
    }

    /// Remove a sink. Idempotent — unknown connections are ignored.
    pub fn disconnect(&self, conn_id: &ConnId) {
        let Some((_, session_id)) = self.sessions_by_conn.remove(conn_id) else {
            return;
        };
        let mut drop_room = false;
        if let Some(mut room) = self.rooms.get_mut(&session_id) {
            room.retain(|sink| &sink.conn_id != conn_id);
            drop_room = room.is_empty();
        }
        if drop_room {
            self.rooms.remove_if(&session_id, |_, room| room.is_empty());
        }
        info!(%session_id, conn_id = %conn_id, "client disconnected");
    }

    /// Serialise `event` once and push it to every sink of the session,
    /// except `exclude`. Sinks whose queue is full or closed are evicted.
    pub fn broadcast(&self, session_id: &str, event: &ServerEvent, exclude: Option<&ConnId>) {
        let payload = event.to_json();
        let mut dead = Vec::new();

        if let Some(mut room) = self.rooms.get_mut(session_id) {
            room.retain(|sink| {
                if Some(&sink.conn_id) == exclude {
                    return true;
                }
                match sink.tx.try_send(payload.clone()) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(
                            session_id,
                            conn_id = %sink.conn_id,
                            error = %e,
                            "dropping unresponsive sink"
                        );
                        dead.push(sink.conn_id.clone());
                        false
                    }
                }
            });
        } else {
            debug!(session_id, "broadcast to empty session");
        }

        for conn_id in dead {
            self.sessions_by_conn.remove(&conn_id);
        }
    }

    /// Direct, connection-private send. Returns `false` when the sink is
    /// unknown or unreachable.
    pub fn send(&self, conn_id: &ConnId, event: &ServerEvent) -> bool {
        let Some(session_id) = self.sessions_by_conn.get(conn_id) else {
            return false;
        };
        let Some(room) = self.rooms.get(session_id.value()) else {
            return false;
        };
        room.iter()
            .find(|sink| &sink.conn_id == conn_id)
            .map(|sink| sink.tx.try_send(event.to_json()).is_ok())
            .unwrap_or(false)
    }

    pub fn send_error(&self, conn_id: &ConnId, message: impl Into<String>) -> bool {
        self.send(conn_id, &ServerEvent::error(message))
    }

    /// Connected sink count, for one session or in total.
    pub fn connection_count(&self, session_id: Option<&str>) -> usize {
        match session_id {
            Some(session_id) => self.rooms.get(session_id).map(|r| r.len()).unwrap_or(0),
            None => self.rooms.iter().map(|r| r.len()).sum(),
        }
    }

    pub fn session_count(&self) -> usize {
        self.rooms.len()
    }
}

impl Default for SessionHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(n: u32) -> ServerEvent {
        ServerEvent::StreamChunk {
            session_id: "s".into(),
            node_id: "n".into(),
            chunk: n.to_string(),
        }
    }

    fn connect(hub: &SessionHub, session: &str) -> (ConnId, mpsc::Receiver<String>) {
        let (tx, mut rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let conn_id = ConnId::new();
        hub.connect(session, conn_id.clone(), tx);
        // Swallow the connection greeting.
        let greeting = rx.try_recv().unwrap();
        assert!(greeting.contains("\"connection\""));
        (conn_id, rx)
    }

    #[tokio::test]
    async fn greeting_goes_to_the_new_sink_only() {
        let hub = SessionHub::new();
        let (_a, mut rx_a) = connect(&hub, "s1");
        let (_b, _rx_b) = connect(&hub, "s1");
        // a must not have received b's greeting.
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_reaches_all_sinks_in_order() {
        let hub = SessionHub::new();
        let (_a, mut rx_a) = connect(&hub, "s1");
        let (_b, mut rx_b) = connect(&hub, "s1");

        for n in 0..5 {
            hub.broadcast("s1", &chunk(n), None);
        }
        for rx in [&mut rx_a, &mut rx_b] {
            for n in 0..5 {
                let frame = rx.try_recv().unwrap();
                assert!(frame.contains(&format!("\"chunk\":\"{n}\"")));
            }
        }
    }

    #[tokio::test]
    async fn broadcast_is_scoped_to_the_session() {
        let hub = SessionHub::new();
        let (_a, mut rx_a) = connect(&hub, "s1");
        let (_b, mut rx_b) = connect(&hub, "s2");

        hub.broadcast("s1", &chunk(1), None);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn exclude_skips_the_originator() {
        let hub = SessionHub::new();
        let (a, mut rx_a) = connect(&hub, "s1");
        let (_b, mut rx_b) = connect(&hub, "s1");

        hub.broadcast("s1", &chunk(1), Some(&a));
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn slow_sink_is_evicted_without_blocking_others() {
        let hub = SessionHub::new();
        // A one-slot queue that nobody drains: the greeting fills it.
        let (tx, _rx_slow) = mpsc::channel(1);
        let slow = ConnId::new();
        hub.connect("s1", slow.clone(), tx);
        let (_b, mut rx_b) = connect(&hub, "s1");
        assert_eq!(hub.connection_count(Some("s1")), 2);

        hub.broadcast("s1", &chunk(1), None);
        hub.broadcast("s1", &chunk(2), None);

        assert_eq!(hub.connection_count(Some("s1")), 1);
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let hub = SessionHub::new();
        let (a, _rx) = connect(&hub, "s1");
        hub.disconnect(&a);
        hub.disconnect(&a);
        assert_eq!(hub.connection_count(None), 0);
        assert_eq!(hub.session_count(), 0);
    }

    #[tokio::test]
    async fn direct_send_targets_one_sink() {
        let hub = SessionHub::new();
        let (a, mut rx_a) = connect(&hub, "s1");
        let (_b, mut rx_b) = connect(&hub, "s1");

        assert!(hub.send_error(&a, "boom"));
        let frame = rx_a.try_recv().unwrap();
        assert!(frame.contains("boom"));
        assert!(rx_b.try_recv().is_err());

        assert!(!hub.send(&ConnId::new(), &chunk(1)));
    }
}
