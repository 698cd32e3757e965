//! Snapshot fan-out to connected clients.
//!
//! Every registry mutation, the snapshot copy it produces and the queueing
//! of that snapshot onto each client's sink happen under one lock, so all
//! clients observe mutations in the same order and never see a state the
//! registry was not in. Queueing never waits on a socket; a client whose
//! queue keeps overflowing is closed and leaves the snapshot at once.

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{BeaconError, BeaconResult};
use crate::model::{ConnectionId, Location, Snapshot};
use crate::protocol::{parse_client_message, ClientMessage, ServerMessage};
use crate::registry::Registry;
use crate::transport::{ClientSink, DeliveryError, Frame};

/// Lifetime frame drops after which a slow client is disconnected.
pub const DEFAULT_MAX_DROPPED_FRAMES: u64 = 100;

type SinkTable = HashMap<ConnectionId, Arc<dyn ClientSink>>;

#[derive(Default)]
struct Counters {
    broadcasts: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    evicted: AtomicU64,
    rejected: AtomicU64,
}

/// Point-in-time view of coordinator activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub connections: usize,
    /// Sessions still open in the registry, reported or not.
    pub sessions: usize,
    pub users: usize,
    pub version: u64,
    pub broadcasts: u64,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub clients_evicted: u64,
    pub reports_rejected: u64,
}

/// Keeps every connected client in sync with the registry.
pub struct BroadcastCoordinator {
    registry: Arc<Registry>,
    sinks: Mutex<SinkTable>,
    max_dropped_frames: u64,
    counters: Counters,
}

/// Outcome of queueing one frame for a set of targets.
struct Round {
    delivered: usize,
    /// Some detached connection had an entry, so the snapshot changed.
    users_left: bool,
}

impl BroadcastCoordinator {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            sinks: Mutex::new(HashMap::new()),
            max_dropped_frames: DEFAULT_MAX_DROPPED_FRAMES,
            counters: Counters::default(),
        }
    }

    /// Override the slow-client threshold.
    pub fn with_max_dropped_frames(mut self, max: u64) -> Self {
        self.max_dropped_frames = max.max(1);
        self
    }

    /// A session finished its handshake.
    ///
    /// Registers the sink and sends it the current snapshot, so a late
    /// joiner sees existing users before anyone reports again.
    pub fn on_connect(&self, id: ConnectionId, sink: Arc<dyn ClientSink>) -> BeaconResult<()> {
        let mut sinks = self.sinks.lock();
        let frame = ServerMessage::users(&self.registry.snapshot()).to_frame()?;
        self.registry.open(id.clone())?;
        let _ = sinks.insert(id.clone(), sink);
        info!(conn_id = %id, connections = sinks.len(), "client connected");

        if self.deliver(&mut sinks, vec![id], frame, "join").users_left {
            self.broadcast_snapshot(&mut sinks);
        }
        Ok(())
    }

    /// An inbound text frame from `id`.
    pub fn on_message(&self, id: &ConnectionId, payload: &str) -> BeaconResult<()> {
        match parse_client_message(payload) {
            Ok(ClientMessage::UpdateLocation(location)) => self.report(id, location),
            Err(e) => self.reject(id, e),
        }
    }

    /// An inbound binary frame from `id`. Only UTF-8 JSON is understood.
    pub fn on_binary(&self, id: &ConnectionId, payload: &[u8]) -> BeaconResult<()> {
        match std::str::from_utf8(payload) {
            Ok(text) => self.on_message(id, text),
            Err(_) => self.reject(id, BeaconError::malformed("binary frame is not valid UTF-8")),
        }
    }

    /// Store a location for `id` and broadcast the new snapshot.
    pub fn report(&self, id: &ConnectionId, location: Location) -> BeaconResult<()> {
        let mut sinks = self.sinks.lock();
        if let Err(e) = self.registry.upsert(id, location) {
            let _ = self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(e);
        }
        debug!(
            conn_id = %id,
            latitude = location.latitude,
            longitude = location.longitude,
            "location updated"
        );
        self.broadcast_snapshot(&mut sinks);
        Ok(())
    }

    /// A session ended, normally or not. Safe to call more than once.
    pub fn on_disconnect(&self, id: &ConnectionId) {
        let mut sinks = self.sinks.lock();
        if self.detach(&mut sinks, id) {
            self.broadcast_snapshot(&mut sinks);
        }
        info!(conn_id = %id, connections = sinks.len(), "client disconnected");
    }

    /// Deliver one message to one connection.
    pub fn send(&self, id: &ConnectionId, message: &ServerMessage) -> BeaconResult<()> {
        let frame = message.to_frame()?;
        let sinks = self.sinks.lock();
        let sink = sinks
            .get(id)
            .ok_or_else(|| BeaconError::UnknownConnection(id.clone()))?;
        sink.try_deliver(frame).map_err(BeaconError::from)
    }

    /// Deliver one message to every connection. Returns how many accepted it.
    pub fn broadcast(&self, message: &ServerMessage) -> BeaconResult<usize> {
        let frame = message.to_frame()?;
        let mut sinks = self.sinks.lock();
        let targets: Vec<ConnectionId> = sinks.keys().cloned().collect();
        let round = self.deliver(&mut sinks, targets, frame, "broadcast");
        let _ = self.counters.broadcasts.fetch_add(1, Ordering::Relaxed);
        if round.users_left {
            self.broadcast_snapshot(&mut sinks);
        }
        Ok(round.delivered)
    }

    /// Current registry contents.
    pub fn snapshot(&self) -> Snapshot {
        self.registry.snapshot()
    }

    /// Close a connection on the server's initiative.
    ///
    /// The transport is told to end the session, the connection stops
    /// counting as open and its entry leaves the snapshot right away.
    pub fn evict(&self, id: &ConnectionId) -> bool {
        let mut sinks = self.sinks.lock();
        if !sinks.contains_key(id) {
            return false;
        }
        let _ = self.counters.evicted.fetch_add(1, Ordering::Relaxed);
        info!(conn_id = %id, "evicted client");
        if self.detach(&mut sinks, id) {
            self.broadcast_snapshot(&mut sinks);
        }
        true
    }

    /// Evict every connection whose last report is older than `max_age`.
    pub fn evict_stale(&self, max_age: chrono::Duration) -> Vec<ConnectionId> {
        let Some(cutoff) = Utc::now().checked_sub_signed(max_age) else {
            return Vec::new();
        };
        self.registry
            .stale_since(cutoff)
            .into_iter()
            .filter(|id| {
                debug!(conn_id = %id, last_report = ?self.registry.last_report_at(id), "client is stale");
                self.evict(id)
            })
            .collect()
    }

    /// Close every connection. Used at shutdown so all transports end.
    pub fn evict_all(&self) -> usize {
        let mut sinks = self.sinks.lock();
        let count = sinks.len();
        for (id, sink) in sinks.drain() {
            sink.close();
            let _ = self.registry.remove(&id);
        }
        let _ = self
            .counters
            .evicted
            .fetch_add(count as u64, Ordering::Relaxed);
        info!(count, "evicted all clients");
        count
    }

    /// Number of connections with a live sink.
    pub fn connection_count(&self) -> usize {
        self.sinks.lock().len()
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            connections: self.connection_count(),
            sessions: self.registry.open_count(),
            users: self.registry.len(),
            version: self.registry.version(),
            broadcasts: self.counters.broadcasts.load(Ordering::Relaxed),
            frames_delivered: self.counters.delivered.load(Ordering::Relaxed),
            frames_dropped: self.counters.dropped.load(Ordering::Relaxed),
            clients_evicted: self.counters.evicted.load(Ordering::Relaxed),
            reports_rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    fn reject(&self, id: &ConnectionId, error: BeaconError) -> BeaconResult<()> {
        let _ = self.counters.rejected.fetch_add(1, Ordering::Relaxed);
        debug!(conn_id = %id, error = %error, "dropping malformed report");
        Err(error)
    }

    /// Unregister `id`, tell its transport to close and drop its entry.
    ///
    /// Returns `true` when an entry was removed. Caller holds the sink lock.
    fn detach(&self, sinks: &mut SinkTable, id: &ConnectionId) -> bool {
        if let Some(sink) = sinks.remove(id) {
            sink.close();
        }
        self.registry.remove(id)
    }

    /// Copy the registry and queue it for every connection.
    ///
    /// Repeats while the round itself evicts users, so every client that
    /// remains ends on a snapshot without them. Caller holds the sink lock.
    fn broadcast_snapshot(&self, sinks: &mut SinkTable) {
        loop {
            let snapshot = self.registry.snapshot();
            let frame = match ServerMessage::users(&snapshot).to_frame() {
                Ok(f) => f,
                Err(e) => {
                    warn!(version = snapshot.version, error = %e, "failed to serialize snapshot");
                    return;
                }
            };
            let targets: Vec<ConnectionId> = sinks.keys().cloned().collect();
            let round = self.deliver(sinks, targets, frame, "snapshot");
            let _ = self.counters.broadcasts.fetch_add(1, Ordering::Relaxed);
            debug!(
                version = snapshot.version,
                users = snapshot.len(),
                delivered = round.delivered,
                "broadcast snapshot"
            );
            if !round.users_left {
                return;
            }
        }
    }

    /// Queue `frame` for each target, detaching closed and slow connections.
    fn deliver(
        &self,
        sinks: &mut SinkTable,
        targets: Vec<ConnectionId>,
        frame: Frame,
        label: &str,
    ) -> Round {
        let mut delivered = 0usize;
        let mut to_detach = Vec::new();
        for id in targets {
            let Some(sink) = sinks.get(&id) else {
                continue;
            };
            match sink.try_deliver(Arc::clone(&frame)) {
                Ok(()) => delivered += 1,
                Err(DeliveryError::Full) => {
                    let _ = self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    let drops = sink.drop_count();
                    if drops >= self.max_dropped_frames {
                        warn!(conn_id = %id, label, drops, "disconnecting slow client");
                        let _ = self.counters.evicted.fetch_add(1, Ordering::Relaxed);
                        to_detach.push(id);
                    } else {
                        warn!(conn_id = %id, label, total_drops = drops, "failed to send to client (queue full)");
                    }
                }
                Err(DeliveryError::Closed) => {
                    debug!(conn_id = %id, label, "client queue closed");
                    to_detach.push(id);
                }
            }
        }
        let mut users_left = false;
        for id in &to_detach {
            users_left |= self.detach(sinks, id);
        }
        let _ = self
            .counters
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        Round {
            delivered,
            users_left,
        }
    }
}
