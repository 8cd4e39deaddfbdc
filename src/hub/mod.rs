//! WebSocket fan-out hub: a single-writer event loop owning the client set,
//! per-event topic subscriptions, broadcast fan-out with slow-consumer
//! eviction, and the hub worker's HTTP surface.

pub mod client;
pub mod message;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use message::ServerMessage;

pub use message::{
    event_topic, BroadcastMessage, EventUpdatePayload, ParticipantCountPayload,
};

/// Hub broadcast queue capacity.
const BROADCAST_CAPACITY: usize = 256;
/// Register/unregister queue capacity.
const REGISTRY_CAPACITY: usize = 64;
/// Per-client outbound queue capacity.
pub(crate) const OUTBOUND_CAPACITY: usize = 256;

/// The loop's view of one connected client. The outbound sender is dropped
/// by the loop exactly once, on unregister or eviction; the kill signal
/// tears down the client's pumps.
pub(crate) struct ClientHandle {
    pub(crate) id: Uuid,
    pub(crate) out: mpsc::Sender<String>,
    pub(crate) kill: watch::Sender<bool>,
}

/// Two-sided subscription index. Both sides are always updated together, so
/// a client sits in a topic bucket exactly when that topic sits in the
/// client's own set, and empty buckets are removed eagerly.
#[derive(Default)]
struct TopicTable {
    by_topic: HashMap<String, HashSet<Uuid>>,
    by_client: HashMap<Uuid, HashSet<String>>,
}

impl TopicTable {
    fn subscribe(&mut self, topic: &str, client: Uuid) -> usize {
        self.by_topic
            .entry(topic.to_string())
            .or_default()
            .insert(client);
        self.by_client
            .entry(client)
            .or_default()
            .insert(topic.to_string());
        self.by_topic.get(topic).map_or(0, HashSet::len)
    }

    fn unsubscribe(&mut self, topic: &str, client: Uuid) {
        if let Some(subscribers) = self.by_topic.get_mut(topic) {
            subscribers.remove(&client);
            if subscribers.is_empty() {
                self.by_topic.remove(topic);
            }
        }
        if let Some(topics) = self.by_client.get_mut(&client) {
            topics.remove(topic);
            if topics.is_empty() {
                self.by_client.remove(&client);
            }
        }
    }

    fn remove_client(&mut self, client: Uuid) {
        let Some(topics) = self.by_client.remove(&client) else {
            return;
        };
        for topic in topics {
            if let Some(subscribers) = self.by_topic.get_mut(&topic) {
                subscribers.remove(&client);
                if subscribers.is_empty() {
                    self.by_topic.remove(&topic);
                }
            }
        }
    }

    fn subscribers(&self, topic: &str) -> Vec<Uuid> {
        self.by_topic
            .get(topic)
            .map(|subscribers| subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    fn counts(&self) -> HashMap<String, usize> {
        self.by_topic
            .iter()
            .map(|(topic, subscribers)| (topic.clone(), subscribers.len()))
            .collect()
    }
}

/// Cloneable handle to the hub. Registration and broadcast are routed
/// through the event loop; subscriptions mutate the shared topic table
/// directly from client tasks under the reader-writer lock.
#[derive(Clone)]
pub struct Hub {
    register_tx: mpsc::Sender<ClientHandle>,
    unregister_tx: mpsc::Sender<Uuid>,
    broadcast_tx: mpsc::Sender<BroadcastMessage>,
    topics: Arc<RwLock<TopicTable>>,
    total_clients: Arc<AtomicUsize>,
}

/// Snapshot returned by `/stats`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStats {
    pub total_clients: usize,
    pub topics: HashMap<String, usize>,
}

impl Hub {
    /// Build the hub handle and its event loop. The loop must be spawned
    /// exactly once.
    pub fn new() -> (Hub, HubLoop) {
        let (register_tx, register_rx) = mpsc::channel(REGISTRY_CAPACITY);
        let (unregister_tx, unregister_rx) = mpsc::channel(REGISTRY_CAPACITY);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_CAPACITY);
        let topics = Arc::new(RwLock::new(TopicTable::default()));
        let total_clients = Arc::new(AtomicUsize::new(0));

        let hub = Hub {
            register_tx,
            unregister_tx,
            broadcast_tx,
            topics: Arc::clone(&topics),
            total_clients: Arc::clone(&total_clients),
        };
        let hub_loop = HubLoop {
            register_rx,
            unregister_rx,
            broadcast_rx,
            clients: HashMap::new(),
            topics,
            total_clients,
        };
        (hub, hub_loop)
    }

    /// Non-blocking enqueue of a message for fan-out. A full hub queue drops
    /// the message rather than stalling the caller.
    pub fn broadcast(&self, msg: BroadcastMessage) {
        if let Err(e) = self.broadcast_tx.try_send(msg) {
            warn!(error = %e, "hub broadcast queue full, dropping message");
        }
    }

    /// Current client and topic counts.
    pub async fn stats(&self) -> HubStats {
        HubStats {
            total_clients: self.total_clients.load(Ordering::Relaxed),
            topics: self.topics.read().await.counts(),
        }
    }

    pub(crate) async fn register(&self, handle: ClientHandle) {
        let _ = self.register_tx.send(handle).await;
    }

    pub(crate) async fn unregister(&self, id: Uuid) {
        let _ = self.unregister_tx.send(id).await;
    }

    /// Add `id` to the event's topic and push a `subscribed` ack onto the
    /// client's own outbound queue. Runs in the client's read task.
    pub(crate) async fn subscribe(&self, id: Uuid, out: &mpsc::Sender<String>, event_id: i64) {
        let topic = event_topic(event_id);
        let subscriber_count = self.topics.write().await.subscribe(&topic, id);
        debug!(client = %id, topic = %topic, subscribers = subscriber_count, "client subscribed");

        if let Some(frame) = ServerMessage::subscribed(event_id, &topic).to_frame() {
            let _ = out.try_send(frame);
        }
    }

    pub(crate) async fn unsubscribe(&self, id: Uuid, event_id: i64) {
        let topic = event_topic(event_id);
        self.topics.write().await.unsubscribe(&topic, id);
        debug!(client = %id, topic = %topic, "client unsubscribed");
    }
}

/// The hub's event loop state. The `clients` map is private to the loop;
/// nothing else reads or writes it.
pub struct HubLoop {
    register_rx: mpsc::Receiver<ClientHandle>,
    unregister_rx: mpsc::Receiver<Uuid>,
    broadcast_rx: mpsc::Receiver<BroadcastMessage>,
    clients: HashMap<Uuid, ClientHandle>,
    topics: Arc<RwLock<TopicTable>>,
    total_clients: Arc<AtomicUsize>,
}

impl HubLoop {
    /// Run the event loop until every hub handle is dropped.
    pub async fn run(mut self) {
        info!("hub event loop running");
        loop {
            tokio::select! {
                Some(handle) = self.register_rx.recv() => self.on_register(handle),
                Some(id) = self.unregister_rx.recv() => self.on_unregister(id).await,
                Some(msg) = self.broadcast_rx.recv() => self.on_broadcast(msg).await,
                else => break,
            }
        }
        info!("hub event loop stopped");
    }

    fn on_register(&mut self, handle: ClientHandle) {
        let welcome = ServerMessage::connected(self.clients.len() + 1);
        if let Some(frame) = welcome.to_frame() {
            let _ = handle.out.try_send(frame);
        }
        self.clients.insert(handle.id, handle);
        self.total_clients.store(self.clients.len(), Ordering::Relaxed);
        info!(total_clients = self.clients.len(), "client registered");
    }

    async fn on_unregister(&mut self, id: Uuid) {
        let Some(handle) = self.clients.remove(&id) else {
            return;
        };
        self.topics.write().await.remove_client(id);
        let _ = handle.kill.send(true);
        self.total_clients.store(self.clients.len(), Ordering::Relaxed);
        info!(total_clients = self.clients.len(), "client unregistered");
    }

    async fn on_broadcast(&mut self, msg: BroadcastMessage) {
        let Some(frame) = msg.message.to_frame() else {
            error!(kind = %msg.message.kind, "failed to serialize broadcast message");
            return;
        };

        let targets: Vec<Uuid> = if msg.topic.is_empty() {
            debug!(clients = self.clients.len(), kind = %msg.message.kind, "broadcasting to all clients");
            self.clients.keys().copied().collect()
        } else {
            let subscribers = self.topics.read().await.subscribers(&msg.topic);
            if subscribers.is_empty() {
                debug!(topic = %msg.topic, "no subscribers for topic, message dropped");
            } else {
                debug!(topic = %msg.topic, subscribers = subscribers.len(), kind = %msg.message.kind, "broadcasting to topic");
            }
            subscribers
        };

        let mut evicted = Vec::new();
        for id in targets {
            let Some(handle) = self.clients.get(&id) else {
                continue;
            };
            // A full (or closed) outbound queue costs the client its
            // connection, never the loop its progress.
            if handle.out.try_send(frame.clone()).is_err() {
                evicted.push(id);
            }
        }

        for id in evicted {
            warn!(client = %id, "outbound queue full, evicting slow consumer");
            self.on_unregister(id).await;
        }
    }
}

// ── HTTP surface ───────────────────────────────────────────────────────

/// Shared state for the hub worker's router.
#[derive(Clone)]
pub struct HubState {
    pub hub: Hub,
    pub service: &'static str,
}

/// GET /ws — upgrade and hand the connection to the hub. No auth; any
/// origin is permitted.
pub async fn handle_ws(State(state): State<HubState>, ws: WebSocketUpgrade) -> Response {
    ws.max_message_size(client::MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| client::serve(state.hub, socket))
}

/// GET /health — liveness probe.
pub async fn health(State(state): State<HubState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "UP",
        "service": state.service,
        "time": Utc::now().to_rfc3339(),
    }))
}

/// GET /stats — client and topic counts.
pub async fn stats(State(state): State<HubState>) -> Json<HubStats> {
    Json(state.hub.stats().await)
}
