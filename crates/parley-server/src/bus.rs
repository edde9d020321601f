use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::debug;

use parley_shared::constants::OUTBOUND_QUEUE_CAPACITY;
use parley_shared::protocol::ServerEvent;
use parley_shared::{ConnectionId, RoomId, UserId};

/// A broadcast group a connection can subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Everyone who joined the room.
    Room(RoomId),
    /// Personal channel: every connection bound to the user.
    User(UserId),
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topic::Room(room) => write!(f, "room:{room}"),
            Topic::User(user) => write!(f, "user:{user}"),
        }
    }
}

struct Subscriber {
    tx: mpsc::Sender<ServerEvent>,
    topics: HashSet<Topic>,
}

#[derive(Default)]
struct BusState {
    connections: HashMap<ConnectionId, Subscriber>,
    topics: HashMap<Topic, HashSet<ConnectionId>>,
}

/// Fan-out of server events to connections.
///
/// Publishing never waits: each connection has a bounded queue and events
/// for a connection whose queue is full are dropped.
pub struct EventBus {
    state: RwLock<BusState>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(BusState::default()),
        }
    }

    /// Add a connection. Returns the receiver its writer task drains.
    pub async fn register(&self, conn: ConnectionId) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let mut state = self.state.write().await;
        state.connections.insert(
            conn,
            Subscriber {
                tx,
                topics: HashSet::new(),
            },
        );
        debug!(conn = %conn, connections = state.connections.len(), "Connection registered");
        rx
    }

    /// Remove a connection and all its subscriptions. Dropping the sender
    /// ends the connection's receiver.
    pub async fn unregister(&self, conn: ConnectionId) {
        let mut state = self.state.write().await;
        let Some(subscriber) = state.connections.remove(&conn) else {
            return;
        };
        for topic in subscriber.topics {
            remove_member(&mut state.topics, &topic, conn);
        }
        debug!(conn = %conn, connections = state.connections.len(), "Connection unregistered");
    }

    pub async fn subscribe(&self, conn: ConnectionId, topic: Topic) {
        let mut state = self.state.write().await;
        let Some(subscriber) = state.connections.get_mut(&conn) else {
            debug!(conn = %conn, topic = %topic, "Subscribe from unknown connection");
            return;
        };
        if subscriber.topics.insert(topic.clone()) {
            debug!(conn = %conn, topic = %topic, "Subscribed");
            state.topics.entry(topic).or_default().insert(conn);
        }
    }

    pub async fn unsubscribe(&self, conn: ConnectionId, topic: &Topic) {
        let mut state = self.state.write().await;
        let removed = state
            .connections
            .get_mut(&conn)
            .map(|subscriber| subscriber.topics.remove(topic))
            .unwrap_or(false);
        if removed {
            remove_member(&mut state.topics, topic, conn);
        }
    }

    /// Deliver to every subscriber of `topic` except `except`. Returns how
    /// many queues accepted the event.
    pub async fn publish(
        &self,
        topic: &Topic,
        event: ServerEvent,
        except: Option<ConnectionId>,
    ) -> usize {
        let state = self.state.read().await;
        let Some(members) = state.topics.get(topic) else {
            return 0;
        };
        let targets = members
            .iter()
            .filter(|conn| Some(**conn) != except)
            .filter_map(|conn| state.connections.get(conn).map(|s| (*conn, &s.tx)));
        deliver(targets, &event)
    }

    /// Deliver to every registered connection.
    pub async fn publish_all(&self, event: ServerEvent) -> usize {
        let state = self.state.read().await;
        let targets = state
            .connections
            .iter()
            .map(|(conn, subscriber)| (*conn, &subscriber.tx));
        deliver(targets, &event)
    }

    pub async fn subscriber_count(&self, topic: &Topic) -> usize {
        self.state
            .read()
            .await
            .topics
            .get(topic)
            .map(|members| members.len())
            .unwrap_or(0)
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn deliver<'a>(
    targets: impl Iterator<Item = (ConnectionId, &'a mpsc::Sender<ServerEvent>)>,
    event: &ServerEvent,
) -> usize {
    let mut delivered = 0;
    for (conn, tx) in targets {
        match tx.try_send(event.clone()) {
            Ok(()) => delivered += 1,
            Err(TrySendError::Full(_)) => {
                debug!(target = %conn, "Dropping event for slow connection");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
    delivered
}

fn remove_member(
    topics: &mut HashMap<Topic, HashSet<ConnectionId>>,
    topic: &Topic,
    conn: ConnectionId,
) {
    if let Some(members) = topics.get_mut(topic) {
        members.remove(&conn);
        if members.is_empty() {
            topics.remove(topic);
        }
    }
}
