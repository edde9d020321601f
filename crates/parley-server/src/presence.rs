//! Live presence tracking.
//!
//! A user is online exactly while they have a [`PresenceEntry`], and an entry
//! exists exactly while its connection set is non-empty. Two signals end an
//! entry: the last connection closing cleanly ([`PresenceTracker::mark_disconnected`])
//! or the heartbeat going stale ([`PresenceTracker::sweep_inactive`]), the
//! latter covering clients that vanished without a close.
//!
//! Entries live in a sharded map so mutations on one user never wait on
//! another. Every transition is published on a broadcast channel while the
//! user's entry is still locked; the chat hub relays it to all connected
//! clients.
//!
//! State is process-local and starts empty: a restart forgets who was online.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info};

use parley_shared::protocol::StatusPayload;
use parley_shared::{ConnectionId, UserId};

const STATUS_CHANNEL_CAPACITY: usize = 1024;

/// Presence of one online user.
#[derive(Debug, Clone)]
pub struct PresenceEntry {
    connections: HashSet<ConnectionId>,
    /// Monotonic time of the last heartbeat (or connect), for the sweep.
    last_heartbeat: Instant,
    /// Wall-clock millis of the same moment, reported as `lastSeen`.
    last_activity_ms: i64,
}

impl PresenceEntry {
    fn new(conn: ConnectionId) -> Self {
        let mut connections = HashSet::new();
        connections.insert(conn);
        Self {
            connections,
            last_heartbeat: Instant::now(),
            last_activity_ms: now_millis(),
        }
    }

    fn touch(&mut self) {
        self.last_heartbeat = Instant::now();
        self.last_activity_ms = now_millis();
    }

    fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.duration_since(self.last_heartbeat) >= timeout
    }
}

pub struct PresenceTracker {
    entries: DashMap<UserId, PresenceEntry>,
    /// Which user each registered connection belongs to.
    owners: DashMap<ConnectionId, UserId>,
    events: broadcast::Sender<StatusPayload>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            entries: DashMap::new(),
            owners: DashMap::new(),
            events,
        }
    }

    /// Receive every status transition from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusPayload> {
        self.events.subscribe()
    }

    /// Register `conn` under `user`. Returns `true` if the user just came
    /// online. Registering the same connection twice is a no-op apart from
    /// refreshing activity; a connection owned by another user is moved.
    pub fn mark_online(&self, user: &UserId, conn: ConnectionId) -> bool {
        let previous = self.owners.get(&conn).map(|owner| owner.clone());
        if let Some(previous) = previous {
            if &previous != user {
                debug!(conn = %conn, from = %previous, to = %user, "Rebinding connection");
                self.mark_disconnected(conn);
            }
        }
        self.owners.insert(conn, user.clone());

        // Statuses go out under the entry lock, in transition order.
        let came_online = match self.entries.entry(user.clone()) {
            Entry::Occupied(mut entry) => {
                let entry = entry.get_mut();
                entry.connections.insert(conn);
                entry.touch();
                false
            }
            Entry::Vacant(slot) => {
                let _entry = slot.insert(PresenceEntry::new(conn));
                info!(user = %user, conn = %conn, "User online");
                self.emit(StatusPayload {
                    user_id: user.clone(),
                    online: true,
                    last_seen: None,
                });
                true
            }
        };

        if !came_online {
            debug!(
                user = %user,
                conn = %conn,
                connections = self.connection_count(user),
                "Additional connection registered"
            );
        }
        came_online
    }

    /// Refresh the user's liveness. Ignored for users with no entry, e.g.
    /// a heartbeat that raced a disconnect.
    pub fn heartbeat(&self, user: &UserId) -> bool {
        match self.entries.get_mut(user) {
            Some(mut entry) => {
                entry.touch();
                true
            }
            None => {
                debug!(user = %user, "Heartbeat for offline user ignored");
                false
            }
        }
    }

    /// Remove `conn` from its owner. If that was the owner's last
    /// connection the user goes offline and the emitted status is returned.
    pub fn mark_disconnected(&self, conn: ConnectionId) -> Option<StatusPayload> {
        let (_, user) = self.owners.remove(&conn)?;

        let status = match self.entries.entry(user.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().connections.remove(&conn);
                if entry.get().connections.is_empty() {
                    let status = StatusPayload {
                        user_id: user.clone(),
                        online: false,
                        last_seen: Some(now_millis()),
                    };
                    info!(user = %user, conn = %conn, "User offline");
                    self.emit(status.clone());
                    entry.remove();
                    Some(status)
                } else {
                    None
                }
            }
            // Already demoted by the sweep.
            Entry::Vacant(_) => None,
        };

        if status.is_none() {
            debug!(user = %user, conn = %conn, "Connection closed, user still online");
        }
        status
    }

    /// Force offline every user whose last heartbeat is at least `timeout`
    /// old, whatever their connection count. Returns the emitted statuses.
    pub fn sweep_inactive(&self, timeout: Duration) -> Vec<StatusPayload> {
        let now = Instant::now();
        let stale: Vec<UserId> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_stale(now, timeout))
            .map(|entry| entry.key().clone())
            .collect();

        let mut demoted = Vec::new();
        for user in stale {
            // Re-check under the entry lock: a heartbeat may have landed.
            let mut status = None;
            let removed = self.entries.remove_if(&user, |user, entry| {
                if !entry.is_stale(now, timeout) {
                    return false;
                }
                info!(
                    user = %user,
                    connections = entry.connections.len(),
                    "User timed out"
                );
                let payload = StatusPayload {
                    user_id: user.clone(),
                    online: false,
                    last_seen: Some(entry.last_activity_ms),
                };
                self.emit(payload.clone());
                status = Some(payload);
                true
            });
            let (Some((user, entry)), Some(status)) = (removed, status) else {
                continue;
            };

            for conn in &entry.connections {
                self.owners.remove_if(conn, |_, owner| owner == &user);
            }
            demoted.push(status);
        }
        demoted
    }

    pub fn is_online(&self, user: &UserId) -> bool {
        self.entries.contains_key(user)
    }

    pub fn connection_count(&self, user: &UserId) -> usize {
        self.entries
            .get(user)
            .map(|entry| entry.connections.len())
            .unwrap_or(0)
    }

    pub fn online_count(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn owner_of(&self, conn: ConnectionId) -> Option<UserId> {
        self.owners.get(&conn).map(|owner| owner.clone())
    }

    fn emit(&self, status: StatusPayload) {
        if self.events.send(status).is_err() {
            debug!("No status subscribers");
        }
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
