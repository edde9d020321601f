//! Chat session hub.
//!
//! [`ChatHub`] owns the shared chat state (presence, block lists, room logs,
//! event bus). Each WebSocket gets a [`Session`] that turns inbound
//! [`ClientEvent`]s into state changes and outbound events.
//!
//! Broadcasts are fire-and-forget and happen only after the state change
//! they announce has been committed. Nothing on this path returns an error
//! to the client: failures are logged and the event is dropped.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use parley_shared::protocol::{AckRef, ClientEvent, MessageNotification, ServerEvent, StatusPayload};
use parley_shared::{ConnectionId, Message, RoomId, UserId};
use parley_store::RoomLogStore;

use crate::blocks::BlockRegistry;
use crate::bus::{EventBus, Topic};
use crate::directory::UserDirectory;
use crate::presence::{now_millis, PresenceTracker};

#[derive(Debug, Clone, Copy)]
enum Receipt {
    Delivered,
    Seen,
}

pub struct ChatHub {
    presence: Arc<PresenceTracker>,
    blocks: Arc<BlockRegistry>,
    logs: Arc<RoomLogStore>,
    directory: Arc<dyn UserDirectory>,
    bus: EventBus,
}

impl ChatHub {
    pub fn new(
        presence: Arc<PresenceTracker>,
        blocks: Arc<BlockRegistry>,
        logs: Arc<RoomLogStore>,
        directory: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            presence,
            blocks,
            logs,
            directory,
            bus: EventBus::new(),
        }
    }

    pub fn presence(&self) -> &Arc<PresenceTracker> {
        &self.presence
    }

    pub fn blocks(&self) -> &BlockRegistry {
        &self.blocks
    }

    pub fn logs(&self) -> &RoomLogStore {
        &self.logs
    }

    pub fn directory(&self) -> &dyn UserDirectory {
        self.directory.as_ref()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Open a session for a new transport connection.
    pub async fn connect(self: &Arc<Self>) -> (Session, mpsc::Receiver<ServerEvent>) {
        let conn = ConnectionId::new();
        let outbound = self.bus.register(conn).await;
        debug!(conn = %conn, "Session opened");
        let session = Session {
            hub: Arc::clone(self),
            conn,
            user: None,
            rooms: HashSet::new(),
        };
        (session, outbound)
    }

    /// Forward presence transitions to every connection and mirror them
    /// into the user directory. Runs until the tracker is dropped.
    pub fn spawn_status_relay(self: &Arc<Self>) -> JoinHandle<()> {
        let mut statuses = self.presence.subscribe();
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match statuses.recv().await {
                    Ok(status) => hub.relay_status(status).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Status relay lagged, transitions dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn relay_status(&self, status: StatusPayload) {
        let last_seen = status.last_seen.unwrap_or_else(now_millis);
        if let Err(e) = self
            .directory
            .update_online_status(&status.user_id, status.online, last_seen)
            .await
        {
            warn!(user = %status.user_id, error = %e, "Failed to record presence");
        }

        let reached = self.bus.publish_all(ServerEvent::Status(status)).await;
        debug!(reached, "Status broadcast");
    }

    async fn send_message(&self, session: &Session, message: Message) {
        let Some(room) = message.room_id.clone() else {
            debug!(conn = %session.conn, "chatMessage without roomId dropped");
            return;
        };
        if !session.rooms.contains(&room) {
            debug!(conn = %session.conn, room = %room, "chatMessage for unjoined room dropped");
            return;
        }

        if let Some(to) = &message.to {
            if self.blocks.is_blocked(to, &message.from) {
                debug!(
                    from = %message.from,
                    to = %to,
                    room = %room,
                    "Recipient blocked sender, message dropped"
                );
                return;
            }
        }

        // Attachments were already logged by the upload endpoint.
        if !message.has_attachment() {
            if let Err(e) = self.logs.append(&room, message.clone()).await {
                warn!(room = %room, error = %e, "Failed to persist message, not relayed");
                return;
            }
        }

        let notification = message.to.clone().map(|to| MessageNotification {
            from: message.from.clone(),
            to,
            time: message.time,
            room_id: room.clone(),
        });

        self.bus
            .publish(&Topic::Room(room), ServerEvent::ChatMessage(message), None)
            .await;

        if let Some(notification) = notification {
            let topic = Topic::User(notification.to.clone());
            self.bus
                .publish(&topic, ServerEvent::NewMessageNotification(notification), None)
                .await;
        }
    }

    async fn acknowledge(&self, ack: AckRef, receipt: Receipt) {
        let key = ack.key();
        let result = match receipt {
            Receipt::Delivered => self.logs.mark_delivered(&ack.room_id, &key).await,
            Receipt::Seen => self.logs.mark_seen(&ack.room_id, &key).await,
        };

        let message = match result {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!(room = %ack.room_id, key = %key, ?receipt, "Receipt for missing message");
                return;
            }
            Err(e) => {
                warn!(room = %ack.room_id, key = %key, error = %e, "Failed to record receipt");
                return;
            }
        };

        let event = match receipt {
            Receipt::Delivered => ServerEvent::Delivered(message),
            Receipt::Seen => ServerEvent::Seen(message),
        };
        self.bus.publish(&Topic::Room(ack.room_id), event, None).await;
    }
}

/// Protocol state of one connection.
pub struct Session {
    hub: Arc<ChatHub>,
    conn: ConnectionId,
    /// Set by the first `online`.
    user: Option<UserId>,
    rooms: HashSet<RoomId>,
}

impl Session {
    pub fn id(&self) -> ConnectionId {
        self.conn
    }

    pub fn user(&self) -> Option<&UserId> {
        self.user.as_ref()
    }

    pub async fn handle(&mut self, event: ClientEvent) {
        debug!(conn = %self.conn, event = event.name(), "Inbound event");
        match event {
            ClientEvent::Online(user) => self.bind(user).await,

            ClientEvent::Heartbeat(user) => match &self.user {
                Some(bound) => {
                    if bound != &user {
                        debug!(conn = %self.conn, bound = %bound, claimed = %user, "Heartbeat for other user");
                    }
                    self.hub.presence.heartbeat(bound);
                }
                None => debug!(conn = %self.conn, "Heartbeat before online ignored"),
            },

            ClientEvent::JoinRoom(room) => {
                if let Err(e) = room.validate() {
                    warn!(conn = %self.conn, error = %e, "Rejected joinRoom");
                    return;
                }
                if self.rooms.insert(room.clone()) {
                    let topic = Topic::Room(room);
                    self.hub.bus.subscribe(self.conn, topic.clone()).await;
                    let members = self.hub.bus.subscriber_count(&topic).await;
                    debug!(conn = %self.conn, topic = %topic, members, "Joined room");
                }
            }

            ClientEvent::ChatMessage(message) => self.hub.send_message(self, message).await,

            ClientEvent::Delivered(ack) => self.hub.acknowledge(ack, Receipt::Delivered).await,

            ClientEvent::Seen(ack) => self.hub.acknowledge(ack, Receipt::Seen).await,

            ClientEvent::Typing(payload) => {
                let topic = Topic::Room(payload.room_id.clone());
                self.hub
                    .bus
                    .publish(&topic, ServerEvent::Typing(payload), Some(self.conn))
                    .await;
            }
        }
    }

    async fn bind(&mut self, user: UserId) {
        if user.is_empty() {
            warn!(conn = %self.conn, "online with empty user id ignored");
            return;
        }

        if let Some(previous) = self.user.take() {
            if previous != user {
                self.hub
                    .bus
                    .unsubscribe(self.conn, &Topic::User(previous))
                    .await;
            }
        }

        // The tracker detaches the connection from any previous owner.
        self.hub.presence.mark_online(&user, self.conn);
        self.hub
            .bus
            .subscribe(self.conn, Topic::User(user.clone()))
            .await;
        info!(conn = %self.conn, user = %user, "Connection bound");
        self.user = Some(user);
    }

    /// Transport closed. The offline status, if any, goes out via the
    /// status relay.
    pub async fn disconnect(self) {
        self.hub.presence.mark_disconnected(self.conn);
        self.hub.bus.unregister(self.conn).await;
        debug!(conn = %self.conn, user = ?self.user, "Session closed");
    }
}
