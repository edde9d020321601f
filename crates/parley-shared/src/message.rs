//! The persisted chat message record and its identity key.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{RoomId, UserId};

/// A single entry in a room's log.
///
/// Field names follow the JSON wire format (`roomId`, `fileUrl`, ...). The
/// flags default to `false` so that inbound `chatMessage` payloads, which
/// never carry them, deserialize into a fresh record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub from: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    /// Client-assigned send time (epoch millis). Part of the identity key.
    pub time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default)]
    pub delivered: bool,
    #[serde(default)]
    pub seen: bool,
    #[serde(default)]
    pub edited: bool,
    /// Users who soft-deleted this message for themselves.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deleted_for: Vec<UserId>,
}

impl Message {
    /// A fresh text message with every flag cleared.
    pub fn text(from: UserId, to: UserId, room_id: RoomId, time: i64, text: &str) -> Self {
        Self {
            from,
            to: Some(to),
            room_id: Some(room_id),
            time,
            text: Some(text.to_string()),
            file_url: None,
            file_type: None,
            delivered: false,
            seen: false,
            edited: false,
            deleted_for: Vec::new(),
        }
    }

    pub fn key(&self) -> MessageKey {
        MessageKey {
            from: self.from.clone(),
            time: self.time,
        }
    }

    pub fn matches(&self, key: &MessageKey) -> bool {
        self.time == key.time && self.from == key.from
    }

    pub fn has_attachment(&self) -> bool {
        self.file_url.is_some()
    }

    pub fn is_deleted_for(&self, user: &UserId) -> bool {
        self.deleted_for.contains(user)
    }

    /// Hide the message for `user`. Returns `false` if it already was.
    pub fn delete_for(&mut self, user: &UserId) -> bool {
        if self.is_deleted_for(user) {
            return false;
        }
        self.deleted_for.push(user.clone());
        true
    }
}

/// `(sender, send time)`: unique within a room's log.
///
/// The textual form is `"{from}-{time}"`. Sender ids may themselves contain
/// `-`, so parsing splits on the last one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageKey {
    pub from: UserId,
    pub time: i64,
}

impl MessageKey {
    pub fn new(from: impl Into<UserId>, time: i64) -> Self {
        Self {
            from: from.into(),
            time,
        }
    }
}

impl std::fmt::Display for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.from, self.time)
    }
}

impl FromStr for MessageKey {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (from, time) = s
            .rsplit_once('-')
            .ok_or_else(|| ProtocolError::MalformedKey(s.to_string()))?;
        if from.is_empty() {
            return Err(ProtocolError::MalformedKey(s.to_string()));
        }
        let time = time
            .parse::<i64>()
            .map_err(|_| ProtocolError::MalformedKey(s.to_string()))?;
        Ok(Self::new(from, time))
    }
}
