//! Per-room message logs.
//!
//! Each room is a single JSON array on disk (`<dir>/<roomId>.json`). Every
//! mutation is a whole-log read-modify-write, so two handlers touching the
//! same room must not interleave: all mutations go through a per-room async
//! mutex taken from a lock table. Different rooms never contend.
//!
//! Replacement is atomic at the file level (write to a sibling temp file,
//! then rename). This guards against torn writes inside one process only;
//! several processes sharing a data directory can still lose updates.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use parley_shared::{Message, MessageKey, RoomId, UserId};

use crate::error::{Result, StoreError};
use crate::paths::child_file;

/// Result of [`RoomLogStore::edit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    Applied(Message),
    NotFound,
    /// The requester is not the original sender; nothing changed.
    NotSender,
}

pub struct RoomLogStore {
    dir: PathBuf,
    locks: Mutex<HashMap<RoomId, Arc<Mutex<()>>>>,
}

impl RoomLogStore {
    /// Open the store rooted at `dir`, creating the directory if missing.
    pub async fn open(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!(path = %dir.display(), "Room log store initialized");
        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Read a room's full log. A room that was never written is empty.
    pub async fn load(&self, room: &RoomId) -> Result<Vec<Message>> {
        let path = self.log_path(room)?;
        read_log(&path, room).await
    }

    pub async fn append(&self, room: &RoomId, message: Message) -> Result<()> {
        let key = message.key();
        let len = self
            .mutate(room, move |log| {
                log.push(message);
                (log.len(), true)
            })
            .await?;
        debug!(room = %room, key = %key, len, "Appended message");
        Ok(())
    }

    pub async fn find_by_key(&self, room: &RoomId, key: &MessageKey) -> Result<Option<Message>> {
        let log = self.load(room).await?;
        Ok(log.into_iter().find(|m| m.matches(key)))
    }

    /// Set the delivered flag. `None` when the message no longer exists.
    pub async fn mark_delivered(&self, room: &RoomId, key: &MessageKey) -> Result<Option<Message>> {
        self.set_flag(room, key, |m| m.delivered = true).await
    }

    /// Set the seen flag. `None` when the message no longer exists.
    pub async fn mark_seen(&self, room: &RoomId, key: &MessageKey) -> Result<Option<Message>> {
        self.set_flag(room, key, |m| m.seen = true).await
    }

    /// Hide the matching messages for `user` only. Returns how many
    /// messages gained `user` in their deleted-for set.
    pub async fn soft_delete(
        &self,
        room: &RoomId,
        keys: &[MessageKey],
        user: &UserId,
    ) -> Result<usize> {
        let hidden = self
            .mutate(room, |log| {
                let mut hidden = 0;
                for message in log.iter_mut() {
                    if keys.iter().any(|k| message.matches(k)) && message.delete_for(user) {
                        hidden += 1;
                    }
                }
                (hidden, hidden > 0)
            })
            .await?;
        debug!(room = %room, user = %user, hidden, "Soft-deleted messages");
        Ok(hidden)
    }

    /// Physically remove the matching messages for everyone.
    pub async fn hard_delete(&self, room: &RoomId, keys: &[MessageKey]) -> Result<usize> {
        let removed = self
            .mutate(room, |log| {
                let before = log.len();
                log.retain(|m| !keys.iter().any(|k| m.matches(k)));
                let removed = before - log.len();
                (removed, removed > 0)
            })
            .await?;
        debug!(room = %room, removed, "Hard-deleted messages");
        Ok(removed)
    }

    /// Replace a message's text, only if `user` sent it.
    pub async fn edit(
        &self,
        room: &RoomId,
        key: &MessageKey,
        text: &str,
        user: &UserId,
    ) -> Result<EditOutcome> {
        self.mutate(room, |log| match log.iter_mut().find(|m| m.matches(key)) {
            None => (EditOutcome::NotFound, false),
            Some(m) if &m.from != user => (EditOutcome::NotSender, false),
            Some(m) => {
                m.text = Some(text.to_string());
                m.edited = true;
                (EditOutcome::Applied(m.clone()), true)
            }
        })
        .await
    }

    /// Drop lock-table entries nobody is holding or waiting on.
    pub async fn prune_idle_locks(&self) -> usize {
        let mut locks = self.locks.lock().await;
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        let pruned = before - locks.len();
        if pruned > 0 {
            debug!(pruned, "Pruned idle room locks");
        }
        pruned
    }

    async fn set_flag(
        &self,
        room: &RoomId,
        key: &MessageKey,
        apply: impl FnOnce(&mut Message),
    ) -> Result<Option<Message>> {
        self.mutate(room, |log| match log.iter_mut().find(|m| m.matches(key)) {
            Some(m) => {
                apply(m);
                (Some(m.clone()), true)
            }
            None => (None, false),
        })
        .await
    }

    /// Serialised read-modify-write. `f` returns its result and whether the
    /// log changed; unchanged logs are not rewritten.
    async fn mutate<T>(
        &self,
        room: &RoomId,
        f: impl FnOnce(&mut Vec<Message>) -> (T, bool),
    ) -> Result<T> {
        let path = self.log_path(room)?;
        let lock = self.room_lock(room).await;
        let _guard = lock.lock().await;

        let mut log = read_log(&path, room).await?;
        let (out, changed) = f(&mut log);
        if changed {
            write_log(&path, &log).await?;
        }
        Ok(out)
    }

    async fn room_lock(&self, room: &RoomId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(room.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn log_path(&self, room: &RoomId) -> Result<PathBuf> {
        room.validate()?;
        child_file(&self.dir, &format!("{}.json", room.as_str()))
    }
}

async fn read_log(path: &Path, room: &RoomId) -> Result<Vec<Message>> {
    let raw = match fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&raw).map_err(|source| {
        warn!(room = %room, error = %source, "Room log does not parse");
        StoreError::CorruptLog {
            room: room.clone(),
            source,
        }
    })
}

async fn write_log(path: &Path, log: &[Message]) -> Result<()> {
    let data = serde_json::to_vec(log)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &data).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}
