//! The slice of the user directory the chat core depends on.
//!
//! Accounts and profiles are owned elsewhere; the chat server only looks
//! users up and mirrors presence transitions into their records.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use parley_shared::UserId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: UserId,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default)]
    pub online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<i64>,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_id(&self, id: &UserId) -> anyhow::Result<Option<UserProfile>>;

    /// Profiles for the ids that exist, in no particular order.
    async fn find_many_by_ids(&self, ids: &[UserId]) -> anyhow::Result<Vec<UserProfile>>;

    /// Record a presence transition. Unknown users are ignored.
    async fn update_online_status(
        &self,
        id: &UserId,
        online: bool,
        last_seen: i64,
    ) -> anyhow::Result<()>;
}

/// Directory held in memory, optionally seeded from a JSON file.
#[derive(Default)]
pub struct MemoryDirectory {
    users: RwLock<HashMap<UserId, UserProfile>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON array of profiles.
    pub async fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read(path).await?;
        let profiles: Vec<UserProfile> = serde_json::from_slice(&raw)?;
        info!(path = %path.display(), users = profiles.len(), "Loaded user directory");

        let directory = Self::new();
        for profile in profiles {
            directory.insert(profile).await;
        }
        Ok(directory)
    }

    pub async fn insert(&self, profile: UserProfile) {
        self.users
            .write()
            .await
            .insert(profile.user_id.clone(), profile);
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn find_by_id(&self, id: &UserId) -> anyhow::Result<Option<UserProfile>> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn find_many_by_ids(&self, ids: &[UserId]) -> anyhow::Result<Vec<UserProfile>> {
        let users = self.users.read().await;
        Ok(ids.iter().filter_map(|id| users.get(id).cloned()).collect())
    }

    async fn update_online_status(
        &self,
        id: &UserId,
        online: bool,
        last_seen: i64,
    ) -> anyhow::Result<()> {
        if let Some(profile) = self.users.write().await.get_mut(id) {
            profile.online = online;
            profile.last_seen = Some(last_seen);
        }
        Ok(())
    }
}
