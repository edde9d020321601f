//! Per-user block lists consulted before delivering a message.
//!
//! Edges are directed: `block(a, b)` means `a` no longer receives from `b`;
//! it says nothing about what `b` receives. The registry is in memory only
//! and starts empty on every boot.

use std::collections::HashSet;

use dashmap::DashMap;
use tracing::info;

use parley_shared::UserId;

#[derive(Default)]
pub struct BlockRegistry {
    edges: DashMap<UserId, HashSet<UserId>>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the edge is new.
    pub fn block(&self, user: &UserId, target: &UserId) -> bool {
        let added = self
            .edges
            .entry(user.clone())
            .or_default()
            .insert(target.clone());
        if added {
            info!(user = %user, target = %target, "User blocked");
        }
        added
    }

    /// Returns `true` if an edge was removed.
    pub fn unblock(&self, user: &UserId, target: &UserId) -> bool {
        let removed = self
            .edges
            .get_mut(user)
            .map(|mut blocked| blocked.remove(target))
            .unwrap_or(false);
        self.edges.remove_if(user, |_, blocked| blocked.is_empty());
        if removed {
            info!(user = %user, target = %target, "User unblocked");
        }
        removed
    }

    /// Whether `user` has blocked `target`.
    pub fn is_blocked(&self, user: &UserId, target: &UserId) -> bool {
        self.edges
            .get(user)
            .map(|blocked| blocked.contains(target))
            .unwrap_or(false)
    }

    /// Everyone `user` has blocked, sorted.
    pub fn blocked_by(&self, user: &UserId) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self
            .edges
            .get(user)
            .map(|blocked| blocked.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}
