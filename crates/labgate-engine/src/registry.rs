//! In-memory authoritative peer registry.

use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::model::{Peer, PeerId};

/// The authoritative `{(user_id, group_id) -> Peer}` map.
///
/// Reads take the lock briefly and return cloned snapshots; mutations take
/// the write lock only for the map operation itself, never around device
/// or database work.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<PeerId, Peer>>,
}

impl PeerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a single peer by its composite key.
    pub async fn get(&self, id: &PeerId) -> Option<Peer> {
        self.peers.read().await.get(id).cloned()
    }

    /// Number of registered peers.
    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    /// True when no peers are registered.
    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Inserts or replaces a peer.
    pub async fn insert(&self, peer: Peer) {
        self.peers.write().await.insert(peer.id, peer);
    }

    /// Removes the given peers.
    pub async fn remove_all(&self, ids: &[PeerId]) {
        let mut peers = self.peers.write().await;
        for id in ids {
            peers.remove(id);
        }
    }

    /// Flips the ban flag on the given peers.
    pub async fn set_banned(&self, ids: &[PeerId], banned: bool) {
        let mut peers = self.peers.write().await;
        for id in ids {
            if let Some(peer) = peers.get_mut(id) {
                peer.banned = banned;
            }
        }
    }

    /// Snapshots peers matching the composite-key filter and a predicate.
    ///
    /// Filter cases: both halves `None` match everything; one half set
    /// matches that half; both set address exactly one composite key.
    pub async fn filtered<F>(
        &self,
        user_id: Option<Uuid>,
        group_id: Option<Uuid>,
        predicate: F,
    ) -> Vec<Peer>
    where
        F: Fn(&Peer) -> bool,
    {
        let peers = self.peers.read().await;
        peers
            .values()
            .filter(|peer| match (user_id, group_id) {
                (Some(user), Some(group)) => {
                    peer.id.user_id == user && peer.id.group_id == group
                }
                (Some(user), None) => peer.id.user_id == user,
                (None, Some(group)) => peer.id.group_id == group,
                (None, None) => true,
            })
            .filter(|peer| predicate(peer))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn peer(user_id: Uuid, group_id: Uuid, host: u8) -> Peer {
        let pair = labgate_keys::KeyPair::generate();
        Peer {
            id: PeerId::new(user_id, group_id),
            address: Ipv4Addr::new(10, 128, 0, host),
            allowed_ips: "10.10.0.0/24".parse().expect("cidr"),
            dns: Ipv4Addr::new(10, 10, 0, 1),
            private_key: pair.private,
            public_key: pair.public,
            banned: false,
            last_seen: 0,
        }
    }

    #[tokio::test]
    async fn exact_key_filter_returns_at_most_one() {
        let registry = PeerRegistry::new();
        let user = Uuid::new_v4();
        let group = Uuid::new_v4();
        registry.insert(peer(user, group, 2)).await;
        registry.insert(peer(user, Uuid::new_v4(), 3)).await;
        registry.insert(peer(Uuid::new_v4(), group, 4)).await;

        let exact = registry.filtered(Some(user), Some(group), |_| true).await;
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].id, PeerId::new(user, group));
    }

    #[tokio::test]
    async fn half_filters_match_their_half() {
        let registry = PeerRegistry::new();
        let user = Uuid::new_v4();
        registry.insert(peer(user, Uuid::new_v4(), 2)).await;
        registry.insert(peer(user, Uuid::new_v4(), 3)).await;
        registry.insert(peer(Uuid::new_v4(), Uuid::new_v4(), 4)).await;

        assert_eq!(registry.filtered(Some(user), None, |_| true).await.len(), 2);
        assert_eq!(registry.filtered(None, None, |_| true).await.len(), 3);
    }

    #[tokio::test]
    async fn predicate_composes_with_filter() {
        let registry = PeerRegistry::new();
        let group = Uuid::new_v4();
        let mut banned = peer(Uuid::new_v4(), group, 2);
        banned.banned = true;
        registry.insert(banned).await;
        registry.insert(peer(Uuid::new_v4(), group, 3)).await;

        let unbanned = registry.filtered(None, Some(group), |p| !p.banned).await;
        assert_eq!(unbanned.len(), 1);
        assert!(!unbanned[0].banned);
    }

    #[tokio::test]
    async fn set_banned_flips_only_given_ids() {
        let registry = PeerRegistry::new();
        let a = peer(Uuid::new_v4(), Uuid::new_v4(), 2);
        let b = peer(Uuid::new_v4(), Uuid::new_v4(), 3);
        let a_id = a.id;
        let b_id = b.id;
        registry.insert(a).await;
        registry.insert(b).await;

        registry.set_banned(&[a_id], true).await;
        assert!(registry.get(&a_id).await.expect("a").banned);
        assert!(!registry.get(&b_id).await.expect("b").banned);
    }
}
