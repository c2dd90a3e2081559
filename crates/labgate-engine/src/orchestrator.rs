//! Lifecycle orchestration across device, filter, allocator and store.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use ipnet::Ipv4Net;
use labgate_device::{
    render_client_config, render_server_config, ClientConfigView, DeviceControl, ServerConfigView,
    NIC,
};
use labgate_ipam::{first_host, IpAllocator};
use labgate_keys::KeyPair;
use labgate_store::{NewVpnClient, PeerStore, StoreError, VpnClientRow};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::{Peer, PeerId, VpnSettings};
use crate::registry::PeerRegistry;

/// Sequences the external systems for every peer lifecycle transition.
///
/// Mutations never hold the registry lock across external work: reads use
/// pre-snapshots, the write lock is taken only for the map change, and
/// same-key creations are serialized by a per-key mutex so concurrent
/// `get_or_create` calls for one peer cannot double-allocate.
pub struct LifecycleEngine<D, A, S> {
    settings: VpnSettings,
    server_keys: OnceLock<KeyPair>,
    registry: PeerRegistry,
    create_locks: Mutex<HashMap<PeerId, Arc<AsyncMutex<()>>>>,
    device: D,
    ipam: A,
    store: S,
}

impl<D, A, S> LifecycleEngine<D, A, S>
where
    D: DeviceControl,
    A: IpAllocator,
    S: PeerStore,
{
    /// Creates an engine with an empty registry.
    #[must_use]
    pub fn new(settings: VpnSettings, device: D, ipam: A, store: S) -> Self {
        Self {
            settings,
            server_keys: OnceLock::new(),
            registry: PeerRegistry::new(),
            create_locks: Mutex::new(HashMap::new()),
            device,
            ipam,
            store,
        }
    }

    /// The launch-time VPN settings.
    #[must_use]
    pub fn settings(&self) -> &VpnSettings {
        &self.settings
    }

    /// The registry, for read-side introspection.
    #[must_use]
    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// The device controller.
    #[must_use]
    pub fn device(&self) -> &D {
        &self.device
    }

    /// The address allocator.
    #[must_use]
    pub fn ipam(&self) -> &A {
        &self.ipam
    }

    /// The peer store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The server key pair, once `init_server` has run.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ServerNotInitialized`] before `init_server`.
    pub fn server_keys(&self) -> Result<&KeyPair, EngineError> {
        self.server_keys.get().ok_or(EngineError::ServerNotInitialized)
    }

    /// Brings up the server interface.
    ///
    /// Reserves the server's own tunnel address (idempotently, so restarts
    /// find it already held), loads or generates-and-persists the server
    /// key pair, renders the interface config and runs `wg-quick up`. Any
    /// failure here is fatal to daemon startup; there is no compensation.
    pub async fn init_server(&self) -> Result<(), EngineError> {
        let address = self.ipam.first_ip();
        self.ipam.acquire_ip(Some(address)).await?;

        let key_pair = self.load_or_generate_server_keys().await?;
        let config = render_server_config(&ServerConfigView {
            address,
            port: self.settings.port,
            private_key: &key_pair.private.to_base64(),
        });
        let _ = self.server_keys.set(key_pair);

        self.device.write_config(&config).await?;
        self.device.up_interface().await?;

        info!(
            interface = NIC,
            address = %address,
            port = self.settings.port,
            "wireguard interface is up"
        );
        Ok(())
    }

    async fn load_or_generate_server_keys(&self) -> Result<KeyPair, EngineError> {
        let private = match self.store.get_server_private_key().await {
            Ok(value) => Some(value),
            Err(StoreError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        let public = match self.store.get_server_public_key().await {
            Ok(value) => Some(value),
            Err(StoreError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };

        match (private, public) {
            (Some(private), Some(public)) => Ok(KeyPair::from_base64(&private, &public)?),
            _ => {
                let pair = KeyPair::generate();
                self.store
                    .set_server_private_key(&pair.private.to_base64())
                    .await?;
                self.store
                    .set_server_public_key(&pair.public.to_base64())
                    .await?;
                info!("generated and persisted a new server key pair");
                Ok(pair)
            }
        }
    }

    /// Rehydrates the registry from the store and reprograms the device.
    ///
    /// Every persisted row is put back into the registry even when its
    /// device state fails to apply, so subsequent RPCs see it; per-row
    /// failures are accumulated and returned as one aggregate (fatal
    /// during boot).
    pub async fn init_peers(&self) -> Result<(), EngineError> {
        let rows = self.store.list_clients().await?;
        let mut errors = Vec::new();

        for row in rows {
            let peer = match peer_from_row(&row) {
                Ok(peer) => peer,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };

            let tag = peer.tag();
            let address = peer.address_cidr();
            let allowed = peer.allowed_ips.to_string();

            if let Err(e) = self
                .device
                .add_peer(&address, &peer.public_key.to_base64())
                .await
            {
                warn!(%tag, error = %e, "rehydration: adding peer failed");
                errors.push(e.into());
            }
            if let Err(e) = self.device.add_nat_rule(&tag, &address, &allowed).await {
                warn!(%tag, error = %e, "rehydration: adding NAT rule failed");
                errors.push(e.into());
            }
            if peer.banned {
                if let Err(e) = self.device.add_block_rule(&tag, &address).await {
                    warn!(%tag, error = %e, "rehydration: adding ban rule failed");
                    errors.push(e.into());
                }
            }

            self.registry.insert(peer).await;
        }

        let count = self.registry.len().await;
        info!(peers = count, "peer registry rehydrated");

        if errors.is_empty() {
            Ok(())
        } else {
            Err(EngineError::aggregate(errors))
        }
    }

    /// Returns the tunnel config for `(user_id, group_id)`, provisioning
    /// the peer on first request.
    pub async fn get_or_create_client_config(
        &self,
        user_id: Uuid,
        group_id: Uuid,
        dest_cidr: &str,
    ) -> Result<String, EngineError> {
        let id = PeerId::new(user_id, group_id);

        if let Some(peer) = self.registry.get(&id).await {
            return self.render_client(&peer);
        }

        // Serialize concurrent creations of the same key; the loser of the
        // race finds the winner's entry on the re-read.
        let lock = self.create_lock(id);
        let _guard = lock.lock().await;

        if let Some(peer) = self.registry.get(&id).await {
            return self.render_client(&peer);
        }

        let peer = self.create_client(id, dest_cidr).await?;
        self.render_client(&peer)
    }

    fn create_lock(&self, id: PeerId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.create_locks.lock().expect("create locks poisoned");
        locks.entry(id).or_default().clone()
    }

    /// Provisions a new peer: allocator first (the address is reserved even
    /// if a later step fails), then device and filter, then the durable
    /// row, then the cache. The destination CIDR is validated only after
    /// the NAT rule is installed, so a malformed one is compensated like
    /// any later failure. Failed steps are undone in reverse so nothing
    /// leaks on the error path.
    async fn create_client(&self, id: PeerId, dest_cidr: &str) -> Result<Peer, EngineError> {
        let address = self.ipam.acquire_ip(None).await?;
        let address_cidr = format!("{address}/32");
        let key_pair = KeyPair::generate();
        let tag = id.to_string();

        debug!(%tag, address = %address_cidr, "provisioning peer");

        if let Err(e) = self
            .device
            .add_peer(&address_cidr, &key_pair.public.to_base64())
            .await
        {
            self.undo_create(&tag, &address_cidr, dest_cidr, address, &key_pair, false, false)
                .await;
            return Err(e.into());
        }

        if let Err(e) = self.device.add_nat_rule(&tag, &address_cidr, dest_cidr).await {
            self.undo_create(&tag, &address_cidr, dest_cidr, address, &key_pair, true, false)
                .await;
            return Err(e.into());
        }

        let allowed_ips: Ipv4Net = match dest_cidr.parse() {
            Ok(net) => net,
            Err(_) => {
                self.undo_create(&tag, &address_cidr, dest_cidr, address, &key_pair, true, true)
                    .await;
                return Err(EngineError::InvalidAllowedIps(dest_cidr.to_string()));
            }
        };

        let row = NewVpnClient {
            user_id: id.user_id,
            group_id: id.group_id,
            ip_address: address_cidr.clone(),
            public_key: key_pair.public.to_base64(),
            private_key: key_pair.private.to_base64(),
            laboratory_cidr: allowed_ips.to_string(),
        };
        if let Err(e) = self.store.create_client(&row).await {
            self.undo_create(&tag, &address_cidr, dest_cidr, address, &key_pair, true, true)
                .await;
            if let StoreError::Conflict { .. } = e {
                // Lost a cross-process race; adopt the winner if its state
                // has reached our registry.
                if let Some(existing) = self.registry.get(&id).await {
                    return Ok(existing);
                }
            }
            return Err(e.into());
        }

        let peer = Peer {
            id,
            address,
            allowed_ips,
            dns: first_host(allowed_ips),
            private_key: key_pair.private,
            public_key: key_pair.public,
            banned: false,
            last_seen: 0,
        };

        self.registry.insert(peer.clone()).await;
        info!(%tag, address = %peer.address_cidr(), "peer provisioned");
        Ok(peer)
    }

    /// Reverts the side effects of a failed creation, most recent first.
    /// Compensation failures are logged and swallowed so the original
    /// error stays visible to the caller.
    #[allow(clippy::too_many_arguments)]
    async fn undo_create(
        &self,
        tag: &str,
        address_cidr: &str,
        dest_cidr: &str,
        address: Ipv4Addr,
        key_pair: &KeyPair,
        peer_added: bool,
        nat_added: bool,
    ) {
        if nat_added {
            if let Err(e) = self
                .device
                .delete_nat_rule(tag, address_cidr, dest_cidr)
                .await
            {
                warn!(%tag, error = %e, "rollback: deleting NAT rule failed");
            }
        }
        if peer_added {
            if let Err(e) = self
                .device
                .delete_peer(address_cidr, &key_pair.public.to_base64())
                .await
            {
                warn!(%tag, error = %e, "rollback: deleting peer failed");
            }
        }
        if let Err(e) = self.ipam.release_ip(address).await {
            warn!(%tag, error = %e, "rollback: releasing address failed");
        }
    }

    fn render_client(&self, peer: &Peer) -> Result<String, EngineError> {
        let keys = self.server_keys()?;
        Ok(render_client_config(&ClientConfigView {
            private_key: &peer.private_key.to_base64(),
            address: &peer.address_cidr(),
            dns: peer.dns,
            server_public_key: &keys.public.to_base64(),
            allowed_ips: &peer.allowed_ips.to_string(),
            endpoint: &self.settings.endpoint,
        }))
    }

    /// Tears down every peer matching the filter; returns the count.
    ///
    /// Device, filter and allocator state go first so a failed database
    /// write can be retried against an unchanged registry; the rows and
    /// the cache entries go only when every peer reverted cleanly.
    pub async fn delete_clients(
        &self,
        user_id: Option<Uuid>,
        group_id: Option<Uuid>,
    ) -> Result<u64, EngineError> {
        let peers = self.registry.filtered(user_id, group_id, |_| true).await;
        if peers.is_empty() {
            return Ok(0);
        }

        let mut errors = Vec::new();
        for peer in &peers {
            let tag = peer.tag();
            let address = peer.address_cidr();

            if let Err(e) = self
                .device
                .delete_peer(&address, &peer.public_key.to_base64())
                .await
            {
                errors.push(e.into());
                continue;
            }
            if let Err(e) = self
                .device
                .delete_nat_rule(&tag, &address, &peer.allowed_ips.to_string())
                .await
            {
                errors.push(e.into());
                continue;
            }
            if peer.banned {
                if let Err(e) = self.device.delete_block_rule(&tag, &address).await {
                    errors.push(e.into());
                    continue;
                }
            }
            if let Err(e) = self.ipam.release_ip(peer.address).await {
                errors.push(e.into());
                continue;
            }
        }

        if !errors.is_empty() {
            return Err(EngineError::aggregate(errors));
        }

        self.store.delete_clients(user_id, group_id).await?;

        let ids: Vec<PeerId> = peers.iter().map(|peer| peer.id).collect();
        self.registry.remove_all(&ids).await;

        info!(count = peers.len(), "peers deleted");
        Ok(peers.len() as u64)
    }

    /// Installs FORWARD DROP rules for every matching unbanned peer.
    pub async fn ban_clients(
        &self,
        user_id: Option<Uuid>,
        group_id: Option<Uuid>,
    ) -> Result<u64, EngineError> {
        let peers = self
            .registry
            .filtered(user_id, group_id, |peer| !peer.banned)
            .await;
        if peers.is_empty() {
            return Ok(0);
        }

        let mut errors = Vec::new();
        for peer in &peers {
            if let Err(e) = self
                .device
                .add_block_rule(&peer.tag(), &peer.address_cidr())
                .await
            {
                errors.push(e.into());
            }
        }
        if !errors.is_empty() {
            return Err(EngineError::aggregate(errors));
        }

        self.store.update_ban_status(user_id, group_id, true).await?;

        let ids: Vec<PeerId> = peers.iter().map(|peer| peer.id).collect();
        self.registry.set_banned(&ids, true).await;

        info!(count = peers.len(), "peers banned");
        Ok(peers.len() as u64)
    }

    /// Removes FORWARD DROP rules from every matching banned peer.
    pub async fn unban_clients(
        &self,
        user_id: Option<Uuid>,
        group_id: Option<Uuid>,
    ) -> Result<u64, EngineError> {
        let peers = self
            .registry
            .filtered(user_id, group_id, |peer| peer.banned)
            .await;
        if peers.is_empty() {
            return Ok(0);
        }

        let mut errors = Vec::new();
        for peer in &peers {
            if let Err(e) = self
                .device
                .delete_block_rule(&peer.tag(), &peer.address_cidr())
                .await
            {
                errors.push(e.into());
            }
        }
        if !errors.is_empty() {
            return Err(EngineError::aggregate(errors));
        }

        self.store
            .update_ban_status(user_id, group_id, false)
            .await?;

        let ids: Vec<PeerId> = peers.iter().map(|peer| peer.id).collect();
        self.registry.set_banned(&ids, false).await;

        info!(count = peers.len(), "peers unbanned");
        Ok(peers.len() as u64)
    }

    /// Snapshots matching peers with `last_seen` derived from the device
    /// handshake dump.
    pub async fn clients_with_handshake(
        &self,
        user_id: Option<Uuid>,
        group_id: Option<Uuid>,
    ) -> Result<Vec<Peer>, EngineError> {
        let mut peers = self.registry.filtered(user_id, group_id, |_| true).await;
        let handshakes = self.device.peers_last_handshake().await?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;

        for peer in &mut peers {
            if let Some(&epoch) = handshakes.get(&peer.public_key.to_base64()) {
                peer.last_seen = if epoch > 0 { now - epoch } else { -1 };
            }
        }

        Ok(peers)
    }
}

/// Rebuilds a peer from its persisted row.
fn peer_from_row(row: &VpnClientRow) -> Result<Peer, EngineError> {
    let id = PeerId::new(row.user_id, row.group_id);
    let corrupt = |reason: String| EngineError::CorruptRow {
        tag: id.to_string(),
        reason,
    };

    let address_net: Ipv4Net = row
        .ip_address
        .parse()
        .map_err(|_| corrupt(format!("bad tunnel address {:?}", row.ip_address)))?;
    let allowed_ips: Ipv4Net = row
        .laboratory_cidr
        .parse()
        .map_err(|_| corrupt(format!("bad laboratory CIDR {:?}", row.laboratory_cidr)))?;

    let private_key = labgate_keys::PrivateKey::from_base64(&row.private_key)
        .map_err(|e| corrupt(format!("bad private key: {e}")))?;
    let public_key = labgate_keys::PublicKey::from_base64(&row.public_key)
        .map_err(|e| corrupt(format!("bad public key: {e}")))?;

    Ok(Peer {
        id,
        address: address_net.addr(),
        allowed_ips,
        dns: first_host(allowed_ips),
        private_key,
        public_key,
        banned: row.banned,
        last_seen: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_from_row_round_trip() {
        let pair = KeyPair::generate();
        let row = VpnClientRow {
            user_id: Uuid::new_v4(),
            group_id: Uuid::new_v4(),
            ip_address: "10.128.0.7/32".to_string(),
            public_key: pair.public.to_base64(),
            private_key: pair.private.to_base64(),
            laboratory_cidr: "10.10.4.0/24".to_string(),
            banned: true,
        };

        let peer = peer_from_row(&row).expect("rebuild");
        assert_eq!(peer.address, Ipv4Addr::new(10, 128, 0, 7));
        assert_eq!(peer.dns, Ipv4Addr::new(10, 10, 4, 1));
        assert!(peer.banned);
        assert_eq!(peer.last_seen, 0);
        assert_eq!(peer.public_key, pair.public);
    }

    #[test]
    fn peer_from_row_rejects_garbage() {
        let pair = KeyPair::generate();
        let row = VpnClientRow {
            user_id: Uuid::new_v4(),
            group_id: Uuid::new_v4(),
            ip_address: "not-an-address".to_string(),
            public_key: pair.public.to_base64(),
            private_key: pair.private.to_base64(),
            laboratory_cidr: "10.10.4.0/24".to_string(),
            banned: false,
        };
        assert!(matches!(
            peer_from_row(&row),
            Err(EngineError::CorruptRow { .. })
        ));
    }
}
