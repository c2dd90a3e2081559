//! Relational storage for VPN peers and server key singletons.
//!
//! One row per provisioned peer in `vpn_client`, keyed by
//! `(user_id, group_id)`, plus two `platform_settings` singletons holding
//! the server's key pair. The store is the durable side of the peer
//! registry; the engine rehydrates from it on boot.

pub mod error;
mod memory;
mod postgres;

use uuid::Uuid;

pub use error::StoreError;
pub use memory::MemoryPeerStore;
pub use postgres::PostgresPeerStore;

/// A persisted peer row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpnClientRow {
    /// User half of the composite key.
    pub user_id: Uuid,
    /// Group half of the composite key.
    pub group_id: Uuid,
    /// Tunnel address in `A.B.C.D/32` form.
    pub ip_address: String,
    /// Peer public key, base64.
    pub public_key: String,
    /// Peer private key, base64.
    pub private_key: String,
    /// Destination lab CIDR the peer may reach.
    pub laboratory_cidr: String,
    /// Whether a FORWARD DROP rule is installed for this peer.
    pub banned: bool,
}

/// Parameters for inserting a new peer row (`banned` starts false).
#[derive(Debug, Clone)]
pub struct NewVpnClient {
    /// User half of the composite key.
    pub user_id: Uuid,
    /// Group half of the composite key.
    pub group_id: Uuid,
    /// Tunnel address in `A.B.C.D/32` form.
    pub ip_address: String,
    /// Peer public key, base64.
    pub public_key: String,
    /// Peer private key, base64.
    pub private_key: String,
    /// Destination lab CIDR the peer may reach.
    pub laboratory_cidr: String,
}

/// Storage contract for peer rows and the server key singletons.
///
/// Bulk filters follow the composite-key convention: a `None` half matches
/// any value, so `(None, None)` addresses every row. Callers own guarding
/// the all-`None` case.
#[allow(async_fn_in_trait)]
pub trait PeerStore {
    /// Inserts a peer row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the composite key is taken.
    async fn create_client(&self, client: &NewVpnClient) -> Result<(), StoreError>;

    /// Returns all peer rows in unspecified order.
    async fn list_clients(&self) -> Result<Vec<VpnClientRow>, StoreError>;

    /// Deletes rows matching the filters; returns the affected count.
    async fn delete_clients(
        &self,
        user_id: Option<Uuid>,
        group_id: Option<Uuid>,
    ) -> Result<u64, StoreError>;

    /// Updates the ban flag on matching rows; returns the affected count.
    async fn update_ban_status(
        &self,
        user_id: Option<Uuid>,
        group_id: Option<Uuid>,
        banned: bool,
    ) -> Result<u64, StoreError>;

    /// Reads the server private key singleton.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the row is absent.
    async fn get_server_private_key(&self) -> Result<String, StoreError>;

    /// Reads the server public key singleton.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the row is absent.
    async fn get_server_public_key(&self) -> Result<String, StoreError>;

    /// Writes the server private key singleton (insert-only).
    async fn set_server_private_key(&self, value: &str) -> Result<(), StoreError>;

    /// Writes the server public key singleton (insert-only).
    async fn set_server_public_key(&self, value: &str) -> Result<(), StoreError>;
}

impl<T: PeerStore> PeerStore for std::sync::Arc<T> {
    async fn create_client(&self, client: &NewVpnClient) -> Result<(), StoreError> {
        (**self).create_client(client).await
    }

    async fn list_clients(&self) -> Result<Vec<VpnClientRow>, StoreError> {
        (**self).list_clients().await
    }

    async fn delete_clients(
        &self,
        user_id: Option<Uuid>,
        group_id: Option<Uuid>,
    ) -> Result<u64, StoreError> {
        (**self).delete_clients(user_id, group_id).await
    }

    async fn update_ban_status(
        &self,
        user_id: Option<Uuid>,
        group_id: Option<Uuid>,
        banned: bool,
    ) -> Result<u64, StoreError> {
        (**self).update_ban_status(user_id, group_id, banned).await
    }

    async fn get_server_private_key(&self) -> Result<String, StoreError> {
        (**self).get_server_private_key().await
    }

    async fn get_server_public_key(&self) -> Result<String, StoreError> {
        (**self).get_server_public_key().await
    }

    async fn set_server_private_key(&self, value: &str) -> Result<(), StoreError> {
        (**self).set_server_private_key(value).await
    }

    async fn set_server_public_key(&self, value: &str) -> Result<(), StoreError> {
        (**self).set_server_public_key(value).await
    }
}
