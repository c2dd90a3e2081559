//! In-process peer store with the same contract as the Postgres one.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use crate::error::StoreError;
use crate::{NewVpnClient, PeerStore, VpnClientRow};

/// Non-persistent store for tests and local development.
#[derive(Debug, Default)]
pub struct MemoryPeerStore {
    clients: Mutex<HashMap<(Uuid, Uuid), VpnClientRow>>,
    settings: Mutex<HashMap<&'static str, String>>,
}

impl MemoryPeerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored peer rows.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.lock().expect("store poisoned").len()
    }
}

fn matches(row: &VpnClientRow, user_id: Option<Uuid>, group_id: Option<Uuid>) -> bool {
    user_id.is_none_or(|u| row.user_id == u) && group_id.is_none_or(|g| row.group_id == g)
}

impl PeerStore for MemoryPeerStore {
    async fn create_client(&self, client: &NewVpnClient) -> Result<(), StoreError> {
        let mut clients = self.clients.lock().expect("store poisoned");
        let key = (client.user_id, client.group_id);
        if clients.contains_key(&key) {
            return Err(StoreError::Conflict {
                user_id: client.user_id,
                group_id: client.group_id,
            });
        }
        clients.insert(
            key,
            VpnClientRow {
                user_id: client.user_id,
                group_id: client.group_id,
                ip_address: client.ip_address.clone(),
                public_key: client.public_key.clone(),
                private_key: client.private_key.clone(),
                laboratory_cidr: client.laboratory_cidr.clone(),
                banned: false,
            },
        );
        Ok(())
    }

    async fn list_clients(&self) -> Result<Vec<VpnClientRow>, StoreError> {
        Ok(self
            .clients
            .lock()
            .expect("store poisoned")
            .values()
            .cloned()
            .collect())
    }

    async fn delete_clients(
        &self,
        user_id: Option<Uuid>,
        group_id: Option<Uuid>,
    ) -> Result<u64, StoreError> {
        let mut clients = self.clients.lock().expect("store poisoned");
        let before = clients.len();
        clients.retain(|_, row| !matches(row, user_id, group_id));
        Ok((before - clients.len()) as u64)
    }

    async fn update_ban_status(
        &self,
        user_id: Option<Uuid>,
        group_id: Option<Uuid>,
        banned: bool,
    ) -> Result<u64, StoreError> {
        let mut clients = self.clients.lock().expect("store poisoned");
        let mut affected = 0;
        for row in clients.values_mut() {
            if matches(row, user_id, group_id) {
                row.banned = banned;
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn get_server_private_key(&self) -> Result<String, StoreError> {
        self.settings
            .lock()
            .expect("store poisoned")
            .get("private_key")
            .cloned()
            .ok_or(StoreError::NotFound("vpn server private key"))
    }

    async fn get_server_public_key(&self) -> Result<String, StoreError> {
        self.settings
            .lock()
            .expect("store poisoned")
            .get("public_key")
            .cloned()
            .ok_or(StoreError::NotFound("vpn server public key"))
    }

    async fn set_server_private_key(&self, value: &str) -> Result<(), StoreError> {
        self.settings
            .lock()
            .expect("store poisoned")
            .insert("private_key", value.to_string());
        Ok(())
    }

    async fn set_server_public_key(&self, value: &str) -> Result<(), StoreError> {
        self.settings
            .lock()
            .expect("store poisoned")
            .insert("public_key", value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(user_id: Uuid, group_id: Uuid) -> NewVpnClient {
        NewVpnClient {
            user_id,
            group_id,
            ip_address: "10.128.0.2/32".to_string(),
            public_key: "pub".to_string(),
            private_key: "priv".to_string(),
            laboratory_cidr: "10.10.0.0/24".to_string(),
        }
    }

    #[tokio::test]
    async fn duplicate_composite_key_conflicts() {
        let store = MemoryPeerStore::new();
        let user = Uuid::new_v4();
        let group = Uuid::new_v4();
        store.create_client(&client(user, group)).await.expect("insert");
        let err = store.create_client(&client(user, group)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn delete_filters_by_either_half() {
        let store = MemoryPeerStore::new();
        let group = Uuid::new_v4();
        for _ in 0..3 {
            store
                .create_client(&client(Uuid::new_v4(), group))
                .await
                .expect("insert");
        }
        store
            .create_client(&client(Uuid::new_v4(), Uuid::new_v4()))
            .await
            .expect("insert");

        let affected = store.delete_clients(None, Some(group)).await.expect("delete");
        assert_eq!(affected, 3);
        assert_eq!(store.client_count(), 1);
    }

    #[tokio::test]
    async fn delete_with_no_filters_wipes_everything() {
        let store = MemoryPeerStore::new();
        for _ in 0..2 {
            store
                .create_client(&client(Uuid::new_v4(), Uuid::new_v4()))
                .await
                .expect("insert");
        }
        let affected = store.delete_clients(None, None).await.expect("delete");
        assert_eq!(affected, 2);
        assert_eq!(store.client_count(), 0);
    }

    #[tokio::test]
    async fn ban_update_reports_affected_rows() {
        let store = MemoryPeerStore::new();
        let user = Uuid::new_v4();
        store.create_client(&client(user, Uuid::new_v4())).await.expect("insert");
        store.create_client(&client(user, Uuid::new_v4())).await.expect("insert");

        let affected = store
            .update_ban_status(Some(user), None, true)
            .await
            .expect("update");
        assert_eq!(affected, 2);
        let rows = store.list_clients().await.expect("list");
        assert!(rows.iter().all(|row| row.banned));
    }

    #[tokio::test]
    async fn missing_server_keys_report_not_found() {
        let store = MemoryPeerStore::new();
        assert!(matches!(
            store.get_server_private_key().await,
            Err(StoreError::NotFound(_))
        ));

        store.set_server_private_key("secret").await.expect("set");
        assert_eq!(store.get_server_private_key().await.expect("get"), "secret");
    }
}
