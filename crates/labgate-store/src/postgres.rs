//! Postgres implementation of the peer store.

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::{NewVpnClient, PeerStore, VpnClientRow};

const SETTINGS_TYPE: &str = "vpn";
const PRIVATE_KEY: &str = "private_key";
const PUBLIC_KEY: &str = "public_key";

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Peer store over a shared Postgres pool.
#[derive(Debug, Clone)]
pub struct PostgresPeerStore {
    pool: PgPool,
}

impl PostgresPeerStore {
    /// Wraps an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails to apply.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        debug!("peer store migrations applied");
        Ok(())
    }

    async fn get_setting(&self, key: &str, what: &'static str) -> Result<String, StoreError> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM platform_settings WHERE type = $1 AND key = $2")
                .bind(SETTINGS_TYPE)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        value.ok_or(StoreError::NotFound(what))
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO platform_settings (type, key, value) VALUES ($1, $2, $3)")
            .bind(SETTINGS_TYPE)
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_client(row: &PgRow) -> VpnClientRow {
    VpnClientRow {
        user_id: row.get("user_id"),
        group_id: row.get("group_id"),
        ip_address: row.get("ip_address"),
        public_key: row.get("public_key"),
        private_key: row.get("private_key"),
        laboratory_cidr: row.get("laboratory_cidr"),
        banned: row.get("banned"),
    }
}

impl PeerStore for PostgresPeerStore {
    async fn create_client(&self, client: &NewVpnClient) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO vpn_client \
             (user_id, group_id, ip_address, public_key, private_key, laboratory_cidr, banned) \
             VALUES ($1, $2, $3, $4, $5, $6, FALSE)",
        )
        .bind(client.user_id)
        .bind(client.group_id)
        .bind(&client.ip_address)
        .bind(&client.public_key)
        .bind(&client.private_key)
        .bind(&client.laboratory_cidr)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::Conflict {
                    user_id: client.user_id,
                    group_id: client.group_id,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_clients(&self) -> Result<Vec<VpnClientRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT user_id, group_id, ip_address, public_key, private_key, laboratory_cidr, banned \
             FROM vpn_client",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_client).collect())
    }

    async fn delete_clients(
        &self,
        user_id: Option<Uuid>,
        group_id: Option<Uuid>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM vpn_client \
             WHERE (user_id = $1 OR $1::uuid IS NULL) AND (group_id = $2 OR $2::uuid IS NULL)",
        )
        .bind(user_id)
        .bind(group_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn update_ban_status(
        &self,
        user_id: Option<Uuid>,
        group_id: Option<Uuid>,
        banned: bool,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE vpn_client SET banned = $3 \
             WHERE (user_id = $1 OR $1::uuid IS NULL) AND (group_id = $2 OR $2::uuid IS NULL)",
        )
        .bind(user_id)
        .bind(group_id)
        .bind(banned)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn get_server_private_key(&self) -> Result<String, StoreError> {
        self.get_setting(PRIVATE_KEY, "vpn server private key").await
    }

    async fn get_server_public_key(&self) -> Result<String, StoreError> {
        self.get_setting(PUBLIC_KEY, "vpn server public key").await
    }

    async fn set_server_private_key(&self, value: &str) -> Result<(), StoreError> {
        self.set_setting(PRIVATE_KEY, value).await
    }

    async fn set_server_public_key(&self, value: &str) -> Result<(), StoreError> {
        self.set_setting(PUBLIC_KEY, value).await
    }
}
