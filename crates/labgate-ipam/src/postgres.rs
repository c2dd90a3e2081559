//! Postgres-backed allocator.
//!
//! Bookkeeping lives in a single `ipam_allocation` table keyed by
//! `(cidr, ip)`; the unique key makes concurrent acquisition race-safe
//! (the insert that loses simply retries with a fresh view).

use std::collections::HashSet;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use sqlx::PgPool;
use tracing::debug;

use crate::error::IpamError;
use crate::{first_host, IpAllocator};

const CREATE_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS ipam_allocation (
    cidr TEXT NOT NULL,
    ip   TEXT NOT NULL,
    PRIMARY KEY (cidr, ip)
)";

/// Durable allocator over a Postgres table.
#[derive(Debug, Clone)]
pub struct PostgresIpam {
    pool: PgPool,
    cidr: Ipv4Net,
}

impl PostgresIpam {
    /// Binds an allocator to a pool CIDR, creating its table if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the CIDR is malformed or the table cannot be
    /// created.
    pub async fn connect(pool: PgPool, cidr: &str) -> Result<Self, IpamError> {
        let cidr: Ipv4Net = cidr
            .parse()
            .map_err(|e: ipnet::AddrParseError| IpamError::InvalidCidr(e.to_string()))?;
        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        debug!(%cidr, "ipam allocator bound");
        Ok(Self {
            pool,
            cidr: cidr.trunc(),
        })
    }

    async fn allocated_set(&self) -> Result<HashSet<Ipv4Addr>, IpamError> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT ip FROM ipam_allocation WHERE cidr = $1")
                .bind(self.cidr.to_string())
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.iter().filter_map(|ip| ip.parse().ok()).collect())
    }

    /// Inserts the address, reporting whether this call took it.
    async fn try_insert(&self, ip: Ipv4Addr) -> Result<bool, IpamError> {
        let result =
            sqlx::query("INSERT INTO ipam_allocation (cidr, ip) VALUES ($1, $2) ON CONFLICT DO NOTHING")
                .bind(self.cidr.to_string())
                .bind(ip.to_string())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }
}

impl IpAllocator for PostgresIpam {
    async fn acquire_ip(&self, specific: Option<Ipv4Addr>) -> Result<Ipv4Addr, IpamError> {
        if let Some(ip) = specific {
            if !self.cidr.contains(&ip) {
                return Err(IpamError::InvalidCidr(format!(
                    "{ip} is not part of pool {}",
                    self.cidr
                )));
            }
            // Losing the insert means the address is already held, which is
            // exactly the idempotent-reservation contract.
            self.try_insert(ip).await?;
            return Ok(ip);
        }

        loop {
            let allocated = self.allocated_set().await?;
            let candidate = self
                .cidr
                .hosts()
                .find(|host| !allocated.contains(host))
                .ok_or_else(|| IpamError::Exhausted {
                    cidr: self.cidr.to_string(),
                })?;

            if self.try_insert(candidate).await? {
                debug!(ip = %candidate, "acquired address");
                return Ok(candidate);
            }
            // Another writer took the candidate between the scan and the
            // insert; rescan.
        }
    }

    async fn release_ip(&self, ip: Ipv4Addr) -> Result<(), IpamError> {
        let result = sqlx::query("DELETE FROM ipam_allocation WHERE cidr = $1 AND ip = $2")
            .bind(self.cidr.to_string())
            .bind(ip.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(IpamError::NotAllocated(ip.to_string()));
        }
        debug!(%ip, "released address");
        Ok(())
    }

    fn first_ip(&self) -> Ipv4Addr {
        first_host(self.cidr)
    }

    fn cidr(&self) -> Ipv4Net {
        self.cidr
    }
}
