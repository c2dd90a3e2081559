//! Control of the kernel WireGuard device, routing table and filter tables.
//!
//! Everything here is an imperative, idempotent-in-intent operation against
//! process-wide kernel state, reached by shelling out to `wg`, `wg-quick`,
//! `ip` and `iptables`. The engine never inspects device state to make
//! decisions; rules are identified for deletion purely by their comment tag
//! (`"client {tag}"` / `"ban client {tag}"`), so a tag must never be
//! installed twice.

pub mod error;
mod fake;
mod render;
mod wg;

use std::collections::HashMap;

pub use error::DeviceError;
pub use fake::FakeDevice;
pub use render::{render_client_config, render_server_config, ClientConfigView, ServerConfigView};
pub use wg::WgDevice;

/// Interface name the daemon manages.
pub const NIC: &str = "wg0";

/// Directory `wg-quick` reads interface configs from.
pub const CONFIG_DIR: &str = "/etc/wireguard";

/// Persistent keepalive interval, seconds.
pub const KEEPALIVE: u16 = 25;

/// Operations against the WireGuard device and the packet filter.
///
/// `ip` arguments are tunnel addresses in `A.B.C.D/32` form; `tag` is the
/// peer's `"{user_id}-{group_id}"` identity string.
#[allow(async_fn_in_trait)]
pub trait DeviceControl {
    /// Registers a peer on the interface and routes its `/32` to it.
    async fn add_peer(&self, ip: &str, public_key: &str) -> Result<(), DeviceError>;

    /// Removes a peer and its route.
    async fn delete_peer(&self, ip: &str, public_key: &str) -> Result<(), DeviceError>;

    /// Installs the per-peer MASQUERADE rule towards the lab network.
    async fn add_nat_rule(&self, tag: &str, ip: &str, dest_cidr: &str) -> Result<(), DeviceError>;

    /// Removes the per-peer MASQUERADE rule.
    async fn delete_nat_rule(&self, tag: &str, ip: &str, dest_cidr: &str)
        -> Result<(), DeviceError>;

    /// Installs the FORWARD DROP rule banning a peer.
    async fn add_block_rule(&self, tag: &str, ip: &str) -> Result<(), DeviceError>;

    /// Removes the FORWARD DROP rule.
    async fn delete_block_rule(&self, tag: &str, ip: &str) -> Result<(), DeviceError>;

    /// Writes the interface configuration file, fsynced.
    async fn write_config(&self, contents: &str) -> Result<(), DeviceError>;

    /// Brings the interface up via `wg-quick`.
    async fn up_interface(&self) -> Result<(), DeviceError>;

    /// Returns `{public_key -> last_handshake_epoch_seconds}` for every
    /// peer on the device; 0 means the peer never completed a handshake.
    async fn peers_last_handshake(&self) -> Result<HashMap<String, i64>, DeviceError>;
}

impl<T: DeviceControl> DeviceControl for std::sync::Arc<T> {
    async fn add_peer(&self, ip: &str, public_key: &str) -> Result<(), DeviceError> {
        (**self).add_peer(ip, public_key).await
    }

    async fn delete_peer(&self, ip: &str, public_key: &str) -> Result<(), DeviceError> {
        (**self).delete_peer(ip, public_key).await
    }

    async fn add_nat_rule(&self, tag: &str, ip: &str, dest_cidr: &str) -> Result<(), DeviceError> {
        (**self).add_nat_rule(tag, ip, dest_cidr).await
    }

    async fn delete_nat_rule(
        &self,
        tag: &str,
        ip: &str,
        dest_cidr: &str,
    ) -> Result<(), DeviceError> {
        (**self).delete_nat_rule(tag, ip, dest_cidr).await
    }

    async fn add_block_rule(&self, tag: &str, ip: &str) -> Result<(), DeviceError> {
        (**self).add_block_rule(tag, ip).await
    }

    async fn delete_block_rule(&self, tag: &str, ip: &str) -> Result<(), DeviceError> {
        (**self).delete_block_rule(tag, ip).await
    }

    async fn write_config(&self, contents: &str) -> Result<(), DeviceError> {
        (**self).write_config(contents).await
    }

    async fn up_interface(&self) -> Result<(), DeviceError> {
        (**self).up_interface().await
    }

    async fn peers_last_handshake(&self) -> Result<HashMap<String, i64>, DeviceError> {
        (**self).peers_last_handshake().await
    }
}
