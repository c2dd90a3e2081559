//! Core peer and server types.

use std::fmt;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use labgate_keys::{PrivateKey, PublicKey};
use uuid::Uuid;

/// Composite peer identity.
///
/// Its display form, `"{user_id}-{group_id}"`, is the tag embedded in
/// iptables comments; it is the only identity the device layer has for
/// deleting rules, so the engine guarantees at most one rule per tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId {
    /// Owning user.
    pub user_id: Uuid,
    /// Lab group the tunnel belongs to.
    pub group_id: Uuid,
}

impl PeerId {
    /// Creates a composite peer identity.
    #[must_use]
    pub const fn new(user_id: Uuid, group_id: Uuid) -> Self {
        Self { user_id, group_id }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.user_id, self.group_id)
    }
}

/// One provisioned VPN peer.
#[derive(Debug, Clone)]
pub struct Peer {
    /// Composite identity.
    pub id: PeerId,
    /// Tunnel address (the `/32` the peer lives at).
    pub address: Ipv4Addr,
    /// Destination lab network the peer may reach; governs NAT source
    /// selection, not the peer's own address.
    pub allowed_ips: Ipv4Net,
    /// First usable address of `allowed_ips`, handed out as DNS.
    pub dns: Ipv4Addr,
    /// Peer private key.
    pub private_key: PrivateKey,
    /// Peer public key.
    pub public_key: PublicKey,
    /// Whether a FORWARD DROP rule is installed.
    pub banned: bool,
    /// Seconds since the last device handshake. 0 = not observed on the
    /// device, -1 = on the device but never handshaken. Derived, never
    /// persisted.
    pub last_seen: i64,
}

impl Peer {
    /// The tunnel address in the `A.B.C.D/32` form used on every device,
    /// filter and database boundary.
    #[must_use]
    pub fn address_cidr(&self) -> String {
        format!("{}/32", self.address)
    }

    /// The iptables comment tag.
    #[must_use]
    pub fn tag(&self) -> String {
        self.id.to_string()
    }
}

/// Static VPN parameters the daemon is launched with.
#[derive(Debug, Clone)]
pub struct VpnSettings {
    /// Publicly reachable endpoint written into client configs.
    pub endpoint: String,
    /// Pool the server and all peers draw tunnel addresses from.
    pub cidr: Ipv4Net,
    /// WireGuard UDP listen port.
    pub port: u16,
}

impl VpnSettings {
    /// The server's own tunnel address: the first usable host of the pool.
    #[must_use]
    pub fn server_address(&self) -> Ipv4Addr {
        labgate_ipam::first_host(self.cidr)
    }
}
