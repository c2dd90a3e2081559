//! Persistent single-IP allocation over a parent CIDR.
//!
//! The control plane hands every peer one tunnel address out of a fixed
//! IPv4 pool. Allocations must survive process restarts, so the production
//! allocator keeps its bookkeeping in Postgres; [`MemoryIpam`] implements
//! the same contract in-process for tests and local runs.

pub mod error;
mod memory;
mod postgres;

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

pub use error::IpamError;
pub use memory::MemoryIpam;
pub use postgres::PostgresIpam;

/// Allocator for single IPv4 addresses out of a fixed parent CIDR.
#[allow(async_fn_in_trait)]
pub trait IpAllocator {
    /// Acquires an address from the pool.
    ///
    /// With `specific = None`, allocates the first free usable host.
    /// With `specific = Some(ip)`, reserves that address; reserving an
    /// address this pool already holds is a success (idempotent
    /// re-reservation of the server address on restart).
    async fn acquire_ip(&self, specific: Option<Ipv4Addr>) -> Result<Ipv4Addr, IpamError>;

    /// Releases a previously acquired address (no mask, plain address).
    async fn release_ip(&self, ip: Ipv4Addr) -> Result<(), IpamError>;

    /// The deterministic first usable address of the pool (network + 1).
    fn first_ip(&self) -> Ipv4Addr;

    /// The parent CIDR this pool allocates from.
    fn cidr(&self) -> Ipv4Net;
}

impl<T: IpAllocator> IpAllocator for std::sync::Arc<T> {
    async fn acquire_ip(&self, specific: Option<Ipv4Addr>) -> Result<Ipv4Addr, IpamError> {
        (**self).acquire_ip(specific).await
    }

    async fn release_ip(&self, ip: Ipv4Addr) -> Result<(), IpamError> {
        (**self).release_ip(ip).await
    }

    fn first_ip(&self) -> Ipv4Addr {
        (**self).first_ip()
    }

    fn cidr(&self) -> Ipv4Net {
        (**self).cidr()
    }
}

/// Returns the first usable host of a network: the network address plus one.
#[must_use]
pub fn first_host(net: Ipv4Net) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(net.network()).wrapping_add(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn first_host_of_common_pools() {
        let net: Ipv4Net = "10.128.0.0/16".parse().expect("valid cidr");
        assert_eq!(first_host(net), Ipv4Addr::new(10, 128, 0, 1));

        let net: Ipv4Net = "10.10.0.0/24".parse().expect("valid cidr");
        assert_eq!(first_host(net), Ipv4Addr::new(10, 10, 0, 1));
    }

    proptest! {
        #[test]
        fn first_host_is_network_plus_one(a in 0u8..=255, b in 0u8..=255, prefix in 8u8..=24) {
            let base = Ipv4Addr::new(a, b, 0, 0);
            let net = Ipv4Net::new(base, prefix).expect("valid prefix").trunc();
            let first = first_host(net);
            prop_assert_eq!(u32::from(first), u32::from(net.network()) + 1);
            prop_assert!(net.contains(&first));
        }
    }
}
