//! In-process allocator with the same contract as the Postgres one.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Mutex;

use ipnet::Ipv4Net;

use crate::error::IpamError;
use crate::{first_host, IpAllocator};

/// Non-persistent allocator backed by a set of held addresses.
///
/// Used by tests and local development; allocations do not survive the
/// process.
#[derive(Debug)]
pub struct MemoryIpam {
    cidr: Ipv4Net,
    allocated: Mutex<HashSet<Ipv4Addr>>,
}

impl MemoryIpam {
    /// Creates an allocator over the given pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the CIDR cannot be parsed.
    pub fn new(cidr: &str) -> Result<Self, IpamError> {
        let cidr: Ipv4Net = cidr
            .parse()
            .map_err(|e: ipnet::AddrParseError| IpamError::InvalidCidr(e.to_string()))?;
        Ok(Self {
            cidr: cidr.trunc(),
            allocated: Mutex::new(HashSet::new()),
        })
    }

    /// Number of addresses currently held.
    #[must_use]
    pub fn allocated_count(&self) -> usize {
        self.allocated.lock().expect("ipam set poisoned").len()
    }
}

impl IpAllocator for MemoryIpam {
    async fn acquire_ip(&self, specific: Option<Ipv4Addr>) -> Result<Ipv4Addr, IpamError> {
        let mut allocated = self.allocated.lock().expect("ipam set poisoned");

        if let Some(ip) = specific {
            if !self.cidr.contains(&ip) {
                return Err(IpamError::InvalidCidr(format!(
                    "{ip} is not part of pool {}",
                    self.cidr
                )));
            }
            allocated.insert(ip);
            return Ok(ip);
        }

        let free = self
            .cidr
            .hosts()
            .find(|candidate| !allocated.contains(candidate));
        match free {
            Some(ip) => {
                allocated.insert(ip);
                Ok(ip)
            }
            None => Err(IpamError::Exhausted {
                cidr: self.cidr.to_string(),
            }),
        }
    }

    async fn release_ip(&self, ip: Ipv4Addr) -> Result<(), IpamError> {
        let mut allocated = self.allocated.lock().expect("ipam set poisoned");
        if allocated.remove(&ip) {
            Ok(())
        } else {
            Err(IpamError::NotAllocated(ip.to_string()))
        }
    }

    fn first_ip(&self) -> Ipv4Addr {
        first_host(self.cidr)
    }

    fn cidr(&self) -> Ipv4Net {
        self.cidr
    }
}
