//! Error types for address allocation.

use thiserror::Error;

/// Errors that can occur during address allocation.
#[derive(Debug, Error)]
pub enum IpamError {
    /// The pool has no free addresses left.
    #[error("address pool {cidr} is exhausted")]
    Exhausted {
        /// The parent CIDR of the pool.
        cidr: String,
    },

    /// The configured CIDR cannot be parsed or is not IPv4.
    #[error("invalid pool CIDR: {0}")]
    InvalidCidr(String),

    /// The address is not part of the pool or not currently allocated.
    #[error("address {0} is not allocated from this pool")]
    NotAllocated(String),

    /// The backing storage failed.
    #[error("ipam storage error: {0}")]
    Backend(#[from] sqlx::Error),
}
