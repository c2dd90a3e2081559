//! Error types for the lifecycle engine.

use labgate_device::DeviceError;
use labgate_ipam::IpamError;
use labgate_keys::KeyError;
use labgate_store::StoreError;
use thiserror::Error;

/// Errors raised by the lifecycle engine.
///
/// Leaf failures keep their own kind so the RPC layer can tell user-input
/// problems from internal ones without string matching. Bulk operations
/// accumulate per-peer failures into [`EngineError::Aggregate`] and never
/// touch the database when any accumulated.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The user ID is empty or not a UUID.
    #[error("invalid user ID")]
    InvalidUserId,

    /// The group ID is empty or not a UUID.
    #[error("invalid group ID")]
    InvalidGroupId,

    /// The destination CIDR is malformed.
    #[error("invalid allowed IPs: {0:?}")]
    InvalidAllowedIps(String),

    /// An operation needed the server key pair before `init_server` ran.
    #[error("server key pair is not initialized")]
    ServerNotInitialized,

    /// A stored key failed to decode.
    #[error(transparent)]
    Keys(#[from] KeyError),

    /// Address allocation failed.
    #[error(transparent)]
    Ipam(#[from] IpamError),

    /// The peer store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A device, route or filter operation failed.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// A persisted row could not be turned back into a peer.
    #[error("corrupt peer row {tag}: {reason}")]
    CorruptRow {
        /// The `{user_id}-{group_id}` tag of the row.
        tag: String,
        /// What failed to parse.
        reason: String,
    },

    /// Multiple per-peer failures from one bulk operation.
    #[error("{} peer operation(s) failed: [{}]", .0.len(), join(.0))]
    Aggregate(Vec<EngineError>),
}

impl EngineError {
    /// Wraps accumulated per-peer failures.
    #[must_use]
    pub fn aggregate(errors: Vec<EngineError>) -> Self {
        Self::Aggregate(errors)
    }

    /// True for errors caused by caller input rather than the platform.
    #[must_use]
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Self::InvalidUserId | Self::InvalidGroupId | Self::InvalidAllowedIps(_)
        )
    }
}

fn join(errors: &[EngineError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
