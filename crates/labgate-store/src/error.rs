//! Error types for the peer store.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur in the peer store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A client row with the same composite key already exists.
    #[error("client {user_id}-{group_id} already exists")]
    Conflict {
        /// User half of the composite key.
        user_id: Uuid,
        /// Group half of the composite key.
        group_id: Uuid,
    },

    /// A requested singleton row is absent.
    #[error("{0} is not set")]
    NotFound(&'static str),

    /// The underlying database failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Applying embedded migrations failed.
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}
