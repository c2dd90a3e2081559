//! Error types for device operations.

use thiserror::Error;

/// Errors raised while programming the device, routes or filter tables.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The command could not be started at all.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        /// The shell command line.
        command: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The command ran and exited non-zero.
    #[error("command `{command}` exited with {exit_code}: {stderr}")]
    CommandFailed {
        /// The shell command line.
        command: String,
        /// Exit code (-1 when killed by a signal).
        exit_code: i32,
        /// Captured standard error.
        stderr: String,
    },

    /// A handshake-dump line could not be parsed.
    #[error("unparsable handshake timestamp {value:?} in dump line")]
    DumpParse {
        /// The offending field value.
        value: String,
    },

    /// Writing the interface configuration failed.
    #[error("config write error: {0}")]
    Io(#[from] std::io::Error),
}
