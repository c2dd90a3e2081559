//! Mutual-TLS setup for the RPC listener.

use tonic::transport::{Certificate, Identity, ServerTlsConfig};

use crate::config::Config;

/// Builds the server TLS configuration: our identity plus the CA that
/// client certificates must chain to.
///
/// # Errors
///
/// Returns an error if any of the PEM files cannot be read.
pub fn server_tls_config(config: &Config) -> Result<ServerTlsConfig, std::io::Error> {
    let cert = std::fs::read_to_string(&config.grpc_tls_cert)?;
    let key = std::fs::read_to_string(&config.grpc_tls_key)?;
    let ca = std::fs::read_to_string(&config.grpc_tls_ca)?;

    Ok(ServerTlsConfig::new()
        .identity(Identity::from_pem(cert, key))
        .client_ca_root(Certificate::from_pem(ca)))
}
