//! Daemon configuration, read from flags or their environment variables.

use std::net::SocketAddr;

use clap::{Parser, ValueEnum};
use labgate_engine::VpnSettings;

/// Deployment environment, controls log verbosity defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Environment {
    /// Developer machine.
    Local,
    /// Staging cluster.
    Stage,
    /// Production cluster.
    Production,
}

impl Environment {
    /// Default tracing filter when `RUST_LOG` is unset.
    #[must_use]
    pub fn default_log_filter(self) -> &'static str {
        match self {
            Self::Production => "info",
            Self::Local | Self::Stage => "debug",
        }
    }
}

/// labgate control-plane daemon.
#[derive(Debug, Parser)]
#[command(name = "labgated", version, about)]
pub struct Config {
    /// Deployment environment.
    #[arg(long, env = "ENV", value_enum, default_value = "production")]
    pub environment: Environment,

    /// Publicly reachable WireGuard endpoint written into client configs.
    #[arg(long, env = "VPN_ENDPOINT")]
    pub vpn_endpoint: String,

    /// Pool the server and all peers draw tunnel addresses from.
    #[arg(long, env = "VPN_CIDR", default_value = "10.128.0.0/16")]
    pub vpn_cidr: String,

    /// WireGuard UDP listen port.
    #[arg(long, env = "VPN_PORT", default_value_t = 51820)]
    pub vpn_port: u16,

    /// gRPC bind host.
    #[arg(long, env = "WG_GRPC_HOST", default_value = "0.0.0.0")]
    pub grpc_host: String,

    /// gRPC bind port.
    #[arg(long, env = "WG_GRPC_PORT", default_value_t = 5454)]
    pub grpc_port: u16,

    /// Expected `authKey` claim value in bearer tokens.
    #[arg(long, env = "WG_GRPC_AUTH_KEY")]
    pub grpc_auth_key: String,

    /// HMAC key bearer tokens are signed with.
    #[arg(long, env = "WG_GRPC_SIGN_KEY")]
    pub grpc_sign_key: String,

    /// Serve gRPC over mutual TLS.
    #[arg(long, env = "WG_GRPC_TLS_ENABLED", default_value_t = false)]
    pub grpc_tls_enabled: bool,

    /// Server certificate path (PEM).
    #[arg(long, env = "WG_GRPC_TLS_CERT", default_value = "")]
    pub grpc_tls_cert: String,

    /// Server certificate key path (PEM).
    #[arg(long, env = "WG_GRPC_TLS_KEY", default_value = "")]
    pub grpc_tls_key: String,

    /// CA bundle client certificates are verified against (PEM).
    #[arg(long, env = "WG_GRPC_TLS_CA", default_value = "")]
    pub grpc_tls_ca: String,

    /// Postgres host.
    #[arg(long, env = "POSTGRES_HOSTNAME")]
    pub postgres_host: String,

    /// Postgres port.
    #[arg(long, env = "POSTGRES_PORT", default_value_t = 5432)]
    pub postgres_port: u16,

    /// Postgres user.
    #[arg(long, env = "POSTGRES_USER")]
    pub postgres_user: String,

    /// Postgres password.
    #[arg(long, env = "POSTGRES_PASSWORD")]
    pub postgres_password: String,

    /// Postgres database name.
    #[arg(long, env = "POSTGRES_DB")]
    pub postgres_db: String,

    /// Postgres SSL mode.
    #[arg(long, env = "POSTGRES_SSL_MODE", default_value = "require")]
    pub postgres_ssl_mode: String,
}

impl Config {
    /// Postgres connection URL.
    #[must_use]
    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.postgres_user,
            self.postgres_password,
            self.postgres_host,
            self.postgres_port,
            self.postgres_db,
            self.postgres_ssl_mode,
        )
    }

    /// The gRPC bind address.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot be parsed.
    pub fn grpc_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.grpc_host, self.grpc_port).parse()
    }

    /// The VPN settings handed to the engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool CIDR cannot be parsed.
    pub fn vpn_settings(&self) -> Result<VpnSettings, ipnet::AddrParseError> {
        Ok(VpnSettings {
            endpoint: self.vpn_endpoint.clone(),
            cidr: self.vpn_cidr.parse()?,
            port: self.vpn_port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config::parse_from([
            "labgated",
            "--vpn-endpoint",
            "lab.example.org:51820",
            "--grpc-auth-key",
            "auth",
            "--grpc-sign-key",
            "sign",
            "--postgres-host",
            "db",
            "--postgres-user",
            "labgate",
            "--postgres-password",
            "secret",
            "--postgres-db",
            "labgate",
        ])
    }

    #[test]
    fn defaults_match_deployment_contract() {
        let config = base_config();
        assert_eq!(config.vpn_cidr, "10.128.0.0/16");
        assert_eq!(config.vpn_port, 51820);
        assert_eq!(config.grpc_port, 5454);
        assert_eq!(config.postgres_ssl_mode, "require");
        assert!(matches!(config.environment, Environment::Production));
    }

    #[test]
    fn database_url_carries_ssl_mode() {
        let config = base_config();
        assert_eq!(
            config.database_url(),
            "postgres://labgate:secret@db:5432/labgate?sslmode=require"
        );
    }

    #[test]
    fn grpc_addr_parses() {
        let config = base_config();
        assert_eq!(config.grpc_addr().expect("addr").port(), 5454);
    }
}
