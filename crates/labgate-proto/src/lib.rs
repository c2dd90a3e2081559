//! Generated wire types and service stubs for the control-plane RPC.
//!
//! The schema lives in `proto/wireguard.proto`; both the message structs
//! and the `Wireguard` service (server and client) are generated at build
//! time.

#[allow(clippy::pedantic)]
pub mod wireguard {
    tonic::include_proto!("wireguard");
}

pub use wireguard::wireguard_client::WireguardClient;
pub use wireguard::wireguard_server::{Wireguard, WireguardServer};
pub use wireguard::{
    Client, ClientConfigRequest, ClientsAffectedResponse, ClientsRequest, ClientsResponse,
    ConfigResponse, EmptyRequest, EmptyResponse, MonitoringResponse,
};
