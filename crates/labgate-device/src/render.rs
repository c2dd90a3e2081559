//! WireGuard configuration rendering.
//!
//! Plain field substitution into the two interface templates. The server
//! config keeps `SaveConfig = true`, so the kernel may rewrite the file at
//! runtime; the rendered text is only the boot-time seed.

use std::fmt::Write as _;
use std::net::Ipv4Addr;

/// Fields substituted into the server template.
#[derive(Debug, Clone, Copy)]
pub struct ServerConfigView<'a> {
    /// The server's own tunnel address (no mask).
    pub address: Ipv4Addr,
    /// UDP listen port.
    pub port: u16,
    /// Server private key, base64.
    pub private_key: &'a str,
}

/// Fields substituted into the client template.
#[derive(Debug, Clone, Copy)]
pub struct ClientConfigView<'a> {
    /// Peer private key, base64.
    pub private_key: &'a str,
    /// Peer tunnel address in `A.B.C.D/32` form.
    pub address: &'a str,
    /// First usable address of the lab network, used as DNS.
    pub dns: Ipv4Addr,
    /// Server public key, base64.
    pub server_public_key: &'a str,
    /// Destination lab CIDR the peer may reach.
    pub allowed_ips: &'a str,
    /// Publicly reachable server endpoint.
    pub endpoint: &'a str,
}

/// Renders the server-side interface config.
#[must_use]
pub fn render_server_config(view: &ServerConfigView<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "[Interface]");
    let _ = writeln!(out, "Address = {}", view.address);
    let _ = writeln!(out, "ListenPort = {}", view.port);
    let _ = writeln!(out, "PrivateKey = {}", view.private_key);
    let _ = writeln!(out, "SaveConfig = true");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "PostUp = iptables -A FORWARD -i %i -j ACCEPT; iptables -A FORWARD -o %i -j ACCEPT;"
    );
    let _ = writeln!(out, "PostUp = sysctl -w -q net.ipv4.ip_forward=1;");
    let _ = writeln!(
        out,
        "PostDown = iptables -D FORWARD -i %i -j ACCEPT; iptables -D FORWARD -o %i -j ACCEPT;"
    );
    let _ = writeln!(out, "PostDown = sysctl -w -q net.ipv4.ip_forward=0;");
    out
}

/// Renders a client tunnel config.
#[must_use]
pub fn render_client_config(view: &ClientConfigView<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "[Interface]");
    let _ = writeln!(out, "PrivateKey = {}", view.private_key);
    let _ = writeln!(out, "Address = {}", view.address);
    let _ = writeln!(out, "DNS = {}, 1.1.1.1", view.dns);
    let _ = writeln!(out);
    let _ = writeln!(out, "[Peer]");
    let _ = writeln!(out, "PublicKey = {}", view.server_public_key);
    let _ = writeln!(out, "AllowedIPs = {}", view.allowed_ips);
    let _ = writeln!(out, "Endpoint = {}", view.endpoint);
    let _ = writeln!(out, "PersistentKeepalive = 25");
    out
}
