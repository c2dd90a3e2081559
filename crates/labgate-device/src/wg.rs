//! Shell-backed implementation of [`DeviceControl`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::DeviceError;
use crate::{DeviceControl, CONFIG_DIR, KEEPALIVE, NIC};

/// Runs a command line through `/bin/sh -c`, capturing output.
///
/// Failures carry the exact command string; that string is the only
/// context an operator needs to replay the operation by hand.
async fn run(command: &str) -> Result<String, DeviceError> {
    debug!(%command, "running device command");

    let output = Command::new("/bin/sh")
        .arg("-c")
        .arg(command)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| DeviceError::Spawn {
            command: command.to_string(),
            source: e,
        })?;

    if !output.status.success() {
        return Err(DeviceError::CommandFailed {
            command: command.to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parses `wg show <nic> dump` output into `{public_key -> epoch_secs}`.
///
/// The first line describes the interface itself and is skipped; every
/// peer line has at least eight whitespace-separated fields with the
/// public key at index 1 and the last-handshake epoch at index 4.
fn parse_handshake_dump(output: &str) -> Result<HashMap<String, i64>, DeviceError> {
    let mut peers = HashMap::new();
    let mut parse_error = None;

    for line in output.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 8 {
            continue;
        }
        match fields[4].parse::<i64>() {
            Ok(epoch) => {
                peers.insert(fields[1].to_string(), epoch);
            }
            Err(_) => {
                parse_error = Some(DeviceError::DumpParse {
                    value: fields[4].to_string(),
                });
            }
        }
    }

    match parse_error {
        Some(err) => Err(err),
        None => Ok(peers),
    }
}

/// Device controller shelling out to `wg`, `wg-quick`, `ip` and `iptables`.
#[derive(Debug, Clone)]
pub struct WgDevice {
    config_dir: PathBuf,
}

impl WgDevice {
    /// Creates a controller writing configs to `/etc/wireguard`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config_dir: PathBuf::from(CONFIG_DIR),
        }
    }

    /// Creates a controller with a custom config directory.
    #[must_use]
    pub fn with_config_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: dir.into(),
        }
    }

    fn config_path(&self) -> PathBuf {
        self.config_dir.join(format!("{NIC}.conf"))
    }
}

impl Default for WgDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceControl for WgDevice {
    async fn add_peer(&self, ip: &str, public_key: &str) -> Result<(), DeviceError> {
        run(&format!(
            "wg set {NIC} peer {public_key} persistent-keepalive {KEEPALIVE} allowed-ips {ip}"
        ))
        .await?;
        run(&format!("ip -4 route add {ip} dev {NIC}")).await?;
        Ok(())
    }

    async fn delete_peer(&self, ip: &str, public_key: &str) -> Result<(), DeviceError> {
        run(&format!("wg set {NIC} peer {public_key} remove")).await?;
        run(&format!("ip -4 route delete {ip} dev {NIC}")).await?;
        Ok(())
    }

    async fn add_nat_rule(&self, tag: &str, ip: &str, dest_cidr: &str) -> Result<(), DeviceError> {
        run(&format!(
            "iptables -t nat -A POSTROUTING -o eth+ -s {ip} -d {dest_cidr} -j MASQUERADE \
             -m comment --comment \"client {tag}\""
        ))
        .await?;
        Ok(())
    }

    async fn delete_nat_rule(
        &self,
        tag: &str,
        ip: &str,
        dest_cidr: &str,
    ) -> Result<(), DeviceError> {
        run(&format!(
            "iptables -t nat -D POSTROUTING -o eth+ -s {ip} -d {dest_cidr} -j MASQUERADE \
             -m comment --comment \"client {tag}\""
        ))
        .await?;
        Ok(())
    }

    async fn add_block_rule(&self, tag: &str, ip: &str) -> Result<(), DeviceError> {
        run(&format!(
            "iptables -A FORWARD -s {ip} -j DROP -m comment --comment \"ban client {tag}\""
        ))
        .await?;
        Ok(())
    }

    async fn delete_block_rule(&self, tag: &str, ip: &str) -> Result<(), DeviceError> {
        run(&format!(
            "iptables -D FORWARD -s {ip} -j DROP -m comment --comment \"ban client {tag}\""
        ))
        .await?;
        Ok(())
    }

    async fn write_config(&self, contents: &str) -> Result<(), DeviceError> {
        let path = self.config_path();
        debug!(path = %path.display(), "writing interface config");

        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(contents.as_bytes()).await?;
        // wg-quick reads this file immediately after; make sure it hit disk.
        file.sync_all().await?;
        Ok(())
    }

    async fn up_interface(&self) -> Result<(), DeviceError> {
        run(&format!("wg-quick up {NIC}")).await?;
        Ok(())
    }

    async fn peers_last_handshake(&self) -> Result<HashMap<String, i64>, DeviceError> {
        let output = run(&format!("wg show {NIC} dump")).await?;
        parse_handshake_dump(&output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = "\
privEXAMPLEKEY=	pubSERVERKEY=	51820	off
pubPEERONEKEY=	(none)	10.0.0.11:54321	10.128.0.2/32	1717171717	1024	2048	25
pubPEERTWOKEY=	(none)	(none)	10.128.0.3/32	0	0	0	25
";

    #[test]
    fn dump_parses_peer_lines_only() {
        let peers = parse_handshake_dump(DUMP).expect("parse");
        assert_eq!(peers.len(), 2);
        assert_eq!(peers["pubPEERONEKEY="], 1_717_171_717);
        assert_eq!(peers["pubPEERTWOKEY="], 0);
    }

    #[test]
    fn dump_skips_short_lines() {
        let peers = parse_handshake_dump("interface line\nshort line\n").expect("parse");
        assert!(peers.is_empty());
    }

    #[test]
    fn dump_rejects_bad_timestamp() {
        let bad = "iface\nkey= (none) ep allowed notanumber 0 0 25\n";
        let err = parse_handshake_dump(bad).unwrap_err();
        assert!(matches!(err, DeviceError::DumpParse { .. }));
    }

    #[tokio::test]
    async fn config_write_lands_in_config_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let device = WgDevice::with_config_dir(dir.path());
        device.write_config("[Interface]\n").await.expect("write");

        let written = std::fs::read_to_string(dir.path().join("wg0.conf")).expect("read back");
        assert_eq!(written, "[Interface]\n");
    }

    #[tokio::test]
    async fn failed_command_carries_command_line() {
        let err = run("exit 3").await.unwrap_err();
        match err {
            DeviceError::CommandFailed {
                command, exit_code, ..
            } => {
                assert_eq!(command, "exit 3");
                assert_eq!(exit_code, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
