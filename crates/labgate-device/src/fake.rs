//! In-memory device for tests.
//!
//! Mirrors the observable behavior of the shell-backed controller: rules
//! append like iptables chains, deleting an absent rule or route fails,
//! and handshake timestamps can be injected per public key.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::DeviceError;
use crate::DeviceControl;

#[derive(Debug, Default)]
struct FakeState {
    /// public key -> tunnel address (`/32`).
    peers: HashMap<String, String>,
    /// Installed `/32` routes.
    routes: Vec<String>,
    /// `(tag, ip, dest_cidr)` NAT rules, in chain order.
    nat_rules: Vec<(String, String, String)>,
    /// `(tag, ip)` FORWARD DROP rules, in chain order.
    block_rules: Vec<(String, String)>,
    /// Injected handshake epochs by public key.
    handshakes: HashMap<String, i64>,
    /// Configs written, newest last.
    configs: Vec<String>,
    up_count: usize,
    /// Operations forced to fail (by method name).
    failing: HashMap<String, usize>,
}

/// Fake [`DeviceControl`] recording every operation.
#[derive(Debug, Default)]
pub struct FakeDevice {
    state: Mutex<FakeState>,
}

impl FakeDevice {
    /// Creates an empty fake device.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn command_failed(op: &str) -> DeviceError {
        DeviceError::CommandFailed {
            command: format!("fake {op}"),
            exit_code: 1,
            stderr: "injected failure".to_string(),
        }
    }

    /// Makes the named operation fail `times` times.
    pub fn fail(&self, op: &str, times: usize) {
        self.state
            .lock()
            .expect("fake device poisoned")
            .failing
            .insert(op.to_string(), times);
    }

    fn check_failure(state: &mut FakeState, op: &str) -> Result<(), DeviceError> {
        if let Some(remaining) = state.failing.get_mut(op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Self::command_failed(op));
            }
        }
        Ok(())
    }

    /// Injects a last-handshake epoch for a public key.
    pub fn set_handshake(&self, public_key: &str, epoch: i64) {
        self.state
            .lock()
            .expect("fake device poisoned")
            .handshakes
            .insert(public_key.to_string(), epoch);
    }

    /// Public keys currently registered on the device.
    #[must_use]
    pub fn peer_keys(&self) -> Vec<String> {
        let state = self.state.lock().expect("fake device poisoned");
        state.peers.keys().cloned().collect()
    }

    /// Address registered for a public key, if any.
    #[must_use]
    pub fn peer_address(&self, public_key: &str) -> Option<String> {
        let state = self.state.lock().expect("fake device poisoned");
        state.peers.get(public_key).cloned()
    }

    /// Number of NAT rules carrying the tag.
    #[must_use]
    pub fn nat_rule_count(&self, tag: &str) -> usize {
        let state = self.state.lock().expect("fake device poisoned");
        state.nat_rules.iter().filter(|(t, _, _)| t == tag).count()
    }

    /// Total number of NAT rules.
    #[must_use]
    pub fn total_nat_rules(&self) -> usize {
        self.state.lock().expect("fake device poisoned").nat_rules.len()
    }

    /// Number of DROP rules carrying the tag.
    #[must_use]
    pub fn block_rule_count(&self, tag: &str) -> usize {
        let state = self.state.lock().expect("fake device poisoned");
        state.block_rules.iter().filter(|(t, _)| t == tag).count()
    }

    /// Number of installed routes.
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.state.lock().expect("fake device poisoned").routes.len()
    }

    /// The most recently written config, if any.
    #[must_use]
    pub fn last_config(&self) -> Option<String> {
        let state = self.state.lock().expect("fake device poisoned");
        state.configs.last().cloned()
    }

    /// How many times the interface was brought up.
    #[must_use]
    pub fn up_count(&self) -> usize {
        self.state.lock().expect("fake device poisoned").up_count
    }
}

impl DeviceControl for FakeDevice {
    async fn add_peer(&self, ip: &str, public_key: &str) -> Result<(), DeviceError> {
        let mut state = self.state.lock().expect("fake device poisoned");
        Self::check_failure(&mut state, "add_peer")?;
        state.peers.insert(public_key.to_string(), ip.to_string());
        state.routes.push(ip.to_string());
        Ok(())
    }

    async fn delete_peer(&self, ip: &str, public_key: &str) -> Result<(), DeviceError> {
        let mut state = self.state.lock().expect("fake device poisoned");
        Self::check_failure(&mut state, "delete_peer")?;
        // `wg set ... remove` tolerates unknown peers; the route delete
        // does not.
        state.peers.remove(public_key);
        match state.routes.iter().position(|route| route == ip) {
            Some(index) => {
                state.routes.remove(index);
                Ok(())
            }
            None => Err(Self::command_failed("delete_peer route")),
        }
    }

    async fn add_nat_rule(&self, tag: &str, ip: &str, dest_cidr: &str) -> Result<(), DeviceError> {
        let mut state = self.state.lock().expect("fake device poisoned");
        Self::check_failure(&mut state, "add_nat_rule")?;
        state
            .nat_rules
            .push((tag.to_string(), ip.to_string(), dest_cidr.to_string()));
        Ok(())
    }

    async fn delete_nat_rule(
        &self,
        tag: &str,
        ip: &str,
        dest_cidr: &str,
    ) -> Result<(), DeviceError> {
        let mut state = self.state.lock().expect("fake device poisoned");
        Self::check_failure(&mut state, "delete_nat_rule")?;
        let position = state
            .nat_rules
            .iter()
            .position(|(t, i, d)| t == tag && i == ip && d == dest_cidr);
        match position {
            Some(index) => {
                state.nat_rules.remove(index);
                Ok(())
            }
            None => Err(Self::command_failed("delete_nat_rule")),
        }
    }

    async fn add_block_rule(&self, tag: &str, ip: &str) -> Result<(), DeviceError> {
        let mut state = self.state.lock().expect("fake device poisoned");
        Self::check_failure(&mut state, "add_block_rule")?;
        state.block_rules.push((tag.to_string(), ip.to_string()));
        Ok(())
    }

    async fn delete_block_rule(&self, tag: &str, ip: &str) -> Result<(), DeviceError> {
        let mut state = self.state.lock().expect("fake device poisoned");
        Self::check_failure(&mut state, "delete_block_rule")?;
        let position = state
            .block_rules
            .iter()
            .position(|(t, i)| t == tag && i == ip);
        match position {
            Some(index) => {
                state.block_rules.remove(index);
                Ok(())
            }
            None => Err(Self::command_failed("delete_block_rule")),
        }
    }

    async fn write_config(&self, contents: &str) -> Result<(), DeviceError> {
        let mut state = self.state.lock().expect("fake device poisoned");
        Self::check_failure(&mut state, "write_config")?;
        state.configs.push(contents.to_string());
        Ok(())
    }

    async fn up_interface(&self) -> Result<(), DeviceError> {
        let mut state = self.state.lock().expect("fake device poisoned");
        Self::check_failure(&mut state, "up_interface")?;
        state.up_count += 1;
        Ok(())
    }

    async fn peers_last_handshake(&self) -> Result<HashMap<String, i64>, DeviceError> {
        let mut state = self.state.lock().expect("fake device poisoned");
        Self::check_failure(&mut state, "peers_last_handshake")?;
        // Only peers present on the device show up in the dump.
        let dump = state
            .peers
            .keys()
            .map(|key| {
                let epoch = state.handshakes.get(key).copied().unwrap_or(0);
                (key.clone(), epoch)
            })
            .collect();
        Ok(dump)
    }
}
