//! In-memory [`TransportBackend`] used by tests and demos.
//!
//! Registers are plain byte buffers keyed by address prefix; writes are
//! recorded and echoed into the buffer so a later read sees them.

use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard},
    time::Duration,
};
use tokio::sync::mpsc;

use crate::{
    error::{F1Error, Result},
    registers::BASE_UUID_SUFFIX,
    transport::{CharacteristicInfo, NotificationReceiver, TransportBackend},
    types::DiscoveredDevice,
};

#[derive(Default)]
struct MockState {
    devices: Vec<DiscoveredDevice>,
    hidden_scan_rounds: usize,
    scan_rounds: usize,
    connected: bool,
    connect_attempts: usize,
    connect_failures: usize,
    always_fail_connect: bool,
    registers: HashMap<String, Vec<u8>>,
    writes: Vec<(String, Vec<u8>)>,
    failing_writes: HashSet<String>,
    rejected_writes: Vec<String>,
    failing_unsubscribes: HashSet<String>,
    channels: HashMap<String, mpsc::UnboundedSender<Bytes>>,
    subscribe_counts: HashMap<String, usize>,
    unsubscribe_counts: HashMap<String, usize>,
    latency: Option<Duration>,
}

impl MockState {
    fn key_for(&self, address: &str) -> Option<String> {
        let address = address.to_ascii_lowercase();
        self.registers
            .keys()
            .find(|key| address.starts_with(key.as_str()))
            .cloned()
    }
}

fn normalize(address: &str) -> String {
    let address = address.to_ascii_lowercase();
    match address.find('-') {
        Some(idx) => address[..=idx].to_string(),
        None => address,
    }
}

/// Scriptable in-memory device
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    /// Create an empty mock device
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Make a device visible to scans
    #[must_use]
    pub fn with_device(self, address: &str, name: &str) -> Self {
        self.state()
            .devices
            .push(DiscoveredDevice::new(address, Some(name.to_string())));
        self
    }

    /// Preload a register value
    #[must_use]
    pub fn with_register(self, address: &str, value: &[u8]) -> Self {
        self.set_register(address, value);
        self
    }

    /// Set the bytes a register returns on read
    pub fn set_register(&self, address: &str, value: &[u8]) {
        self.state()
            .registers
            .insert(normalize(address), value.to_vec());
    }

    /// Current bytes of a register
    #[must_use]
    pub fn register(&self, address: &str) -> Option<Vec<u8>> {
        self.state().registers.get(&normalize(address)).cloned()
    }

    /// Hide devices for the first `rounds` scan rounds
    pub fn hide_for_scan_rounds(&self, rounds: usize) {
        self.state().hidden_scan_rounds = rounds;
    }

    /// Number of scan rounds run so far
    #[must_use]
    pub fn scan_rounds(&self) -> usize {
        self.state().scan_rounds
    }

    /// Fail the next `count` connect attempts
    pub fn fail_connects(&self, count: usize) {
        self.state().connect_failures = count;
    }

    /// Fail every connect attempt
    pub fn always_fail_connect(&self) {
        self.state().always_fail_connect = true;
    }

    /// Number of connect attempts so far
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.state().connect_attempts
    }

    /// Make writes to a register fail
    pub fn fail_writes_to(&self, address: &str) {
        self.state().failing_writes.insert(normalize(address));
    }

    /// Number of writes to a register rejected by [`MockBackend::fail_writes_to`]
    #[must_use]
    pub fn rejected_writes_to(&self, address: &str) -> usize {
        let key = normalize(address);
        self.state()
            .rejected_writes
            .iter()
            .filter(|addr| **addr == key)
            .count()
    }

    /// Make unsubscribing from a register fail
    pub fn fail_unsubscribe(&self, address: &str) {
        self.state().failing_unsubscribes.insert(normalize(address));
    }

    /// Delay every read and write
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = Some(latency);
    }

    /// Drop the link as if the device went out of range
    pub fn drop_link(&self) {
        let mut state = self.state();
        state.connected = false;
        state.channels.clear();
    }

    /// Every write so far, in order
    #[must_use]
    pub fn writes(&self) -> Vec<(String, Vec<u8>)> {
        self.state().writes.clone()
    }

    /// Payloads written to one register
    #[must_use]
    pub fn writes_to(&self, address: &str) -> Vec<Vec<u8>> {
        let key = normalize(address);
        self.state()
            .writes
            .iter()
            .filter(|(addr, _)| *addr == key)
            .map(|(_, data)| data.clone())
            .collect()
    }

    /// Whether a notification channel is open for a register
    #[must_use]
    pub fn is_subscribed(&self, address: &str) -> bool {
        self.state().channels.contains_key(&normalize(address))
    }

    /// How many times a notification channel was opened
    #[must_use]
    pub fn subscribe_count(&self, address: &str) -> usize {
        self.state()
            .subscribe_counts
            .get(&normalize(address))
            .copied()
            .unwrap_or(0)
    }

    /// How many times a notification channel was closed
    #[must_use]
    pub fn unsubscribe_count(&self, address: &str) -> usize {
        self.state()
            .unsubscribe_counts
            .get(&normalize(address))
            .copied()
            .unwrap_or(0)
    }

    /// Push a notification; returns false if nobody is subscribed
    pub fn notify(&self, address: &str, payload: &[u8]) -> bool {
        let state = self.state();
        state
            .channels
            .get(&normalize(address))
            .is_some_and(|tx| tx.send(Bytes::copy_from_slice(payload)).is_ok())
    }

    async fn delay(&self) {
        let latency = self.state().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn ensure_connected(state: &MockState) -> Result<()> {
        if state.connected {
            Ok(())
        } else {
            Err(F1Error::Transport("mock device is not connected".to_string()))
        }
    }
}

#[async_trait]
impl TransportBackend for MockBackend {
    async fn scan(&self, _window: Duration) -> Result<Vec<DiscoveredDevice>> {
        let mut state = self.state();
        state.scan_rounds += 1;
        if state.scan_rounds <= state.hidden_scan_rounds {
            return Ok(Vec::new());
        }
        Ok(state.devices.clone())
    }

    async fn connect(&self, address: &str) -> Result<()> {
        let mut state = self.state();
        state.connect_attempts += 1;
        let attempt = state.connect_attempts;
        if state.always_fail_connect || state.connect_failures > 0 {
            state.connect_failures = state.connect_failures.saturating_sub(1);
            return Err(F1Error::Transport(format!(
                "connect attempt {attempt} to {address} failed"
            )));
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.drop_link();
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.state().connected
    }

    async fn enumerate(&self) -> Result<Vec<CharacteristicInfo>> {
        let state = self.state();
        Self::ensure_connected(&state)?;
        let mut characteristics: Vec<_> = state
            .registers
            .keys()
            .map(|key| CharacteristicInfo {
                service: format!("0000fff0-{BASE_UUID_SUFFIX}"),
                uuid: format!("{key}{BASE_UUID_SUFFIX}"),
                readable: true,
            })
            .collect();
        characteristics.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        Ok(characteristics)
    }

    async fn read(&self, address: &str) -> Result<Vec<u8>> {
        self.delay().await;
        let state = self.state();
        Self::ensure_connected(&state)?;
        let key = state
            .key_for(address)
            .ok_or_else(|| F1Error::Transport(format!("characteristic {address} not found")))?;
        Ok(state.registers[&key].clone())
    }

    async fn write(&self, address: &str, data: &[u8]) -> Result<()> {
        self.delay().await;
        let mut state = self.state();
        Self::ensure_connected(&state)?;
        let key = normalize(address);
        if state.failing_writes.contains(&key) {
            state.rejected_writes.push(key);
            return Err(F1Error::Transport(format!("write to {address} rejected")));
        }
        state.writes.push((key.clone(), data.to_vec()));
        state.registers.insert(key, data.to_vec());
        Ok(())
    }

    async fn subscribe(&self, address: &str) -> Result<NotificationReceiver> {
        let mut state = self.state();
        Self::ensure_connected(&state)?;
        let key = normalize(address);
        let (tx, rx) = mpsc::unbounded_channel();
        state.channels.insert(key.clone(), tx);
        *state.subscribe_counts.entry(key).or_default() += 1;
        Ok(rx)
    }

    async fn unsubscribe(&self, address: &str) -> Result<()> {
        let mut state = self.state();
        let key = normalize(address);
        if state.failing_unsubscribes.contains(&key) {
            return Err(F1Error::Transport(format!("unsubscribe from {address} failed")));
        }
        state.channels.remove(&key);
        *state.unsubscribe_counts.entry(key).or_default() += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers;

    #[tokio::test]
    async fn test_connect_failures_are_scripted() {
        let mock = MockBackend::new();
        mock.fail_connects(2);
        assert!(mock.connect("AA").await.is_err());
        assert!(mock.connect("AA").await.is_err());
        assert!(mock.connect("AA").await.is_ok());
        assert_eq!(mock.connect_attempts(), 3);
        assert!(mock.is_connected().await);
    }

    #[tokio::test]
    async fn test_reads_resolve_full_uuids() {
        let mock = MockBackend::new().with_register(registers::BATTERY_LEVEL.address, &[42]);
        mock.connect("AA").await.unwrap();
        let uuid = registers::BATTERY_LEVEL.uuid().unwrap().to_string();
        assert_eq!(mock.read(&uuid).await.unwrap(), vec![42]);
        assert_eq!(mock.read(registers::BATTERY_LEVEL.address).await.unwrap(), vec![42]);
    }

    #[tokio::test]
    async fn test_writes_are_echoed() {
        let mock = MockBackend::new();
        mock.connect("AA").await.unwrap();
        mock.write("0000fff1-", &[1, 2, 3]).await.unwrap();
        assert_eq!(mock.register("0000fff1-"), Some(vec![1, 2, 3]));
        assert_eq!(mock.writes_to("0000fff1-"), vec![vec![1, 2, 3]]);
    }
}
