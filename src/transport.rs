use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::{error::Result, types::DiscoveredDevice};

/// Stream of raw notification payloads for one characteristic
pub type NotificationReceiver = mpsc::UnboundedReceiver<Bytes>;

/// A characteristic exposed by the connected device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    /// Owning service UUID
    pub service: String,
    /// Characteristic UUID
    pub uuid: String,
    /// Whether the characteristic advertises the read property
    pub readable: bool,
}

/// Low-level access to a single physical device.
///
/// Addresses passed to `read`, `write`, `subscribe` and `unsubscribe` are either
/// a register address prefix (see [`crate::registers`]) or a full
/// characteristic UUID; implementations resolve them by prefix.
#[async_trait]
pub trait TransportBackend: Send + Sync {
    /// Run one scan round of the given duration
    async fn scan(&self, window: Duration) -> Result<Vec<DiscoveredDevice>>;

    /// Attempt a single connection to the device at `address`
    async fn connect(&self, address: &str) -> Result<()>;

    /// Close the connection
    async fn disconnect(&self) -> Result<()>;

    /// Whether the link is currently up
    async fn is_connected(&self) -> bool;

    /// List the characteristics of the connected device
    async fn enumerate(&self) -> Result<Vec<CharacteristicInfo>>;

    /// Read raw bytes from a characteristic
    async fn read(&self, address: &str) -> Result<Vec<u8>>;

    /// Write raw bytes to a characteristic
    async fn write(&self, address: &str, data: &[u8]) -> Result<()>;

    /// Open the notification channel of a characteristic
    async fn subscribe(&self, address: &str) -> Result<NotificationReceiver>;

    /// Close the notification channel of a characteristic
    async fn unsubscribe(&self, address: &str) -> Result<()>;
}
