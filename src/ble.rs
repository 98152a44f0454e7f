use async_trait::async_trait;
use btleplug::{
    api::{
        CharPropFlags, Central, Characteristic, Manager as _, Peripheral as _, ScanFilter,
        WriteType,
    },
    platform::{Adapter, Manager, Peripheral},
};
use bytes::Bytes;
use futures::stream::StreamExt;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    error::{F1Error, Result},
    transport::{CharacteristicInfo, NotificationReceiver, TransportBackend},
    types::DiscoveredDevice,
};

type Routes = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Bytes>>>>;

/// Direct radio backend built on `btleplug`
pub struct BleBackend {
    adapter: Adapter,
    peripherals: Mutex<HashMap<String, Peripheral>>,
    connected: Mutex<Option<Peripheral>>,
    routes: Routes,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl BleBackend {
    /// Create a backend on the first Bluetooth adapter
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::Ble`] if the Bluetooth manager cannot be initialized,
    /// or [`F1Error::Transport`] if no adapter is available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| F1Error::Transport("no Bluetooth adapter available".to_string()))?;

        Ok(Self {
            adapter,
            peripherals: Mutex::new(HashMap::new()),
            connected: Mutex::new(None),
            routes: Arc::new(Mutex::new(HashMap::new())),
            pump: Mutex::new(None),
        })
    }

    fn peripheral_key(peripheral: &Peripheral) -> String {
        peripheral.address().to_string()
    }

    async fn find_peripheral(&self, address: &str) -> Result<Peripheral> {
        if let Some(peripheral) = self.peripherals.lock().await.get(address) {
            return Ok(peripheral.clone());
        }

        // Not seen by a scan in this process; ask the adapter directly
        let peripherals = self.adapter.peripherals().await?;
        peripherals
            .into_iter()
            .find(|p| {
                Self::peripheral_key(p).eq_ignore_ascii_case(address)
                    || format!("{:?}", p.id()) == address
            })
            .ok_or_else(|| F1Error::Transport(format!("device {address} not found")))
    }

    async fn current(&self) -> Result<Peripheral> {
        self.connected
            .lock()
            .await
            .clone()
            .ok_or_else(|| F1Error::Transport("no device connected".to_string()))
    }

    async fn characteristic(&self, address: &str) -> Result<(Peripheral, Characteristic)> {
        let peripheral = self.current().await?;
        let prefix = address.to_ascii_lowercase();
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid.to_string().starts_with(&prefix))
            .ok_or_else(|| F1Error::Transport(format!("characteristic {address} not found")))?;
        Ok((peripheral, characteristic))
    }

    async fn start_pump(&self, peripheral: &Peripheral) -> Result<()> {
        let mut pump = self.pump.lock().await;
        if pump.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }

        let mut stream = peripheral.notifications().await?;
        let routes = Arc::clone(&self.routes);
        *pump = Some(tokio::spawn(async move {
            while let Some(data) = stream.next().await {
                let uuid = data.uuid.to_string();
                let routes = routes.lock().await;
                if let Some((_, sender)) = routes.iter().find(|(prefix, _)| uuid.starts_with(*prefix)) {
                    if sender.send(Bytes::from(data.value)).is_err() {
                        debug!("Dropping notification for closed channel {uuid}");
                    }
                }
            }
            debug!("Notification stream ended");
        }));
        Ok(())
    }

    async fn stop_pump(&self) {
        if let Some(handle) = self.pump.lock().await.take() {
            handle.abort();
        }
        self.routes.lock().await.clear();
    }
}

#[async_trait]
impl TransportBackend for BleBackend {
    async fn scan(&self, window: Duration) -> Result<Vec<DiscoveredDevice>> {
        debug!("Scanning for {}ms", window.as_millis());

        self.adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(window).await;
        self.adapter.stop_scan().await?;

        let mut devices = Vec::new();
        let mut known = self.peripherals.lock().await;
        for peripheral in self.adapter.peripherals().await? {
            let key = Self::peripheral_key(&peripheral);
            let (name, rssi) = match peripheral.properties().await {
                Ok(Some(properties)) => (properties.local_name, properties.rssi),
                _ => (None, None),
            };
            devices.push(DiscoveredDevice {
                address: key.clone(),
                name,
                rssi,
            });
            known.insert(key, peripheral);
        }

        debug!("Scan round found {} device(s)", devices.len());
        Ok(devices)
    }

    async fn connect(&self, address: &str) -> Result<()> {
        let peripheral = self.find_peripheral(address).await?;

        if !peripheral.is_connected().await.unwrap_or(false) {
            peripheral.connect().await?;
        }
        peripheral.discover_services().await?;

        info!("Connected to {address}");
        *self.connected.lock().await = Some(peripheral);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.stop_pump().await;
        if let Some(peripheral) = self.connected.lock().await.take() {
            peripheral.disconnect().await?;
            info!("Disconnected from {}", Self::peripheral_key(&peripheral));
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        match self.connected.lock().await.as_ref() {
            Some(peripheral) => peripheral.is_connected().await.unwrap_or(false),
            None => false,
        }
    }

    async fn enumerate(&self) -> Result<Vec<CharacteristicInfo>> {
        let peripheral = self.current().await?;
        let mut characteristics = Vec::new();
        for service in peripheral.services() {
            for characteristic in service.characteristics {
                characteristics.push(CharacteristicInfo {
                    service: service.uuid.to_string(),
                    uuid: characteristic.uuid.to_string(),
                    readable: characteristic.properties.contains(CharPropFlags::READ),
                });
            }
        }
        Ok(characteristics)
    }

    async fn read(&self, address: &str) -> Result<Vec<u8>> {
        let (peripheral, characteristic) = self.characteristic(address).await?;
        Ok(peripheral.read(&characteristic).await?)
    }

    async fn write(&self, address: &str, data: &[u8]) -> Result<()> {
        let (peripheral, characteristic) = self.characteristic(address).await?;
        peripheral
            .write(&characteristic, data, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, address: &str) -> Result<NotificationReceiver> {
        let (peripheral, characteristic) = self.characteristic(address).await?;
        self.start_pump(&peripheral).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.routes
            .lock()
            .await
            .insert(address.to_ascii_lowercase(), tx);

        if let Err(e) = peripheral.subscribe(&characteristic).await {
            self.routes.lock().await.remove(&address.to_ascii_lowercase());
            return Err(e.into());
        }
        Ok(rx)
    }

    async fn unsubscribe(&self, address: &str) -> Result<()> {
        self.routes.lock().await.remove(&address.to_ascii_lowercase());
        let (peripheral, characteristic) = self.characteristic(address).await?;
        if let Err(e) = peripheral.unsubscribe(&characteristic).await {
            warn!("Unsubscribe from {address} failed: {e}");
            return Err(e.into());
        }
        Ok(())
    }
}
