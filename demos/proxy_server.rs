use async_trait::async_trait;
use lelof1::{
    proxy::{AuthorizationHandler, ClientSession, ProxyHooks},
    registers, DeviceSession, MockBackend, ProxyConfig, ProxyServer, Result,
};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tracing::{error, info};

/// Grants control to every peer after a short pause
struct AutoApprove;

#[async_trait]
impl AuthorizationHandler for AutoApprove {
    async fn authorize(&self, client: &ClientSession, _arguments: &[Value]) -> bool {
        info!("Approving {} in 2 seconds", client.display_name());
        tokio::time::sleep(Duration::from_secs(2)).await;
        true
    }
}

struct LogHooks;

#[async_trait]
impl ProxyHooks for LogHooks {
    async fn client_connected(&self, client: &ClientSession) {
        info!("Peer {} connected", client.id);
    }

    async fn client_disconnected(&self, client: &ClientSession) {
        info!("Peer {} disconnected", client.display_name());
    }

    async fn after_command(
        &self,
        client: &ClientSession,
        command: &str,
        arguments: &[Value],
        result: &Value,
    ) {
        info!("{} ran {command} {arguments:?} -> {result}", client.display_name());
    }

    async fn lock_changed(&self, client: &ClientSession, locked: bool) {
        info!("{} {} the device", client.display_name(), if locked { "locked" } else { "unlocked" });
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let session = if std::env::args().any(|arg| arg == "--mock") {
        let mock = MockBackend::new()
            .with_device("F1:5E:00:00:00:01", "F1s")
            .with_register(registers::MODEL_NUMBER.address, b"F1s")
            .with_register(registers::KEY_STATE.address, &[0x01])
            .with_register(registers::BATTERY_LEVEL.address, &[90])
            .with_register(registers::MOTOR_SPEED.address, &[0x01, 0, 0]);
        DeviceSession::new(Arc::new(mock))
    } else {
        DeviceSession::with_ble().await?
    };

    let found = session.discover(Duration::from_secs(10), None).await?;
    let Some(device) = found.first() else {
        error!("No device found");
        return Ok(());
    };
    session.connect(&device.address, Duration::from_secs(10)).await?;

    let server = Arc::new(
        ProxyServer::new(Arc::new(session), ProxyConfig::default())
            .with_authorization_handler(Arc::new(AutoApprove))
            .with_hooks(Arc::new(LogHooks)),
    );

    let stopper = Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Stopping proxy server");
            stopper.stop();
        }
    });

    server.run().await
}
