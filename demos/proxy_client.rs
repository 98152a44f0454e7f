use lelof1::{proxy::RemoteAuthorization, DeviceApi, ProxyClient, ProxyConfig, Result};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let host = std::env::args().nth(1).unwrap_or_else(|| "127.0.0.1".to_string());
    let client = ProxyClient::new(ProxyConfig {
        host,
        ..ProxyConfig::default()
    });

    client.connect().await?;
    client.set_name("proxy-client-demo").await?;

    if client.get_remote_authorization().await? != RemoteAuthorization::Authorized {
        info!("Requesting control from the server operator");
        if !client.request_remote_authorization().await? {
            warn!("Control denied");
            return client.disconnect().await;
        }
    }

    info!("Device connected: {}", client.get_remote_connected().await?);
    info!("Model: {}", client.get_model_number().await?);
    info!("Battery: {}%", client.get_battery_level().await?);

    client.lock().await?;
    client.set_motors_speed(30, 10).await?;
    info!("Motors: {:?}", client.get_motors_speed().await?);
    sleep(Duration::from_secs(2)).await;
    client.stop_motors().await?;
    client.unlock().await?;

    client.disconnect().await
}
