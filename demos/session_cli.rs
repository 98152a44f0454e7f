use lelof1::{
    registers, ButtonState, DeviceApi, DeviceSession, MockBackend, ProfileStore, RegisterAccess,
    RegisterValue, Result,
};
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{error, info, warn};

const PROFILE_PATH: &str = "lelof1-profile.json";

fn simulated_device() -> Arc<MockBackend> {
    Arc::new(
        MockBackend::new()
            .with_device("F1:5E:00:00:00:01", "F1SV2A")
            .with_register(registers::MODEL_NUMBER.address, b"F1SV2A")
            .with_register(registers::MANUFACTURER_NAME.address, b"LELO")
            .with_register(registers::FIRMWARE_REVISION.address, b"1.2.0")
            .with_register(registers::BATTERY_LEVEL.address, &[76])
            .with_register(registers::SECURITY_ACCESS.address, &[0x5A, 0x17, 0x03, 0, 0, 0, 0, 0])
            .with_register(registers::MOTOR_SPEED.address, &[0x01, 0, 0])
            .with_register(registers::BUTTON.address, &[0x03]),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let simulate = std::env::args().any(|arg| arg == "--mock");
    let mock = simulate.then(simulated_device);
    let session = match &mock {
        Some(mock) => DeviceSession::new(mock.clone()),
        None => DeviceSession::with_ble().await?,
    };
    let store = ProfileStore::new(PROFILE_PATH);

    info!("LELO F1s session demo");
    let address = match store.load().await? {
        Some(profile) => {
            info!("Reconnecting to saved device {}", profile.address);
            profile.address
        }
        None => {
            info!("Searching for F1s devices...");
            let found = session
                .discover(Duration::from_secs(10), None)
                .await?;
            let Some(device) = found.into_iter().next() else {
                error!("No device found");
                return Ok(());
            };
            device.address
        }
    };

    if let Err(e) = session.connect(&address, Duration::from_secs(10)).await {
        error!("Failed to connect to {address}: {e}");
        store.clear().await?;
        return Err(e);
    }
    if let Some(profile) = session.connection_profile().await {
        store.save(&profile).await?;
    }

    info!("Manufacturer: {}", session.get_manufacturer_name().await?);
    info!("Model: {}", session.get_model_number().await?);
    info!("Firmware: {}", session.get_firmware_revision().await?);
    info!("Battery: {}%", session.get_battery_level().await?);

    info!("Press the central button on the device to authorize");
    let mut authorized = false;
    for round in 0..30 {
        if session.is_authorized().await? {
            authorized = true;
            break;
        }
        if let Some(mock) = &mock {
            // The simulated user confirms after a few seconds
            if round == 3 {
                mock.set_register(
                    registers::SECURITY_ACCESS.address,
                    &lelof1::session::SECURITY_ACCESS_GRANTED,
                );
            }
        }
        sleep(Duration::from_secs(1)).await;
    }
    if !authorized {
        warn!("Not authorized, giving up");
        return session.disconnect().await;
    }
    info!("Authorized");

    let buttons = session
        .notify_buttons(
            Arc::new(|value: &RegisterValue| -> Result<()> {
                let state = value
                    .as_number()
                    .and_then(|n| u8::try_from(n).ok())
                    .and_then(|n| ButtonState::try_from(n).ok());
                info!("Buttons: {state:?}");
                Ok(())
            }),
            true,
        )
        .await?;

    for speed in [20, 40, 60] {
        session.set_main_motor_speed(speed).await?;
        if let Some(mock) = &mock {
            mock.notify(registers::BUTTON.address, &[0x01]);
        }
        info!("Motors: {:?}", session.get_motors_speed().await?);
        sleep(Duration::from_secs(1)).await;
    }

    session.stop_motors().await?;
    session.unregister(&buttons).await?;
    session.disconnect().await?;
    info!("Done");
    Ok(())
}
