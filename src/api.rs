//! Logical device API shared by the direct session and the proxy client.
//!
//! [`DeviceApi`] covers every named operation that can travel over the proxy
//! wire. [`RegisterAccess`] is the extra capability of a direct session: raw
//! register I/O and notification subscriptions. Callers holding a
//! `dyn DeviceApi` ask for it through [`DeviceApi::register_access`].

use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    error::{F1Error, Result},
    notifications::{NotificationListener, SubscriptionHandle},
    registers::{self, Register, RegisterValue},
};

/// Highest accepted motor speed and vibration setting value
pub const MAX_SPEED: u8 = 100;

/// Number of values in the auto vibration settings
pub const VIBRATION_SETTING_LEN: usize = 8;

/// Check a single motor speed
///
/// # Errors
///
/// Returns [`F1Error::Validation`] if the speed is above [`MAX_SPEED`].
pub fn validate_speed(value: u8) -> Result<()> {
    if value > MAX_SPEED {
        return Err(F1Error::Validation(format!(
            "Value should be between 0 and {MAX_SPEED}, got {value}"
        )));
    }
    Ok(())
}

/// Check the auto vibration settings
///
/// # Errors
///
/// Returns [`F1Error::Validation`] unless there are exactly 8 values, each at
/// most [`MAX_SPEED`].
pub fn validate_vibration_setting(values: &[u8]) -> Result<()> {
    if values.len() != VIBRATION_SETTING_LEN {
        return Err(F1Error::Validation(format!(
            "A collection of {VIBRATION_SETTING_LEN} elements is required, got {}",
            values.len()
        )));
    }
    values.iter().try_for_each(|v| validate_speed(*v))
}

/// Every named operation of an F1s device
///
/// Identity reads, the battery level, the key state and `ping` need a
/// connection only. Everything else also needs the device to have authorized
/// the connection (see [`DeviceApi::assert_authorized`]).
#[async_trait]
pub trait DeviceApi: Send + Sync {
    /// Raw register access and notifications, when this client supports them
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::UnsupportedOperation`] for clients that only carry
    /// named operations.
    fn register_access(&self) -> Result<&dyn RegisterAccess> {
        Err(F1Error::UnsupportedOperation(
            "raw register access and notifications are not supported by this client".to_string(),
        ))
    }

    /// Whether the link to the device is up
    async fn is_connected(&self) -> bool;

    /// Whether the device has authorized this connection
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotConnected`] or any I/O error of the check.
    async fn is_authorized(&self) -> Result<bool>;

    /// Fail unless the device has authorized this connection
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotAuthorized`] if it has not.
    async fn assert_authorized(&self) -> Result<()>;

    /// Liveness check
    ///
    /// # Errors
    ///
    /// Returns an error if the device does not answer.
    async fn ping(&self) -> Result<()>;

    /// Disconnect, cancelling every notification subscription
    ///
    /// # Errors
    ///
    /// Returns the transport error if tearing down the link fails.
    async fn disconnect(&self) -> Result<()>;

    /// Turn the device off and disconnect
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotAuthorized`] or the I/O error of the shutdown.
    async fn shutdown(&self) -> Result<()>;

    /// Manufacturer name
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotConnected`] or the read error.
    async fn get_manufacturer_name(&self) -> Result<String>;

    /// Model number, for example `F1SV2A`
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotConnected`] or the read error.
    async fn get_model_number(&self) -> Result<String>;

    /// Hardware revision
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotConnected`] or the read error.
    async fn get_hardware_revision(&self) -> Result<String>;

    /// Firmware revision
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotConnected`] or the read error.
    async fn get_firmware_revision(&self) -> Result<String>;

    /// Software revision
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotConnected`] or the read error.
    async fn get_software_revision(&self) -> Result<String>;

    /// MAC address as `AA:BB:..`
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotConnected`] or the read error.
    async fn get_mac_address(&self) -> Result<String>;

    /// Serial number as hex pairs
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotConnected`] or the read error.
    async fn get_serial_number(&self) -> Result<String>;

    /// Chip id as hex pairs
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotConnected`] or the read error.
    async fn get_chip_id(&self) -> Result<String>;

    /// Device name
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotConnected`] or the read error.
    async fn get_device_name(&self) -> Result<String>;

    /// System id as hex pairs
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotConnected`] or the read error.
    async fn get_system_id(&self) -> Result<String>;

    /// PnP id as hex pairs
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotConnected`] or the read error.
    async fn get_pnp_id(&self) -> Result<String>;

    /// IEEE 11073-20601 certification data as hex pairs
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotConnected`] or the read error.
    async fn get_ieee_11073_20601(&self) -> Result<String>;

    /// Battery level, 0 to 100
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotConnected`] or the read error.
    async fn get_battery_level(&self) -> Result<u8>;

    /// Key state (central button pressed since connecting)
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotConnected`] or the read error.
    async fn get_key_state(&self) -> Result<bool>;

    /// Use counter
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotAuthorized`] or the read error.
    async fn get_use_count(&self) -> Result<u16>;

    /// Reset the use counter to zero
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotAuthorized`] or the write error.
    async fn reset_use_count(&self) -> Result<()>;

    /// Buttons status, see [`ButtonState`](crate::ButtonState)
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotAuthorized`] or the read error.
    async fn get_buttons_status(&self) -> Result<u8>;

    /// Internal temperature (°C) and pressure (mbar)
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotAuthorized`] or the read error.
    async fn get_temperature_and_pressure(&self) -> Result<(f64, f64)>;

    /// Internal temperature in °C
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotAuthorized`] or the read error.
    async fn get_temperature(&self) -> Result<f64>;

    /// Internal pressure in mbar
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotAuthorized`] or the read error.
    async fn get_pressure(&self) -> Result<f64>;

    /// Accelerometer axes
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotAuthorized`] or the read error.
    async fn get_accelerometer(&self) -> Result<(u16, u16, u16)>;

    /// Accelerometer X axis
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotAuthorized`] or the read error.
    async fn get_accelerometer_x(&self) -> Result<u16>;

    /// Accelerometer Y axis
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotAuthorized`] or the read error.
    async fn get_accelerometer_y(&self) -> Result<u16>;

    /// Accelerometer Z axis
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotAuthorized`] or the read error.
    async fn get_accelerometer_z(&self) -> Result<u16>;

    /// Insertion depth, 0 to 8
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotAuthorized`] or the read error.
    async fn get_depth(&self) -> Result<u16>;

    /// Rotations per second from the Hall sensors
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotAuthorized`] or the read error.
    async fn get_rotation_speed(&self) -> Result<u16>;

    /// Quick wake-up status
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotAuthorized`] or the read error.
    async fn get_wake_up(&self) -> Result<bool>;

    /// Enable quick wake-up
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotAuthorized`] or the write error.
    async fn enable_wake_up(&self) -> Result<()>;

    /// Disable quick wake-up
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotAuthorized`] or the write error.
    async fn disable_wake_up(&self) -> Result<()>;

    /// Auto vibration settings, 8 values from 0 to 100
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotAuthorized`] or the read error.
    async fn get_vibration_setting(&self) -> Result<Vec<u8>>;

    /// Set the auto vibration settings
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::Validation`] before any I/O unless `values` holds
    /// exactly 8 values from 0 to 100.
    async fn set_vibration_setting(&self, values: &[u8]) -> Result<()>;

    /// Cruise control status
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotAuthorized`] or the read error.
    async fn get_cruise_control(&self) -> Result<bool>;

    /// Enable cruise control; `reset` also restores the default motor speed
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotAuthorized`] or the write error.
    async fn enable_cruise_control(&self, reset: bool) -> Result<()>;

    /// Disable cruise control
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotAuthorized`] or the write error.
    async fn disable_cruise_control(&self) -> Result<()>;

    /// Stop both motors
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotAuthorized`] or the write error.
    async fn stop_motors(&self) -> Result<()>;

    /// Enter accelerometer verification mode
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotAuthorized`] or the write error.
    async fn verify_accelerometer(&self) -> Result<()>;

    /// Main and vibration motor speeds
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotAuthorized`] or the read error.
    async fn get_motors_speed(&self) -> Result<(u8, u8)>;

    /// Main motor speed
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotAuthorized`] or the read error.
    async fn get_main_motor_speed(&self) -> Result<u8>;

    /// Vibration motor speed
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotAuthorized`] or the read error.
    async fn get_vibration_speed(&self) -> Result<u8>;

    /// Set both motor speeds
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::Validation`] before any I/O if a speed is above 100.
    async fn set_motors_speed(&self, main: u8, vibration: u8) -> Result<()>;

    /// Set the main motor speed, keeping the vibration speed
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::Validation`] before any I/O if the speed is above 100.
    async fn set_main_motor_speed(&self, value: u8) -> Result<()>;

    /// Set the vibration speed, keeping the main motor speed
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::Validation`] before any I/O if the speed is above 100.
    async fn set_vibration_speed(&self, value: u8) -> Result<()>;
}

/// Raw register I/O and notifications, available on direct sessions only
#[async_trait]
pub trait RegisterAccess: Send + Sync {
    /// Read and convert a register
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotConnected`], the transport error, or the
    /// conversion error.
    async fn read(&self, register: &'static Register) -> Result<RegisterValue>;

    /// Convert and write a register
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotConnected`], the conversion error, or the
    /// transport error.
    async fn write(&self, register: &'static Register, value: &RegisterValue) -> Result<()>;

    /// Attach a listener to a register
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotConnected`] or the error opening the channel.
    async fn subscribe(
        &self,
        register: &'static Register,
        listener: Arc<dyn NotificationListener>,
        distinct_until_changed: bool,
    ) -> Result<SubscriptionHandle>;

    /// Detach a listener
    ///
    /// # Errors
    ///
    /// Returns the error closing the backend channel, if any.
    async fn unregister(&self, handle: &SubscriptionHandle) -> Result<()>;

    /// Key state changes, delivered as [`RegisterValue::Flag`]
    ///
    /// # Errors
    ///
    /// See [`RegisterAccess::subscribe`].
    async fn notify_key_state(
        &self,
        listener: Arc<dyn NotificationListener>,
        distinct_until_changed: bool,
    ) -> Result<SubscriptionHandle> {
        self.subscribe(&registers::KEY_STATE, listener, distinct_until_changed)
            .await
    }

    /// Buttons changes, delivered as [`RegisterValue::Number`]
    ///
    /// # Errors
    ///
    /// See [`RegisterAccess::subscribe`].
    async fn notify_buttons(
        &self,
        listener: Arc<dyn NotificationListener>,
        distinct_until_changed: bool,
    ) -> Result<SubscriptionHandle> {
        self.subscribe(&registers::BUTTON, listener, distinct_until_changed)
            .await
    }

    /// Rotation speed changes, delivered as [`RegisterValue::Number`]
    ///
    /// # Errors
    ///
    /// See [`RegisterAccess::subscribe`].
    async fn notify_rotation_speed(
        &self,
        listener: Arc<dyn NotificationListener>,
        distinct_until_changed: bool,
    ) -> Result<SubscriptionHandle> {
        self.subscribe(&registers::HALL, listener, distinct_until_changed)
            .await
    }

    /// Depth changes, delivered as [`RegisterValue::Number`]
    ///
    /// # Errors
    ///
    /// See [`RegisterAccess::subscribe`].
    async fn notify_depth(
        &self,
        listener: Arc<dyn NotificationListener>,
        distinct_until_changed: bool,
    ) -> Result<SubscriptionHandle> {
        self.subscribe(&registers::LENGTH, listener, distinct_until_changed)
            .await
    }

    /// Accelerometer changes, delivered as [`RegisterValue::Triple`]
    ///
    /// # Errors
    ///
    /// See [`RegisterAccess::subscribe`].
    async fn notify_accelerometer(
        &self,
        listener: Arc<dyn NotificationListener>,
        distinct_until_changed: bool,
    ) -> Result<SubscriptionHandle> {
        self.subscribe(&registers::ACCELEROMETER, listener, distinct_until_changed)
            .await
    }

    /// Temperature and pressure changes, delivered as [`RegisterValue::Climate`]
    ///
    /// # Errors
    ///
    /// See [`RegisterAccess::subscribe`].
    async fn notify_temperature_and_pressure(
        &self,
        listener: Arc<dyn NotificationListener>,
        distinct_until_changed: bool,
    ) -> Result<SubscriptionHandle> {
        self.subscribe(
            &registers::PRESSURE_TEMPERATURE,
            listener,
            distinct_until_changed,
        )
        .await
    }
}
