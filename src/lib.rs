#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # lelof1
//!
//! A Rust library for controlling LELO F1s devices via Bluetooth Low Energy.
//!
//! The device exposes a fixed set of GATT characteristics ("registers") for
//! identity, sensors, motors and settings. This crate maps every logical
//! operation onto those registers, drives the connection and authorization
//! state machine (including the F1s V2 security handshake), dispatches
//! notifications with optional deduplication, and mirrors the whole device API
//! over a small JSON line protocol so one machine can share its device with
//! remote peers.
//!
//! ## Authorization
//!
//! Most commands require the user to confirm the connection on the device:
//!
//! - **F1s**: pressing the central button sets the key state register.
//! - **F1s V2**: the device presents a challenge on the security access
//!   register. The session echoes it back once per connection and reports
//!   authorized once the device answers with the granted pattern.
//!
//! Identity getters, the battery level and the key state work as soon as the
//! link is up.
//!
//! ## Quick Start
//!
//! ```no_run
//! use lelof1::{DeviceApi, DeviceSession, RegisterAccess, RegisterValue};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = DeviceSession::with_ble().await?;
//!     let found = session.discover(session.config().discover_timeout(), None).await?;
//!     let device = found.first().ok_or("no F1s nearby")?;
//!     session.connect(&device.address, session.config().connect_timeout()).await?;
//!
//!     // Wait for the user to press the central button
//!     while !session.is_authorized().await? {
//!         tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//!     }
//!
//!     session
//!         .notify_buttons(
//!             Arc::new(|value: &RegisterValue| -> lelof1::Result<()> {
//!                 println!("buttons: {value:?}");
//!                 Ok(())
//!             }),
//!             true,
//!         )
//!         .await?;
//!
//!     session.set_motors_speed(30, 10).await?;
//!     session.stop_motors().await?;
//!     session.disconnect().await?;
//!     Ok(())
//! }
//! ```

/// Logical device API shared by direct and remote clients
pub mod api;
/// Bluetooth Low Energy backend
pub mod ble;
/// Error types and handling
pub mod error;
/// In-memory backend for tests and demos
pub mod mock;
/// Notification subscriptions and dispatch
pub mod notifications;
/// Connection profile persistence
pub mod profile;
/// Remote proxy server, client and wire protocol
pub mod proxy;
/// Register table and value conversion
pub mod registers;
/// Device session state machine
pub mod session;
/// Transport backend abstraction
pub mod transport;
/// Type definitions and configuration
pub mod types;

// Re-export the main types for convenient usage
pub use api::{DeviceApi, RegisterAccess};
pub use error::{F1Error, Result};
pub use mock::MockBackend;
pub use notifications::{NotificationDispatcher, NotificationListener, SubscriptionHandle};
pub use profile::ProfileStore;
pub use proxy::{ProxyClient, ProxyServer};
pub use registers::{Register, RegisterValue};
pub use session::DeviceSession;
pub use transport::TransportBackend;
pub use types::{
    ButtonState, ConnectionProfile, DiscoveredDevice, ProtocolVersion, ProxyConfig, SessionConfig,
    SessionState,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Advertised names of supported devices, matched during discovery
pub const ADVERTISING_DEVICE_NAMES: [&str; 3] = ["F1s", "F1SV2A", "F1SV2X"];
