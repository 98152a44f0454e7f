//! Remote proxy: expose one device session to peers over TCP.
//!
//! [`ProxyServer`] owns the device and applies per-peer authorization and
//! locking; [`ProxyClient`] implements [`DeviceApi`](crate::DeviceApi) on top
//! of the line protocol in [`protocol`].

/// Remote client implementing the device API over the proxy protocol.
pub mod client;
pub mod protocol;
/// Proxy server sharing one device session with remote peers.
pub mod server;

pub use client::{ProxyClient, RemoteAuthorization};
pub use protocol::{DeviceCommand, JsonLineCodec, ManagedCommand, Request, Response, Status};
pub use server::{AuthorizationHandler, ClientSession, CommandHandler, ProxyHooks, ProxyServer};
