use async_trait::async_trait;
use futures::{FutureExt, SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use std::{
    collections::{HashMap, HashSet},
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{Mutex, RwLock},
    time::timeout,
};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use super::protocol::{
    is_forbidden, normalize_command, DeviceCommand, JsonLineCodec, ManagedCommand, Request,
    Response,
};
use crate::{
    api::DeviceApi,
    error::{F1Error, Result},
    types::ProxyConfig,
};

/// State the server keeps for one connected peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientSession {
    /// Peer network identity, `ip:port`
    pub id: String,
    /// Display name set with the `name` command
    pub name: Option<String>,
    /// Whether the operator granted control
    pub authorized: bool,
    /// Whether the peer holds the control lock
    pub locking: bool,
    /// Whether the operator denied control
    pub blocked: bool,
}

impl ClientSession {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            authorized: false,
            locking: false,
            blocked: false,
        }
    }

    /// Name if set, otherwise the id
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Operator decision on an `authorize` request
#[async_trait]
pub trait AuthorizationHandler: Send + Sync {
    /// Return true to grant control. May take as long as the operator needs.
    async fn authorize(&self, client: &ClientSession, arguments: &[Value]) -> bool;
}

/// Extra commands handled by the embedding application
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Return `Ok(None)` to let the command fall through to the device.
    ///
    /// # Errors
    ///
    /// Errors are sent back to the peer as `ERROR` responses.
    async fn handle(
        &self,
        client: &ClientSession,
        command: &str,
        arguments: &[Value],
    ) -> Result<Option<Value>>;
}

/// Observability hooks; panics are caught and logged
#[async_trait]
pub trait ProxyHooks: Send + Sync {
    /// A peer connected
    async fn client_connected(&self, _client: &ClientSession) {}

    /// A peer went away
    async fn client_disconnected(&self, _client: &ClientSession) {}

    /// A handled or forwarded command succeeded
    async fn after_command(
        &self,
        _client: &ClientSession,
        _command: &str,
        _arguments: &[Value],
        _result: &Value,
    ) {
    }

    /// A peer took or released the control lock
    async fn lock_changed(&self, _client: &ClientSession, _locked: bool) {}
}

/// Exposes one device to remote peers over TCP
///
/// Each peer sends newline-delimited JSON [`Request`]s and receives one
/// [`Response`] per request. Lines that cannot be read get an `ERROR` response
/// and the connection stays open. Device commands are forwarded only for peers
/// the operator authorized, and run one at a time.
///
/// # Examples
///
/// ```no_run
/// use lelof1::{DeviceSession, ProxyConfig, ProxyServer};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let session = Arc::new(DeviceSession::with_ble().await?);
///     session.connect("AA:BB:CC:DD:EE:FF", session.config().connect_timeout()).await?;
///
///     let server = Arc::new(ProxyServer::new(session, ProxyConfig::default()));
///     server.run().await?;
///     Ok(())
/// }
/// ```
pub struct ProxyServer {
    device: Arc<dyn DeviceApi>,
    config: ProxyConfig,
    clients: RwLock<HashMap<String, ClientSession>>,
    blocked: RwLock<HashSet<String>>,
    device_gate: Mutex<()>,
    stopped: AtomicBool,
    authorization_handler: Option<Arc<dyn AuthorizationHandler>>,
    command_handler: Option<Arc<dyn CommandHandler>>,
    hooks: Vec<Arc<dyn ProxyHooks>>,
}

impl ProxyServer {
    /// Create a server for a device
    #[must_use]
    pub fn new(device: Arc<dyn DeviceApi>, config: ProxyConfig) -> Self {
        Self {
            device,
            config,
            clients: RwLock::new(HashMap::new()),
            blocked: RwLock::new(HashSet::new()),
            device_gate: Mutex::new(()),
            stopped: AtomicBool::new(false),
            authorization_handler: None,
            command_handler: None,
            hooks: Vec::new(),
        }
    }

    /// Set the operator decision handler used by `authorize`
    #[must_use]
    pub fn with_authorization_handler(mut self, handler: Arc<dyn AuthorizationHandler>) -> Self {
        self.authorization_handler = Some(handler);
        self
    }

    /// Set the application command handler, tried before forwarding
    #[must_use]
    pub fn with_command_handler(mut self, handler: Arc<dyn CommandHandler>) -> Self {
        self.command_handler = Some(handler);
        self
    }

    /// Add observability hooks
    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn ProxyHooks>) -> Self {
        self.hooks.push(hooks);
        self
    }

    /// Server configuration
    #[must_use]
    pub const fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Ask the accept and receive loops to finish
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            debug!(target: "lelof1::proxy", "Scheduling proxy server stop");
        }
    }

    /// Whether [`ProxyServer::stop`] was called
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Snapshot of the connected peers
    pub async fn active_clients(&self) -> Vec<ClientSession> {
        let blocked = self.blocked.read().await;
        let mut clients: Vec<_> = self
            .clients
            .read()
            .await
            .values()
            .map(|client| ClientSession {
                blocked: blocked.contains(&client.id),
                ..client.clone()
            })
            .collect();
        clients.sort_by(|a, b| a.id.cmp(&b.id));
        clients
    }

    /// Whether any peer holds the control lock
    pub async fn is_locked(&self) -> bool {
        self.clients.read().await.values().any(|c| c.locking)
    }

    /// Bind the configured address and serve until stopped
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::Io`] if the address cannot be bound or accepting fails.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let address = self.config.address();
        info!(target: "lelof1::proxy", "Opening proxy socket on {address}");
        let listener = TcpListener::bind(&address).await?;
        self.run_with_listener(listener).await
    }

    /// Serve peers from an already bound listener until stopped
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::Io`] if accepting fails.
    pub async fn run_with_listener(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(target: "lelof1::proxy", "Proxy server waiting for connections on {}", listener.local_addr()?);

        while !self.is_stopped() {
            let (stream, peer) = match timeout(self.config.accept_poll(), listener.accept()).await {
                Err(_) => continue,
                Ok(Err(e)) => {
                    error!(target: "lelof1::proxy", "Accept failed: {e}");
                    return Err(e.into());
                }
                Ok(Ok(accepted)) => accepted,
            };

            info!(target: "lelof1::proxy", "Proxy server received a connection from {peer}");
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                server.serve_peer(stream, peer.to_string()).await;
            });
        }

        info!(target: "lelof1::proxy", "Proxy server stopped");
        Ok(())
    }

    async fn serve_peer(&self, stream: TcpStream, peer: String) {
        let client = self.ensure_client(&peer).await;
        info!(target: "lelof1::proxy", "{} CONNECTED", client.display_name());
        for hooks in &self.hooks {
            guarded("client connected", hooks.client_connected(&client)).await;
        }

        let mut framed = Framed::new(stream, JsonLineCodec::new(self.config.max_line_length));

        while !self.is_stopped() {
            let line = match timeout(self.config.receive_poll(), framed.next()).await {
                Err(_) => continue,
                Ok(None) => {
                    info!(target: "lelof1::proxy", "Peer {peer} closed the connection");
                    break;
                }
                Ok(Some(Err(e))) => {
                    warn!(target: "lelof1::proxy", "Receive from {peer} failed: {e}");
                    break;
                }
                Ok(Some(Ok(Err(e)))) => {
                    warn!(target: "lelof1::proxy", "Unreadable line from {peer}: {e}");
                    if self.send(&mut framed, &Response::error(&e)).await.is_err() {
                        break;
                    }
                    continue;
                }
                Ok(Some(Ok(Ok(line)))) => line,
            };

            if line.trim().is_empty() {
                continue;
            }
            debug!(target: "lelof1::io", "RECEIVED {line}");
            let response = self.handle_request(&peer, &line).await;
            if self.send(&mut framed, &response).await.is_err() {
                break;
            }

            if !self.clients.read().await.contains_key(&peer) {
                info!(target: "lelof1::proxy", "Command requested disconnection");
                break;
            }
        }

        let client = self.remove_client(&peer).await.unwrap_or(client);
        info!(target: "lelof1::proxy", "{} DISCONNECTED", client.display_name());
        for hooks in &self.hooks {
            guarded("client disconnected", hooks.client_disconnected(&client)).await;
        }
    }

    async fn send(&self, framed: &mut Framed<TcpStream, JsonLineCodec>, response: &Response) -> Result<()> {
        let encoded = serde_json::to_string(response)?;
        debug!(target: "lelof1::io", "SEND {encoded}");
        framed.send(encoded).await.inspect_err(|e| {
            warn!(target: "lelof1::proxy", "Send failed: {e}");
        })
    }

    /// Drop a peer from the table, releasing its lock
    async fn remove_client(&self, peer: &str) -> Option<ClientSession> {
        let client = self.clients.write().await.remove(peer)?;
        if client.locking {
            info!(target: "lelof1::proxy", "{} released the lock by leaving", client.display_name());
            for hooks in &self.hooks {
                guarded("lock changed", hooks.lock_changed(&client, false)).await;
            }
        }
        Some(client)
    }

    /// Run one request line on behalf of `peer` and build the reply
    ///
    /// The peer is registered on first contact. Failures never escape; they are
    /// returned as `ERROR` responses.
    pub async fn handle_request(&self, peer: &str, line: &str) -> Response {
        let request = match Request::parse(line) {
            Ok(request) => request,
            Err(e) => {
                warn!(target: "lelof1::proxy", "Malformed request from {peer}: {e}");
                return Response::error(&e);
            }
        };

        let command = normalize_command(&request.command);
        let client = self.ensure_client(peer).await;
        info!(target: "lelof1::proxy", "Received command {command} from {}", client.display_name());

        match self.execute(peer, &command, &request.arguments).await {
            Ok(data) => Response::ok(data),
            Err(e) => {
                warn!(target: "lelof1::proxy", "Command {command} from {peer} failed: {e}");
                Response::error(&e)
            }
        }
    }

    async fn execute(&self, peer: &str, command: &str, arguments: &[Value]) -> Result<Value> {
        if command.is_empty() {
            return Err(F1Error::Protocol("empty command".to_string()));
        }

        if let Some(managed) = ManagedCommand::parse(command) {
            debug!(target: "lelof1::proxy", "Running {command} as a managed command");
            return self.execute_managed(peer, managed, arguments).await;
        }

        let client = self.client(peer).await?;
        if let Some(handler) = &self.command_handler {
            debug!(target: "lelof1::proxy", "Offering {command} to the command handler");
            if let Some(data) = handler.handle(&client, command, arguments).await? {
                self.after_command(&client, command, arguments, &data).await;
                return Ok(data);
            }
        }

        debug!(target: "lelof1::proxy", "Forwarding {command} to the device");
        let data = self.forward(&client, command, arguments).await?;
        self.after_command(&client, command, arguments, &data).await;
        Ok(data)
    }

    async fn forward(&self, client: &ClientSession, command: &str, arguments: &[Value]) -> Result<Value> {
        if !client.authorized {
            return Err(F1Error::AuthorizationDenied(
                "client is not authorized".to_string(),
            ));
        }
        if is_forbidden(command) {
            return Err(F1Error::Protocol(format!("Forbidden command {command}")));
        }

        let device_command = DeviceCommand::parse(command, arguments)?;
        let _gate = self.device_gate.lock().await;
        device_command.execute(self.device.as_ref()).await
    }

    async fn execute_managed(
        &self,
        peer: &str,
        command: ManagedCommand,
        arguments: &[Value],
    ) -> Result<Value> {
        match command {
            ManagedCommand::Ping => Ok(json!("pong")),
            ManagedCommand::Name => {
                let name = match arguments.first() {
                    Some(Value::String(name)) => name.clone(),
                    Some(other) => other.to_string(),
                    None => {
                        return Err(F1Error::Protocol("name requires an argument".to_string()))
                    }
                };
                self.update_client(peer, |client| client.name = Some(name))
                    .await?;
                Ok(Value::Null)
            }
            ManagedCommand::Quit => {
                self.remove_client(peer).await;
                Ok(Value::Null)
            }
            ManagedCommand::Authorized => {
                if self.blocked.read().await.contains(peer) {
                    return Ok(json!("BLOCKED"));
                }
                Ok(json!(self.client(peer).await?.authorized))
            }
            ManagedCommand::Connected => Ok(json!(self.device.is_connected().await)),
            ManagedCommand::Authorize => self.authorize(peer, arguments).await.map(Value::Bool),
            ManagedCommand::Lock => self.lock(peer).await,
            ManagedCommand::Unlock => self.unlock(peer).await,
        }
    }

    async fn authorize(&self, peer: &str, arguments: &[Value]) -> Result<bool> {
        let client = self.client(peer).await?;
        if client.authorized {
            return Ok(true);
        }
        if self.blocked.read().await.contains(peer) {
            return Err(F1Error::PeerBlocked(client.display_name().to_string()));
        }
        let handler = self.authorization_handler.as_ref().ok_or_else(|| {
            F1Error::AuthorizationDenied("no authorization handler registered".to_string())
        })?;

        // No table lock is held while the operator decides
        let granted = handler.authorize(&client, arguments).await;

        if granted {
            info!(target: "lelof1::proxy", "Granted control to {}", client.display_name());
            self.update_client(peer, |client| client.authorized = true)
                .await?;
        } else {
            warn!(target: "lelof1::proxy", "Blocked control from {}", client.display_name());
            self.blocked.write().await.insert(peer.to_string());
        }
        Ok(granted)
    }

    async fn lock(&self, peer: &str) -> Result<Value> {
        let client = {
            let mut clients = self.clients.write().await;
            if let Some(holder) = clients.values().find(|c| c.locking && c.id != peer) {
                return Err(F1Error::AuthorizationDenied(format!(
                    "device is locked by {}",
                    holder.display_name()
                )));
            }
            let client = clients
                .get_mut(peer)
                .ok_or_else(|| unknown_client(peer))?;
            if !client.authorized {
                return Err(F1Error::AuthorizationDenied(
                    "client is not authorized".to_string(),
                ));
            }
            if client.locking {
                return Ok(json!(true));
            }
            client.locking = true;
            client.clone()
        };

        info!(target: "lelof1::proxy", "{} locked the device", client.display_name());
        for hooks in &self.hooks {
            guarded("lock changed", hooks.lock_changed(&client, true)).await;
        }
        Ok(json!(true))
    }

    async fn unlock(&self, peer: &str) -> Result<Value> {
        let client = {
            let mut clients = self.clients.write().await;
            let client = clients
                .get_mut(peer)
                .ok_or_else(|| unknown_client(peer))?;
            if !client.authorized {
                return Err(F1Error::AuthorizationDenied(
                    "client is not authorized".to_string(),
                ));
            }
            if !client.locking {
                return Err(F1Error::InvalidState("client was not locking".to_string()));
            }
            client.locking = false;
            client.clone()
        };

        info!(target: "lelof1::proxy", "{} unlocked the device", client.display_name());
        for hooks in &self.hooks {
            guarded("lock changed", hooks.lock_changed(&client, false)).await;
        }
        Ok(json!(false))
    }

    async fn ensure_client(&self, peer: &str) -> ClientSession {
        let mut clients = self.clients.write().await;
        clients
            .entry(peer.to_string())
            .or_insert_with(|| {
                debug!(target: "lelof1::proxy", "Registering new client {peer}");
                ClientSession::new(peer)
            })
            .clone()
    }

    async fn client(&self, peer: &str) -> Result<ClientSession> {
        self.clients
            .read()
            .await
            .get(peer)
            .cloned()
            .ok_or_else(|| unknown_client(peer))
    }

    async fn update_client(&self, peer: &str, update: impl FnOnce(&mut ClientSession)) -> Result<()> {
        let mut clients = self.clients.write().await;
        let client = clients.get_mut(peer).ok_or_else(|| unknown_client(peer))?;
        update(client);
        Ok(())
    }

    async fn after_command(&self, client: &ClientSession, command: &str, arguments: &[Value], result: &Value) {
        for hooks in &self.hooks {
            guarded("after command", hooks.after_command(client, command, arguments, result)).await;
        }
    }
}

fn unknown_client(peer: &str) -> F1Error {
    F1Error::Protocol(format!("unknown client {peer}"))
}

async fn guarded(hook: &str, call: impl Future<Output = ()>) {
    if AssertUnwindSafe(call).catch_unwind().await.is_err() {
        error!(target: "lelof1::proxy", "Panic in {hook} hook");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{mock::MockBackend, proxy::protocol::Status, registers, session::DeviceSession};
    use std::{net::SocketAddr, sync::Mutex as StdMutex, time::Duration};
    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
        net::tcp::{OwnedReadHalf, OwnedWriteHalf},
        sync::Notify,
        task::JoinHandle,
    };

    const PEER: &str = "10.0.0.2:50000";
    const OTHER: &str = "10.0.0.3:50001";

    struct Operator(bool);

    #[async_trait]
    impl AuthorizationHandler for Operator {
        async fn authorize(&self, _client: &ClientSession, _arguments: &[Value]) -> bool {
            self.0
        }
    }

    #[derive(Default)]
    struct Recorder {
        commands: StdMutex<Vec<(String, Vec<Value>, Value)>>,
        locks: StdMutex<Vec<bool>>,
    }

    #[async_trait]
    impl ProxyHooks for Recorder {
        async fn after_command(
            &self,
            _client: &ClientSession,
            command: &str,
            arguments: &[Value],
            result: &Value,
        ) {
            self.commands
                .lock()
                .unwrap()
                .push((command.to_string(), arguments.to_vec(), result.clone()));
        }

        async fn lock_changed(&self, _client: &ClientSession, locked: bool) {
            self.locks.lock().unwrap().push(locked);
        }
    }

    struct PanickingHooks;

    #[async_trait]
    impl ProxyHooks for PanickingHooks {
        async fn after_command(&self, _: &ClientSession, _: &str, _: &[Value], _: &Value) {
            panic!("hook failure");
        }
    }

    struct Aliases;

    #[async_trait]
    impl CommandHandler for Aliases {
        async fn handle(
            &self,
            _client: &ClientSession,
            command: &str,
            _arguments: &[Value],
        ) -> Result<Option<Value>> {
            match command {
                "status" => Ok(Some(json!("idle"))),
                "explode" => Err(F1Error::Protocol("handler refused".to_string())),
                _ => Ok(None),
            }
        }
    }

    async fn device() -> (Arc<MockBackend>, Arc<DeviceSession>) {
        let mock = Arc::new(
            MockBackend::new()
                .with_register(registers::MODEL_NUMBER.address, b"F1s")
                .with_register(registers::KEY_STATE.address, &[0x01])
                .with_register(registers::BATTERY_LEVEL.address, &[87])
                .with_register(registers::MOTOR_SPEED.address, &[0x01, 0, 0]),
        );
        let session = Arc::new(DeviceSession::new(mock.clone()));
        session
            .connect("AA:BB:CC:DD:EE:FF", Duration::from_secs(1))
            .await
            .unwrap();
        (mock, session)
    }

    async fn server(granted: bool) -> (Arc<MockBackend>, Arc<Recorder>, ProxyServer) {
        let (mock, session) = device().await;
        let recorder = Arc::new(Recorder::default());
        let server = ProxyServer::new(session, ProxyConfig::default())
            .with_authorization_handler(Arc::new(Operator(granted)))
            .with_hooks(recorder.clone());
        (mock, recorder, server)
    }

    async fn call(server: &ProxyServer, peer: &str, line: &str) -> Result<Value> {
        server.handle_request(peer, line).await.into_result()
    }

    fn fast_config() -> ProxyConfig {
        ProxyConfig {
            host: "127.0.0.1".to_string(),
            accept_poll_ms: 50,
            receive_poll_ms: 50,
            max_line_length: 256,
            ..ProxyConfig::default()
        }
    }

    async fn serve(server: ProxyServer) -> (Arc<ProxyServer>, SocketAddr, JoinHandle<Result<()>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let server = Arc::new(server);
        let task = tokio::spawn(Arc::clone(&server).run_with_listener(listener));
        (server, address, task)
    }

    struct Peer {
        lines: Lines<BufReader<OwnedReadHalf>>,
        writer: OwnedWriteHalf,
    }

    impl Peer {
        async fn open(address: SocketAddr) -> Self {
            let (reader, writer) = TcpStream::connect(address).await.unwrap().into_split();
            Self {
                lines: BufReader::new(reader).lines(),
                writer,
            }
        }

        async fn exchange(&mut self, raw: &[u8]) -> Response {
            self.writer.write_all(raw).await.unwrap();
            let line = timeout(Duration::from_secs(2), self.lines.next_line())
                .await
                .expect("no response from server")
                .unwrap()
                .expect("server closed the connection");
            serde_json::from_str(&line).unwrap()
        }
    }

    /// Holds every authorization request until released
    struct SlowOperator(Arc<Notify>);

    #[async_trait]
    impl AuthorizationHandler for SlowOperator {
        async fn authorize(&self, _client: &ClientSession, _arguments: &[Value]) -> bool {
            self.0.notified().await;
            true
        }
    }

    #[tokio::test]
    async fn test_unauthorized_command_rejected_then_accepted() {
        let (_mock, recorder, server) = server(true).await;

        let err = call(&server, PEER, r#"{"command": "get_battery_level"}"#)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("client is not authorized"), "{err}");
        assert!(recorder.commands.lock().unwrap().is_empty());

        assert_eq!(
            call(&server, PEER, r#"{"command": "authorize"}"#).await.unwrap(),
            json!(true)
        );
        assert_eq!(
            call(&server, PEER, r#"{"command": "authorized"}"#).await.unwrap(),
            json!(true)
        );
        assert_eq!(
            call(&server, PEER, r#"{"command": "Get_Battery_Level"}"#)
                .await
                .unwrap(),
            json!(87)
        );

        let commands = recorder.commands.lock().unwrap();
        assert_eq!(
            *commands,
            vec![("get_battery_level".to_string(), Vec::new(), json!(87))]
        );
    }

    #[tokio::test]
    async fn test_forwarded_writes_reach_device() {
        let (mock, _recorder, server) = server(true).await;
        call(&server, PEER, r#"{"command": "authorize"}"#).await.unwrap();

        call(
            &server,
            PEER,
            r#"{"command": "set_motors_speed", "arguments": [[40, 10]]}"#,
        )
        .await
        .unwrap();
        assert_eq!(
            mock.writes_to(registers::MOTOR_SPEED.address),
            vec![vec![0x01, 40, 10]]
        );
        assert_eq!(
            call(&server, PEER, r#"{"command": "get_motors_speed"}"#).await.unwrap(),
            json!([40, 10])
        );

        let err = call(
            &server,
            PEER,
            r#"{"command": "set_main_motor_speed", "arguments": [150]}"#,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Invalid parameters"), "{err}");
    }

    #[tokio::test]
    async fn test_forbidden_commands() {
        let (_mock, _recorder, server) = server(true).await;
        call(&server, PEER, r#"{"command": "authorize"}"#).await.unwrap();

        for command in ["_teardown", "notify_buttons", "notification"] {
            let line = json!({ "command": command }).to_string();
            let err = call(&server, PEER, &line).await.unwrap_err();
            assert!(err.to_string().contains("Forbidden command"), "{err}");
        }

        // Not forwarded: the session lifecycle belongs to the server
        let err = call(&server, PEER, r#"{"command": "shutdown"}"#).await.unwrap_err();
        assert!(err.to_string().contains("Unknown command"), "{err}");
    }

    #[tokio::test]
    async fn test_denied_peer_is_blocked() {
        let (_mock, _recorder, server) = server(false).await;

        assert_eq!(
            call(&server, PEER, r#"{"command": "authorize"}"#).await.unwrap(),
            json!(false)
        );
        assert_eq!(
            call(&server, PEER, r#"{"command": "authorized"}"#).await.unwrap(),
            json!("BLOCKED")
        );
        let err = call(&server, PEER, r#"{"command": "authorize"}"#)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("is blocked"), "{err}");

        let clients = server.active_clients().await;
        assert_eq!(clients.len(), 1);
        assert!(clients[0].blocked);
    }

    #[tokio::test]
    async fn test_authorize_without_handler() {
        let (_mock, session) = device().await;
        let server = ProxyServer::new(session, ProxyConfig::default());
        let err = call(&server, PEER, r#"{"command": "authorize"}"#)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no authorization handler"), "{err}");
    }

    #[tokio::test]
    async fn test_lock_and_unlock() {
        let (_mock, recorder, server) = server(true).await;

        let err = call(&server, PEER, r#"{"command": "lock"}"#).await.unwrap_err();
        assert!(err.to_string().contains("not authorized"), "{err}");

        call(&server, PEER, r#"{"command": "authorize"}"#).await.unwrap();
        call(&server, OTHER, r#"{"command": "authorize"}"#).await.unwrap();

        call(&server, PEER, r#"{"command": "lock"}"#).await.unwrap();
        call(&server, PEER, r#"{"command": "lock"}"#).await.unwrap();
        assert!(server.is_locked().await);

        let err = call(&server, OTHER, r#"{"command": "lock"}"#).await.unwrap_err();
        assert!(err.to_string().contains("locked by"), "{err}");
        let err = call(&server, OTHER, r#"{"command": "unlock"}"#).await.unwrap_err();
        assert!(err.to_string().contains("client was not locking"), "{err}");

        call(&server, PEER, r#"{"command": "unlock"}"#).await.unwrap();
        assert!(!server.is_locked().await);
        assert_eq!(*recorder.locks.lock().unwrap(), vec![true, false]);
    }

    #[tokio::test]
    async fn test_managed_commands() {
        let (_mock, recorder, server) = server(true).await;

        assert_eq!(
            call(&server, PEER, r#"{"command": "ping"}"#).await.unwrap(),
            json!("pong")
        );
        assert_eq!(
            call(&server, PEER, r#"{"command": "connected"}"#).await.unwrap(),
            json!(true)
        );
        call(&server, PEER, r#"{"command": "name", "arguments": ["desk"]}"#)
            .await
            .unwrap();
        assert_eq!(server.active_clients().await[0].display_name(), "desk");

        call(&server, PEER, r#"{"command": "quit"}"#).await.unwrap();
        assert!(server.active_clients().await.is_empty());

        assert!(recorder.commands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_requests() {
        let (_mock, _recorder, server) = server(true).await;
        for line in ["not json", r#"{"arguments": []}"#, r#"{"command": "!!"}"#] {
            let response = server.handle_request(PEER, line).await;
            assert_eq!(response.status, Status::Error);
            assert!(response.message.is_some());
        }
    }

    #[tokio::test]
    async fn test_command_handler_runs_before_device() {
        let (_mock, session) = device().await;
        let recorder = Arc::new(Recorder::default());
        let server = ProxyServer::new(session, ProxyConfig::default())
            .with_command_handler(Arc::new(Aliases))
            .with_hooks(Arc::new(PanickingHooks))
            .with_hooks(recorder.clone());

        assert_eq!(
            call(&server, PEER, r#"{"command": "status"}"#).await.unwrap(),
            json!("idle")
        );
        assert!(call(&server, PEER, r#"{"command": "explode"}"#).await.is_err());
        assert!(call(&server, PEER, r#"{"command": "get_battery_level"}"#)
            .await
            .is_err());

        let commands = recorder.commands.lock().unwrap();
        assert_eq!(*commands, vec![("status".to_string(), Vec::new(), json!("idle"))]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_gets_error_and_connection_stays_open() {
        let (_mock, session) = device().await;
        let (server, address, _task) = serve(ProxyServer::new(session, fast_config())).await;
        let mut peer = Peer::open(address).await;

        let response = peer.exchange(b"{\"command\":\"\xff\"}\n").await;
        assert_eq!(response.status, Status::Error);
        assert!(response.message.unwrap().contains("UTF-8"));

        let response = peer.exchange(b"{\"command\":\"ping\"}\n").await;
        assert_eq!(response.into_result().unwrap(), json!("pong"));
        server.stop();
    }

    #[tokio::test]
    async fn test_oversized_line_gets_error_and_connection_stays_open() {
        let (_mock, session) = device().await;
        let (server, address, _task) = serve(ProxyServer::new(session, fast_config())).await;
        let mut peer = Peer::open(address).await;

        let mut oversized = format!(r#"{{"command":"name","arguments":["{}"]}}"#, "x".repeat(1024))
            .into_bytes();
        oversized.push(b'\n');
        let response = peer.exchange(&oversized).await;
        assert_eq!(response.status, Status::Error);
        assert!(response.message.unwrap().contains("too long"));

        let response = peer.exchange(b"{\"command\":\"ping\"}\n").await;
        assert_eq!(response.into_result().unwrap(), json!("pong"));
        server.stop();
    }

    #[tokio::test]
    async fn test_run_returns_promptly_after_stop() {
        let (_mock, session) = device().await;
        let (server, address, task) = serve(ProxyServer::new(session, fast_config())).await;
        let mut peer = Peer::open(address).await;
        let response = peer.exchange(b"{\"command\":\"ping\"}\n").await;
        assert_eq!(response.status, Status::Ok);

        server.stop();
        let finished = timeout(Duration::from_secs(1), task)
            .await
            .expect("accept loop kept running after stop");
        assert!(finished.unwrap().is_ok());

        // The receive loop notices the stop too and closes the peer
        let closed = timeout(Duration::from_secs(1), peer.lines.next_line())
            .await
            .expect("peer session kept running after stop");
        assert!(closed.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_slow_authorization_does_not_block_other_peers() {
        let (_mock, session) = device().await;
        let release = Arc::new(Notify::new());
        let server = Arc::new(
            ProxyServer::new(session, ProxyConfig::default())
                .with_authorization_handler(Arc::new(SlowOperator(Arc::clone(&release)))),
        );

        let pending = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { call(&server, PEER, r#"{"command": "authorize"}"#).await })
        };
        tokio::task::yield_now().await;

        let pong = timeout(
            Duration::from_secs(1),
            call(&server, OTHER, r#"{"command": "ping"}"#),
        )
        .await
        .expect("ping waited for the operator");
        assert_eq!(pong.unwrap(), json!("pong"));
        assert_eq!(
            call(&server, OTHER, r#"{"command": "authorized"}"#).await.unwrap(),
            json!(false)
        );

        release.notify_one();
        assert_eq!(pending.await.unwrap().unwrap(), json!(true));
    }

    #[tokio::test]
    async fn test_leaving_releases_lock_and_notifies_hooks() {
        let (_mock, recorder, server) = server(true).await;
        call(&server, PEER, r#"{"command": "authorize"}"#).await.unwrap();
        call(&server, PEER, r#"{"command": "lock"}"#).await.unwrap();
        assert!(server.is_locked().await);

        call(&server, PEER, r#"{"command": "quit"}"#).await.unwrap();
        assert!(!server.is_locked().await);
        assert_eq!(*recorder.locks.lock().unwrap(), vec![true, false]);
    }

    #[tokio::test]
    async fn test_disconnecting_holder_releases_lock() {
        let (_mock, session) = device().await;
        let recorder = Arc::new(Recorder::default());
        let (server, address, _task) = serve(
            ProxyServer::new(session, fast_config())
                .with_authorization_handler(Arc::new(Operator(true)))
                .with_hooks(recorder.clone()),
        )
        .await;

        let mut peer = Peer::open(address).await;
        assert_eq!(peer.exchange(b"{\"command\":\"authorize\"}\n").await.status, Status::Ok);
        assert_eq!(peer.exchange(b"{\"command\":\"lock\"}\n").await.status, Status::Ok);
        drop(peer);

        for _ in 0..100 {
            if server.active_clients().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!server.is_locked().await);
        assert_eq!(*recorder.locks.lock().unwrap(), vec![true, false]);
        server.stop();
    }

    #[tokio::test]
    async fn test_unauthorized_peer_hears_about_authorization_first() {
        let (_mock, _recorder, server) = server(true).await;
        let err = call(&server, PEER, r#"{"command": "_teardown"}"#).await.unwrap_err();
        assert!(err.to_string().contains("client is not authorized"), "{err}");
    }
}
