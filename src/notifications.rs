//! Notification subscriptions and fan-out.
//!
//! Each register address has at most one backend channel open, no matter how
//! many listeners are attached to it. The channel is opened by the first
//! listener and closed when the last one unregisters. A pump task per channel
//! filters payloads (byte-exact, when the channel is distinct-until-changed),
//! converts them with the register reader and calls every active listener in
//! registration order.

use std::{
    collections::HashMap,
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, error, info, trace, warn};

use crate::{
    error::{F1Error, Result},
    registers::{Register, RegisterValue},
    transport::{NotificationReceiver, TransportBackend},
};

/// Receives converted register values
pub trait NotificationListener: Send + Sync {
    /// Handle one notification
    ///
    /// # Errors
    ///
    /// Errors are logged by the dispatcher and never reach other listeners.
    fn on_value(&self, value: &RegisterValue) -> Result<()>;
}

impl<F> NotificationListener for F
where
    F: Fn(&RegisterValue) -> Result<()> + Send + Sync,
{
    fn on_value(&self, value: &RegisterValue) -> Result<()> {
        self(value)
    }
}

/// Ticket returned by a subscription, used to unregister it
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: u64,
    register: &'static Register,
    active: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    /// Subscription id
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Register this subscription listens to
    #[must_use]
    pub const fn register(&self) -> &'static Register {
        self.register
    }

    /// Whether notifications are still delivered to this subscription
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("register", &self.register.name)
            .field("active", &self.is_active())
            .finish()
    }
}

#[derive(Clone)]
struct Listener {
    id: u64,
    active: Arc<AtomicBool>,
    callback: Arc<dyn NotificationListener>,
}

struct Channel {
    register: &'static Register,
    distinct: bool,
    last_payload: Option<Vec<u8>>,
    listeners: Vec<Listener>,
    pump: JoinHandle<()>,
}

type Channels = Arc<Mutex<HashMap<&'static str, Channel>>>;

/// Per-register listener table on top of a [`TransportBackend`]
pub struct NotificationDispatcher {
    backend: Arc<dyn TransportBackend>,
    channels: Channels,
    next_id: AtomicU64,
}

impl NotificationDispatcher {
    /// Create a dispatcher over a backend
    #[must_use]
    pub fn new(backend: Arc<dyn TransportBackend>) -> Self {
        Self {
            backend,
            channels: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Attach a listener to a register.
    ///
    /// The first listener of an address opens the backend channel and decides
    /// whether the channel filters repeated payloads.
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::UnsupportedOperation`] for write-only registers, or the
    /// backend error if the channel cannot be opened.
    pub async fn subscribe(
        &self,
        register: &'static Register,
        listener: Arc<dyn NotificationListener>,
        distinct_until_changed: bool,
    ) -> Result<SubscriptionHandle> {
        if !register.is_readable() {
            return Err(F1Error::UnsupportedOperation(format!(
                "register {} cannot be observed",
                register.name
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));

        let mut channels = self.channels.lock().await;
        if !channels.contains_key(register.address) {
            debug!(
                target: "lelof1::notification",
                "First listener for {} {}, opening backend channel", register.address, register.name
            );
            let receiver = self.backend.subscribe(register.address).await?;
            let pump = tokio::spawn(run_pump(
                Arc::clone(&self.channels),
                register.address,
                receiver,
            ));
            channels.insert(
                register.address,
                Channel {
                    register,
                    distinct: distinct_until_changed,
                    last_payload: None,
                    listeners: Vec::new(),
                    pump,
                },
            );
        }

        if let Some(channel) = channels.get_mut(register.address) {
            if channel.distinct != distinct_until_changed {
                debug!(
                    target: "lelof1::notification",
                    "Channel {} keeps distinct_until_changed={}", register.address, channel.distinct
                );
            }
            channel.listeners.push(Listener {
                id,
                active: Arc::clone(&active),
                callback: listener,
            });
        }

        info!(
            target: "lelof1::notification",
            "Activated listener {id} for register {} {}", register.address, register.name
        );
        Ok(SubscriptionHandle {
            id,
            register,
            active,
        })
    }

    /// Detach a listener; closes the backend channel when it was the last one.
    ///
    /// Unregistering an inactive handle is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the backend error if closing the channel fails. The listener is
    /// removed either way.
    pub async fn unregister(&self, handle: &SubscriptionHandle) -> Result<()> {
        if !handle.active.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let address = handle.register.address;
        let mut channels = self.channels.lock().await;
        let Some(channel) = channels.get_mut(address) else {
            return Ok(());
        };
        channel.listeners.retain(|l| l.id != handle.id);
        debug!(
            target: "lelof1::notification",
            "Removed listener {} from {address}, {} left", handle.id, channel.listeners.len()
        );
        if !channel.listeners.is_empty() {
            return Ok(());
        }

        if let Some(channel) = channels.remove(address) {
            channel.pump.abort();
        }
        debug!(target: "lelof1::notification", "Last listener for {address} gone, closing backend channel");
        self.backend.unsubscribe(address).await
    }

    /// Detach every listener and close every backend channel.
    ///
    /// Failures are logged and skipped. Returns the number of listeners removed.
    pub async fn unregister_all(&self) -> usize {
        let mut channels = self.channels.lock().await;
        let mut removed = 0;
        for (address, channel) in channels.drain() {
            for listener in &channel.listeners {
                listener.active.store(false, Ordering::Release);
            }
            removed += channel.listeners.len();
            channel.pump.abort();
            if let Err(e) = self.backend.unsubscribe(address).await {
                warn!(target: "lelof1::notification", "Failed to close channel {address}: {e}");
            }
        }
        removed
    }

    /// Number of listeners attached to a register address
    pub async fn listener_count(&self, register: &Register) -> usize {
        self.channels
            .lock()
            .await
            .get(register.address)
            .map_or(0, |c| c.listeners.len())
    }

    /// Whether a backend channel is open for a register address
    pub async fn is_observed(&self, register: &Register) -> bool {
        self.channels.lock().await.contains_key(register.address)
    }
}

async fn run_pump(channels: Channels, address: &'static str, mut receiver: NotificationReceiver) {
    while let Some(payload) = receiver.recv().await {
        let (register, listeners) = {
            let mut channels = channels.lock().await;
            let Some(channel) = channels.get_mut(address) else {
                break;
            };
            if channel.distinct {
                if channel.last_payload.as_deref() == Some(payload.as_ref()) {
                    trace!(target: "lelof1::notification", "Unchanged payload on {address}, skipping");
                    continue;
                }
                channel.last_payload = Some(payload.to_vec());
            }
            (channel.register, channel.listeners.clone())
        };
        deliver(register, &payload, &listeners);
    }
    debug!(target: "lelof1::notification", "Pump for {address} stopped");
}

fn deliver(register: &Register, payload: &[u8], listeners: &[Listener]) {
    // An empty payload means "no data" and skips conversion
    let converted = if payload.is_empty() {
        Ok(RegisterValue::Empty)
    } else {
        register.from_device(payload)
    };
    let value = match converted {
        Ok(value) => value,
        Err(e) => {
            warn!(target: "lelof1::notification", "Dropping notification on {}: {e}", register.name);
            return;
        }
    };
    debug!(
        target: "lelof1::io",
        "NOTIFICATION {} {} >> {:?}", register.address, register.name, value
    );

    if listeners.is_empty() {
        warn!(target: "lelof1::notification", "Notification on {} with no listeners", register.name);
    }

    for listener in listeners {
        if !listener.active.load(Ordering::Acquire) {
            trace!(target: "lelof1::notification", "Listener {} inactive, skipping", listener.id);
            continue;
        }
        match catch_unwind(AssertUnwindSafe(|| listener.callback.on_value(&value))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(target: "lelof1::notification", "Listener {} failed: {e}", listener.id);
            }
            Err(_) => {
                error!(target: "lelof1::notification", "Listener {} panicked", listener.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{mock::MockBackend, registers};
    use std::time::Duration;
    use tokio::sync::mpsc;

    async fn setup() -> (Arc<MockBackend>, NotificationDispatcher) {
        let mock = Arc::new(MockBackend::new());
        mock.connect("AA:BB").await.unwrap();
        let dispatcher = NotificationDispatcher::new(mock.clone());
        (mock, dispatcher)
    }

    fn forwarding_listener() -> (Arc<dyn NotificationListener>, mpsc::UnboundedReceiver<RegisterValue>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener: Arc<dyn NotificationListener> = Arc::new(move |value: &RegisterValue| {
            tx.send(value.clone())
                .map_err(|e| F1Error::Transport(e.to_string()))
        });
        (listener, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<RegisterValue>) -> RegisterValue {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("no notification delivered")
            .expect("listener channel closed")
    }

    const GRANTED: [u8; 8] = [1, 0, 0, 0, 0, 0, 0, 0];
    const ZEROED: [u8; 8] = [0; 8];
    const SENTINEL: [u8; 8] = [9; 8];

    #[tokio::test]
    async fn test_identical_payloads_fire_once() {
        let (mock, dispatcher) = setup().await;
        let (listener, mut rx) = forwarding_listener();
        dispatcher
            .subscribe(&registers::SECURITY_ACCESS, listener, true)
            .await
            .unwrap();

        let address = registers::SECURITY_ACCESS.address;
        assert!(mock.notify(address, &GRANTED));
        assert!(mock.notify(address, &GRANTED));
        assert!(mock.notify(address, &SENTINEL));

        assert_eq!(next(&mut rx).await, RegisterValue::Bytes(GRANTED.to_vec()));
        assert_eq!(next(&mut rx).await, RegisterValue::Bytes(SENTINEL.to_vec()));
    }

    #[tokio::test]
    async fn test_different_payloads_fire_twice() {
        let (mock, dispatcher) = setup().await;
        let (listener, mut rx) = forwarding_listener();
        dispatcher
            .subscribe(&registers::SECURITY_ACCESS, listener, true)
            .await
            .unwrap();

        let address = registers::SECURITY_ACCESS.address;
        mock.notify(address, &ZEROED);
        mock.notify(address, &GRANTED);

        assert_eq!(next(&mut rx).await, RegisterValue::Bytes(ZEROED.to_vec()));
        assert_eq!(next(&mut rx).await, RegisterValue::Bytes(GRANTED.to_vec()));
    }

    #[tokio::test]
    async fn test_without_dedup_every_payload_fires() {
        let (mock, dispatcher) = setup().await;
        let (listener, mut rx) = forwarding_listener();
        dispatcher
            .subscribe(&registers::BATTERY_LEVEL, listener, false)
            .await
            .unwrap();

        mock.notify(registers::BATTERY_LEVEL.address, &[50]);
        mock.notify(registers::BATTERY_LEVEL.address, &[50]);

        assert_eq!(next(&mut rx).await, RegisterValue::Number(50));
        assert_eq!(next(&mut rx).await, RegisterValue::Number(50));
    }

    #[tokio::test]
    async fn test_one_backend_channel_per_address() {
        let (mock, dispatcher) = setup().await;
        let (first, mut first_rx) = forwarding_listener();
        let (second, mut second_rx) = forwarding_listener();

        let h1 = dispatcher.subscribe(&registers::HALL, first, false).await.unwrap();
        let h2 = dispatcher.subscribe(&registers::HALL, second, false).await.unwrap();
        assert_eq!(mock.subscribe_count(registers::HALL.address), 1);
        assert_eq!(dispatcher.listener_count(&registers::HALL).await, 2);

        mock.notify(registers::HALL.address, &[0x01, 0x00]);
        assert_eq!(next(&mut first_rx).await, RegisterValue::Number(256));
        assert_eq!(next(&mut second_rx).await, RegisterValue::Number(256));

        dispatcher.unregister(&h1).await.unwrap();
        assert!(!h1.is_active());
        assert!(mock.is_subscribed(registers::HALL.address));
        assert_eq!(mock.unsubscribe_count(registers::HALL.address), 0);

        dispatcher.unregister(&h2).await.unwrap();
        assert!(!mock.is_subscribed(registers::HALL.address));
        assert_eq!(mock.unsubscribe_count(registers::HALL.address), 1);
        assert!(!dispatcher.is_observed(&registers::HALL).await);
    }

    #[tokio::test]
    async fn test_channel_reopens_with_fresh_history() {
        let (mock, dispatcher) = setup().await;
        let address = registers::SECURITY_ACCESS.address;

        let (listener, mut rx) = forwarding_listener();
        let handle = dispatcher
            .subscribe(&registers::SECURITY_ACCESS, listener, true)
            .await
            .unwrap();
        mock.notify(address, &GRANTED);
        assert_eq!(next(&mut rx).await, RegisterValue::Bytes(GRANTED.to_vec()));
        dispatcher.unregister(&handle).await.unwrap();

        let (listener, mut rx) = forwarding_listener();
        dispatcher
            .subscribe(&registers::SECURITY_ACCESS, listener, true)
            .await
            .unwrap();
        assert_eq!(mock.subscribe_count(address), 2);

        // History was cleared, so the same payload is delivered again
        mock.notify(address, &GRANTED);
        assert_eq!(next(&mut rx).await, RegisterValue::Bytes(GRANTED.to_vec()));
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_block_others() {
        let (mock, dispatcher) = setup().await;
        let failing = |_: &RegisterValue| -> Result<()> { Err(F1Error::Validation("boom".into())) };
        let panicking = |_: &RegisterValue| -> Result<()> { panic!("listener bug") };
        let (listener, mut rx) = forwarding_listener();

        dispatcher
            .subscribe(&registers::BUTTON, Arc::new(failing), false)
            .await
            .unwrap();
        dispatcher
            .subscribe(&registers::BUTTON, Arc::new(panicking), false)
            .await
            .unwrap();
        dispatcher.subscribe(&registers::BUTTON, listener, false).await.unwrap();

        mock.notify(registers::BUTTON.address, &[0x01]);
        assert_eq!(next(&mut rx).await, RegisterValue::Number(1));

        mock.notify(registers::BUTTON.address, &[0x02]);
        assert_eq!(next(&mut rx).await, RegisterValue::Number(2));
    }

    #[tokio::test]
    async fn test_unregister_all_skips_failures() {
        let (mock, dispatcher) = setup().await;
        mock.fail_unsubscribe(registers::LENGTH.address);

        let (a, _rx_a) = forwarding_listener();
        let (b, _rx_b) = forwarding_listener();
        let h1 = dispatcher.subscribe(&registers::LENGTH, a, true).await.unwrap();
        let h2 = dispatcher.subscribe(&registers::HALL, b, true).await.unwrap();

        assert_eq!(dispatcher.unregister_all().await, 2);
        assert!(!h1.is_active());
        assert!(!h2.is_active());
        assert!(!mock.is_subscribed(registers::HALL.address));
        assert!(!dispatcher.is_observed(&registers::LENGTH).await);
    }

    #[tokio::test]
    async fn test_write_only_register_cannot_be_observed() {
        let (_mock, dispatcher) = setup().await;
        let (listener, _rx) = forwarding_listener();
        let result = dispatcher.subscribe(&registers::SHUTDOWN, listener, true).await;
        assert!(matches!(result, Err(F1Error::UnsupportedOperation(_))));
    }

    #[tokio::test]
    async fn test_empty_payload_is_no_data_state() {
        let (mock, dispatcher) = setup().await;
        let (listener, mut rx) = forwarding_listener();
        dispatcher
            .subscribe(&registers::SECURITY_ACCESS, listener, true)
            .await
            .unwrap();

        let address = registers::SECURITY_ACCESS.address;
        mock.notify(address, &[]);
        mock.notify(address, &[]);
        mock.notify(address, &GRANTED);
        mock.notify(address, &[]);

        assert_eq!(next(&mut rx).await, RegisterValue::Empty);
        assert_eq!(next(&mut rx).await, RegisterValue::Bytes(GRANTED.to_vec()));
        assert_eq!(next(&mut rx).await, RegisterValue::Empty);
        assert!(tokio::time::timeout(Duration::from_millis(50), rx.recv()).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_listener_unregistered_mid_delivery_is_skipped() {
        let (mock, dispatcher) = setup().await;

        // The first listener parks on the first payload until released
        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = std::sync::Mutex::new(release_rx);
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let blocking = move |value: &RegisterValue| -> Result<()> {
            if *value == RegisterValue::Number(1) {
                let _ = started_tx.send(());
                let _ = release_rx
                    .lock()
                    .unwrap()
                    .recv_timeout(Duration::from_secs(2));
            }
            let _ = seen_tx.send(value.clone());
            Ok(())
        };
        let calls = Arc::new(AtomicU64::new(0));
        let counted = {
            let calls = Arc::clone(&calls);
            move |_: &RegisterValue| -> Result<()> {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        };

        dispatcher
            .subscribe(&registers::BUTTON, Arc::new(blocking), false)
            .await
            .unwrap();
        let second = dispatcher
            .subscribe(&registers::BUTTON, Arc::new(counted), false)
            .await
            .unwrap();

        mock.notify(registers::BUTTON.address, &[0x01]);
        tokio::time::timeout(Duration::from_secs(1), started_rx.recv())
            .await
            .unwrap()
            .unwrap();
        dispatcher.unregister(&second).await.unwrap();
        release_tx.send(()).unwrap();

        mock.notify(registers::BUTTON.address, &[0x02]);
        assert_eq!(next(&mut seen_rx).await, RegisterValue::Number(1));
        assert_eq!(next(&mut seen_rx).await, RegisterValue::Number(2));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
