//! Protocol adapter interface.
//!
//! One adapter per transport (infrared, Bluetooth HID, WebOS, Tizen, USB,
//! raw network). The hub never talks to a device directly: it picks the
//! adapter claiming the device's [`ConnectionType`], maps the command with
//! the adapter's [`DeviceFamily`] table and hands over a [`NativeAction`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use remotehub_core::model::{ConnectionType, Device, DeviceId, LivenessStatus};
use thiserror::Error;

use crate::mapping::{DeviceFamily, NativeAction};

/// Result type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Error type for protocol adapter operations.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Could not open a session
    #[error("Connection error: {0}")]
    Connection(String),

    /// The session dropped; the cached connection is stale
    #[error("Disconnected: {0}")]
    Disconnected(String),

    /// Communication error
    #[error("Communication error: {0}")]
    Communication(String),

    /// The adapter cannot perform this action
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Operation timeout
    #[error("Operation timeout after {0}ms")]
    Timeout(u64),

    /// Other error
    #[error("Adapter error: {0}")]
    Other(#[from] anyhow::Error),
}

/// An open session with one device address.
#[async_trait]
pub trait AdapterSession: Send + Sync {
    /// Whether the transport still considers the session usable.
    fn is_connected(&self) -> bool;

    /// Close the session. Must be safe to call more than once.
    async fn close(&self);

    /// Get this session as `Any` for downcasting by its adapter.
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Protocol adapter trait.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    /// Get the adapter name.
    fn name(&self) -> &str;

    /// Command vocabulary this adapter speaks.
    fn family(&self) -> DeviceFamily;

    /// Connection types this adapter claims.
    fn connection_types(&self) -> &[ConnectionType];

    /// Does this adapter handle the device.
    fn supports(&self, device: &Device) -> bool {
        self.connection_types().contains(&device.connection_type)
    }

    /// Whether [`send`](Self::send) needs a session from [`connect`](Self::connect).
    fn requires_session(&self) -> bool {
        false
    }

    /// Open a session with the device at `address`.
    async fn connect(&self, device: &Device, address: &str) -> AdapterResult<Arc<dyn AdapterSession>> {
        let _ = (device, address);
        Err(AdapterError::Unsupported(format!(
            "{} does not use sessions",
            self.name()
        )))
    }

    /// Send one native action. `Ok(false)` means the device refused it.
    async fn send(
        &self,
        device: &Device,
        session: Option<Arc<dyn AdapterSession>>,
        action: &NativeAction,
    ) -> AdapterResult<bool>;

    /// Check that the device answers.
    async fn test_connection(&self, device: &Device) -> AdapterResult<bool>;

    /// Report the device's power/reachability state.
    async fn get_status(&self, device: &Device) -> AdapterResult<LivenessStatus> {
        Ok(if self.test_connection(device).await? {
            LivenessStatus::On
        } else {
            LivenessStatus::Off
        })
    }
}

/// Registry construction errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Adapter '{0}' is already registered")]
    DuplicateName(String),

    #[error("Adapter '{adapter}' claims {connection_type}, already handled by '{existing}'")]
    Overlap {
        adapter: String,
        existing: String,
        connection_type: ConnectionType,
    },
}

/// Set of adapters with disjoint connection types.
///
/// Disjointness is checked on registration, so every device is claimed by
/// at most one adapter.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn ProtocolAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter.
    pub fn register(&mut self, adapter: Arc<dyn ProtocolAdapter>) -> Result<(), RegistryError> {
        for existing in &self.adapters {
            if existing.name() == adapter.name() {
                return Err(RegistryError::DuplicateName(adapter.name().to_string()));
            }
            if let Some(connection_type) = adapter
                .connection_types()
                .iter()
                .find(|t| existing.connection_types().contains(t))
            {
                return Err(RegistryError::Overlap {
                    adapter: adapter.name().to_string(),
                    existing: existing.name().to_string(),
                    connection_type: *connection_type,
                });
            }
        }

        tracing::info!(
            adapter = adapter.name(),
            family = %adapter.family(),
            connection_types = ?adapter.connection_types(),
            "Registered protocol adapter"
        );
        self.adapters.push(adapter);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_adapter(mut self, adapter: Arc<dyn ProtocolAdapter>) -> Result<Self, RegistryError> {
        self.register(adapter)?;
        Ok(self)
    }

    /// The adapter claiming this device, if any.
    pub fn find_for(&self, device: &Device) -> Option<Arc<dyn ProtocolAdapter>> {
        self.adapters.iter().find(|a| a.supports(device)).cloned()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ProtocolAdapter>> {
        self.adapters.iter().find(|a| a.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

/// Record of one action received by a [`MockAdapter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentAction {
    pub device_id: DeviceId,
    pub action: NativeAction,
}

/// Session handed out by [`MockAdapter`].
pub struct MockSession {
    address: String,
    connected: AtomicBool,
}

impl MockSession {
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Simulate the transport dropping the session.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl AdapterSession for MockSession {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Mock adapter for testing.
///
/// Records every action it receives. Failure modes are set per device and
/// can be changed while the adapter is shared.
pub struct MockAdapter {
    name: String,
    family: DeviceFamily,
    connection_types: Vec<ConnectionType>,
    requires_session: bool,
    connect_delay: Mutex<Duration>,
    send_delay: Mutex<Duration>,
    connects: AtomicUsize,
    fail_connect: AtomicBool,
    failing: Mutex<HashSet<DeviceId>>,
    refusing: Mutex<HashSet<DeviceId>>,
    disconnecting: Mutex<HashSet<DeviceId>>,
    unreachable: Mutex<HashSet<DeviceId>>,
    sent: Mutex<Vec<SentAction>>,
}

impl MockAdapter {
    /// Create a new mock adapter.
    pub fn new(
        name: impl Into<String>,
        family: DeviceFamily,
        connection_types: impl IntoIterator<Item = ConnectionType>,
    ) -> Self {
        Self {
            name: name.into(),
            family,
            connection_types: connection_types.into_iter().collect(),
            requires_session: false,
            connect_delay: Mutex::new(Duration::ZERO),
            send_delay: Mutex::new(Duration::ZERO),
            connects: AtomicUsize::new(0),
            fail_connect: AtomicBool::new(false),
            failing: Mutex::new(HashSet::new()),
            refusing: Mutex::new(HashSet::new()),
            disconnecting: Mutex::new(HashSet::new()),
            unreachable: Mutex::new(HashSet::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Mock claiming one connection type with its usual family.
    pub fn for_type(name: impl Into<String>, connection_type: ConnectionType) -> Self {
        Self::new(
            name,
            DeviceFamily::for_connection_type(connection_type),
            [connection_type],
        )
    }

    /// Require a session before sending.
    pub fn with_sessions(mut self) -> Self {
        self.requires_session = true;
        self
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock() = delay;
    }

    pub fn set_send_delay(&self, delay: Duration) {
        *self.send_delay.lock() = delay;
    }

    pub fn set_connect_failure(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Sends to this device raise a communication error.
    pub fn fail_device(&self, device_id: DeviceId) {
        self.failing.lock().insert(device_id);
    }

    /// Sends to this device return `Ok(false)`.
    pub fn refuse_device(&self, device_id: DeviceId) {
        self.refusing.lock().insert(device_id);
    }

    /// Sends to this device report a dropped session.
    pub fn disconnect_device(&self, device_id: DeviceId) {
        self.disconnecting.lock().insert(device_id);
    }

    /// `test_connection` reports this device as down.
    pub fn set_unreachable(&self, device_id: DeviceId) {
        self.unreachable.lock().insert(device_id);
    }

    /// Clear every per-device failure mode.
    pub fn heal(&self, device_id: DeviceId) {
        self.failing.lock().remove(&device_id);
        self.refusing.lock().remove(&device_id);
        self.disconnecting.lock().remove(&device_id);
        self.unreachable.lock().remove(&device_id);
    }

    /// Number of physical connects performed.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Actions received so far, in order.
    pub fn sent(&self) -> Vec<SentAction> {
        self.sent.lock().clone()
    }

    /// Ids of devices that received an action, in order.
    pub fn sent_devices(&self) -> Vec<DeviceId> {
        self.sent.lock().iter().map(|s| s.device_id).collect()
    }
}

#[async_trait]
impl ProtocolAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> DeviceFamily {
        self.family
    }

    fn connection_types(&self) -> &[ConnectionType] {
        &self.connection_types
    }

    fn requires_session(&self) -> bool {
        self.requires_session
    }

    async fn connect(&self, _device: &Device, address: &str) -> AdapterResult<Arc<dyn AdapterSession>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(AdapterError::Connection(format!("{} refused", address)));
        }
        Ok(Arc::new(MockSession {
            address: address.to_string(),
            connected: AtomicBool::new(true),
        }))
    }

    async fn send(
        &self,
        device: &Device,
        session: Option<Arc<dyn AdapterSession>>,
        action: &NativeAction,
    ) -> AdapterResult<bool> {
        if self.requires_session && !session.as_ref().is_some_and(|s| s.is_connected()) {
            return Err(AdapterError::Disconnected("no open session".to_string()));
        }

        let delay = *self.send_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.disconnecting.lock().contains(&device.id) {
            return Err(AdapterError::Disconnected(format!("device {} went away", device.id)));
        }
        if self.failing.lock().contains(&device.id) {
            return Err(AdapterError::Communication(format!(
                "device {} did not acknowledge",
                device.id
            )));
        }

        self.sent.lock().push(SentAction {
            device_id: device.id,
            action: action.clone(),
        });
        Ok(!self.refusing.lock().contains(&device.id))
    }

    async fn test_connection(&self, device: &Device) -> AdapterResult<bool> {
        Ok(!self.unreachable.lock().contains(&device.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tv(connection_type: ConnectionType) -> Device {
        Device::new(1, "TV", connection_type)
    }

    #[test]
    fn test_registry_selects_by_connection_type() {
        let registry = AdapterRegistry::new()
            .with_adapter(Arc::new(MockAdapter::for_type("ir", ConnectionType::Infrared)))
            .unwrap()
            .with_adapter(Arc::new(MockAdapter::for_type("webos", ConnectionType::WebOs)))
            .unwrap();

        let adapter = registry.find_for(&tv(ConnectionType::WebOs)).unwrap();
        assert_eq!(adapter.name(), "webos");
        assert_eq!(adapter.family(), DeviceFamily::WebOs);
        assert!(registry.find_for(&tv(ConnectionType::Tizen)).is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_registry_rejects_overlap() {
        let mut registry = AdapterRegistry::new();
        registry
            .register(Arc::new(MockAdapter::new(
                "network",
                DeviceFamily::GenericNetwork,
                [ConnectionType::NetworkTcp, ConnectionType::NetworkWebSocket],
            )))
            .unwrap();

        let err = registry
            .register(Arc::new(MockAdapter::for_type(
                "ws",
                ConnectionType::NetworkWebSocket,
            )))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::Overlap {
                adapter: "ws".to_string(),
                existing: "network".to_string(),
                connection_type: ConnectionType::NetworkWebSocket,
            }
        );

        let err = registry
            .register(Arc::new(MockAdapter::for_type("network", ConnectionType::Usb)))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(_)));
    }

    #[tokio::test]
    async fn test_default_get_status_uses_test_connection() {
        let adapter = MockAdapter::for_type("tizen", ConnectionType::Tizen);
        let device = tv(ConnectionType::Tizen);
        assert_eq!(adapter.get_status(&device).await.unwrap(), LivenessStatus::On);

        adapter.set_unreachable(device.id);
        assert_eq!(adapter.get_status(&device).await.unwrap(), LivenessStatus::Off);
    }

    #[tokio::test]
    async fn test_mock_records_actions() {
        let adapter = MockAdapter::for_type("ir", ConnectionType::Infrared);
        let device = tv(ConnectionType::Infrared);
        let action = NativeAction::IrCode {
            code: "0xE0E040BF".to_string(),
        };

        assert!(adapter.send(&device, None, &action).await.unwrap());
        adapter.refuse_device(device.id);
        assert!(!adapter.send(&device, None, &action).await.unwrap());
        assert_eq!(adapter.sent().len(), 2);

        adapter.fail_device(device.id);
        assert!(matches!(
            adapter.send(&device, None, &action).await,
            Err(AdapterError::Communication(_))
        ));
    }
}
