//! Hub assembly.
//!
//! [`HubBuilder`] wires the dispatcher, connection manager, orchestrator,
//! button executor and liveness monitor around one store and one event bus.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use remotehub_core::model::{ActivityId, ButtonEventType, Device, DeviceId, RemoteId};
use remotehub_core::{EventBus, HubConfig, SharedStore};
use remotehub_devices::{
    AdapterRegistry, CommandMapper, CommandParams, CommandSelector, ConnectionManager,
    DispatchError, DispatchReport, Dispatcher, LivenessHandle, LivenessMonitor, LivenessPoller,
    ProtocolAdapter, ReachabilityProbe, TcpProbe,
};
use remotehub_storage::RedbStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::buttons::{ButtonMappingExecutor, MappingExecution};
use crate::error::{AutomationError, HubError};
use crate::orchestrator::{ActivityOrchestrator, ActivityRunReport};

/// Builder for [`Hub`].
pub struct HubBuilder {
    config: HubConfig,
    store: Option<SharedStore>,
    adapters: Vec<Arc<dyn ProtocolAdapter>>,
    probe: Option<Arc<dyn ReachabilityProbe>>,
    mapper: Option<CommandMapper>,
    event_bus: Option<EventBus>,
}

impl HubBuilder {
    pub fn new() -> Self {
        Self {
            config: HubConfig::default(),
            store: None,
            adapters: Vec::new(),
            probe: None,
            mapper: None,
            event_bus: None,
        }
    }

    pub fn config(mut self, config: HubConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this store instead of opening the configured redb file.
    pub fn store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn adapter(mut self, adapter: Arc<dyn ProtocolAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn adapters(mut self, adapters: impl IntoIterator<Item = Arc<dyn ProtocolAdapter>>) -> Self {
        self.adapters.extend(adapters);
        self
    }

    /// Reachability probe for the liveness monitor. Defaults to [`TcpProbe`].
    pub fn probe(mut self, probe: Arc<dyn ReachabilityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn mapper(mut self, mapper: CommandMapper) -> Self {
        self.mapper = Some(mapper);
        self
    }

    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn build(self) -> Result<Hub, HubError> {
        let config = self.config;
        config.validate()?;

        let store: SharedStore = match self.store {
            Some(store) => store,
            None => Arc::new(RedbStore::open(&config.storage.path)?),
        };
        let event_bus = self
            .event_bus
            .unwrap_or_else(|| EventBus::with_capacity(config.events.channel_capacity));

        let mut registry = AdapterRegistry::new();
        for adapter in self.adapters {
            registry.register(adapter)?;
        }
        if registry.is_empty() {
            tracing::warn!("Hub built without protocol adapters");
        }

        let connections = Arc::new(ConnectionManager::new(config.connection.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(registry),
            Arc::new(self.mapper.unwrap_or_default()),
            connections,
            store.clone(),
            event_bus.clone(),
            config.dispatch.clone(),
        ));
        let orchestrator = ActivityOrchestrator::new(
            store.clone(),
            dispatcher.clone(),
            event_bus.clone(),
            config.activity.clone(),
        );
        let buttons = ButtonMappingExecutor::new(store.clone(), dispatcher.clone(), event_bus.clone());

        let probe: Arc<dyn ReachabilityProbe> = match self.probe {
            Some(probe) => probe,
            None => Arc::new(TcpProbe::new(config.liveness.probe_ports.iter().copied())),
        };
        let (liveness, poller) = LivenessMonitor::new(config.liveness.clone(), probe);
        let poller = poller.with_store(store.clone()).with_event_bus(event_bus.clone());

        Ok(Hub {
            config,
            store,
            event_bus,
            dispatcher,
            orchestrator,
            buttons,
            liveness,
            poller: Mutex::new(Some(poller)),
            poll_task: Mutex::new(None),
            started: AtomicBool::new(false),
            poller_taken: AtomicBool::new(false),
        })
    }
}

impl Default for HubBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running device-control hub.
pub struct Hub {
    config: HubConfig,
    store: SharedStore,
    event_bus: EventBus,
    dispatcher: Arc<Dispatcher>,
    orchestrator: ActivityOrchestrator,
    buttons: ButtonMappingExecutor,
    liveness: LivenessHandle,
    poller: Mutex<Option<LivenessPoller>>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    poller_taken: AtomicBool,
}

impl Hub {
    pub fn builder() -> HubBuilder {
        HubBuilder::new()
    }

    /// Register stored devices for liveness polling and start the poll loop.
    ///
    /// Returns the number of devices registered. Nothing is registered while
    /// polling is disabled and no poller has been taken. Calling it again is
    /// a no-op.
    pub fn start(&self) -> Result<usize, HubError> {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("Hub already started");
            return Ok(0);
        }

        let registered = if self.polling_active() {
            self.register_stored()?
        } else {
            0
        };

        if self.config.liveness.enabled {
            if let Some(poller) = self.poller.lock().take() {
                *self.poll_task.lock() = Some(poller.spawn());
            }
        } else {
            tracing::info!("Liveness polling disabled");
        }

        tracing::info!(
            registered,
            adapters = self.dispatcher.registry().len(),
            "Hub started"
        );
        Ok(registered)
    }

    /// Stop polling and close cached connections.
    pub async fn shutdown(&self) {
        self.liveness.shutdown();
        let task = self.poll_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Liveness task ended abnormally");
            }
        }
        self.dispatcher.connections().shutdown().await;
        tracing::info!("Hub stopped");
    }

    /// Take the liveness poller to drive ticks by hand.
    ///
    /// `None` once [`start`](Self::start) has spawned it. Taken after a
    /// start with polling disabled, the stored devices are registered with it.
    pub fn take_poller(&self) -> Option<LivenessPoller> {
        let poller = self.poller.lock().take()?;
        self.poller_taken.store(true, Ordering::SeqCst);
        if !self.config.liveness.enabled && self.started.load(Ordering::SeqCst) {
            match self.register_stored() {
                Ok(registered) => tracing::info!(registered, "Manual liveness polling"),
                Err(e) => tracing::warn!(error = %e, "Failed to register stored devices"),
            }
        }
        Some(poller)
    }

    /// Save a device and, when it has an address, register it for polling.
    pub fn add_device(&self, device: &Device) -> Result<(), HubError> {
        self.store.save_device(device)?;
        if let Some(address) = device.address.as_deref() {
            if self.polling_active() {
                self.liveness.register(device.id, address);
            }
        }
        Ok(())
    }

    /// Stop polling a device. The stored record is kept.
    pub fn forget_device(&self, device_id: DeviceId) {
        if self.polling_active() {
            self.liveness.deregister(device_id);
        }
    }

    /// Whether anything will drain liveness requests.
    fn polling_active(&self) -> bool {
        self.config.liveness.enabled || self.poller_taken.load(Ordering::SeqCst)
    }

    fn register_stored(&self) -> Result<usize, HubError> {
        let mut registered = 0;
        for device in self.store.list_devices()? {
            if let Some(address) = device.address.as_deref() {
                self.liveness.register(device.id, address);
                registered += 1;
            }
        }
        Ok(registered)
    }

    pub async fn dispatch(
        &self,
        device_id: DeviceId,
        selector: impl Into<CommandSelector>,
        params: &CommandParams,
    ) -> Result<DispatchReport, DispatchError> {
        self.dispatcher.dispatch_to(device_id, selector, params).await
    }

    pub async fn run_activity(
        &self,
        activity_id: ActivityId,
        cancel: &CancellationToken,
    ) -> Result<ActivityRunReport, AutomationError> {
        self.orchestrator.execute(activity_id, cancel).await
    }

    pub async fn on_button_event(
        &self,
        remote_id: RemoteId,
        key_code: u32,
        event_type: ButtonEventType,
    ) -> Result<Vec<MappingExecution>, HubError> {
        Ok(self
            .buttons
            .on_button_event(remote_id, key_code, event_type)
            .await?)
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn orchestrator(&self) -> &ActivityOrchestrator {
        &self.orchestrator
    }

    pub fn buttons(&self) -> &ButtonMappingExecutor {
        &self.buttons
    }

    pub fn liveness(&self) -> &LivenessHandle {
        &self.liveness
    }
}
