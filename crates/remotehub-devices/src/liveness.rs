//! Liveness monitor.
//!
//! Callers only enqueue register/de-register requests through a
//! [`LivenessHandle`]. The [`LivenessPoller`] owns the status table: each
//! tick drains the request queue, probes every registered device concurrently and
//! publishes a fresh snapshot for readers.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use remotehub_core::config::LivenessConfig;
use remotehub_core::model::{DeviceId, LivenessStatus};
use remotehub_core::store;
use remotehub_core::{EventBus, HubEvent, SharedStore};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::probe::ReachabilityProbe;

/// Status table entry for one registered device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LivenessEntry {
    pub device_id: DeviceId,
    pub address: String,
    pub status: LivenessStatus,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Read-only view of the status table.
pub type LivenessSnapshot = Arc<HashMap<DeviceId, LivenessEntry>>;

enum LivenessRequest {
    Register { device_id: DeviceId, address: String },
    Deregister { device_id: DeviceId },
}

impl LivenessRequest {
    fn device_id(&self) -> DeviceId {
        match self {
            Self::Register { device_id, .. } | Self::Deregister { device_id } => *device_id,
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub registered: usize,
    pub deregistered: usize,
    pub probed: usize,
    pub changed: usize,
}

/// Cheap, cloneable front door to the monitor.
#[derive(Clone)]
pub struct LivenessHandle {
    requests: mpsc::UnboundedSender<LivenessRequest>,
    snapshot: watch::Receiver<LivenessSnapshot>,
    shutdown: CancellationToken,
}

impl LivenessHandle {
    /// Queue a device for polling. Applied at the start of the next tick.
    pub fn register(&self, device_id: DeviceId, address: impl Into<String>) {
        let request = LivenessRequest::Register {
            device_id,
            address: address.into(),
        };
        if self.requests.send(request).is_err() {
            tracing::debug!(device_id, "Liveness poller gone, registration dropped");
        }
    }

    /// Queue a device for removal. Applied at the start of the next tick.
    pub fn deregister(&self, device_id: DeviceId) {
        if self.requests.send(LivenessRequest::Deregister { device_id }).is_err() {
            tracing::debug!(device_id, "Liveness poller gone, de-registration dropped");
        }
    }

    /// Last known status. Unregistered ids are `Unknown`.
    pub fn status(&self, device_id: DeviceId) -> LivenessStatus {
        self.snapshot
            .borrow()
            .get(&device_id)
            .map(|e| e.status)
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> LivenessSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Stop the poll loop after its current tick.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Owner of the status table.
pub struct LivenessPoller {
    requests: mpsc::UnboundedReceiver<LivenessRequest>,
    entries: HashMap<DeviceId, LivenessEntry>,
    probe: Arc<dyn ReachabilityProbe>,
    config: LivenessConfig,
    store: Option<SharedStore>,
    event_bus: Option<EventBus>,
    snapshot: watch::Sender<LivenessSnapshot>,
    shutdown: CancellationToken,
}

/// Constructor for the handle/poller pair.
pub struct LivenessMonitor;

impl LivenessMonitor {
    pub fn new(
        config: LivenessConfig,
        probe: Arc<dyn ReachabilityProbe>,
    ) -> (LivenessHandle, LivenessPoller) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(HashMap::new()));
        let shutdown = CancellationToken::new();

        let handle = LivenessHandle {
            requests: request_tx,
            snapshot: snapshot_rx,
            shutdown: shutdown.clone(),
        };
        let poller = LivenessPoller {
            requests: request_rx,
            entries: HashMap::new(),
            probe,
            config,
            store: None,
            event_bus: None,
            snapshot: snapshot_tx,
            shutdown,
        };
        (handle, poller)
    }
}

impl LivenessPoller {
    /// Write online flags to the store on status changes.
    pub fn with_store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Publish `DeviceStatusChanged` on status changes.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Run one poll tick.
    pub async fn tick(&mut self) -> TickSummary {
        let mut summary = self.drain_requests();

        let targets: Vec<(DeviceId, String)> = self
            .entries
            .values()
            .map(|e| (e.device_id, e.address.clone()))
            .collect();
        summary.probed = targets.len();

        let timeout = self.config.probe_timeout();
        let probe = &self.probe;
        let results = join_all(targets.into_iter().map(|(device_id, address)| async move {
            let reachable = tokio::time::timeout(timeout, probe.probe(&address))
                .await
                .unwrap_or(false);
            (device_id, reachable)
        }))
        .await;

        let now = Utc::now();
        let mut changes = Vec::new();
        for (device_id, reachable) in results {
            // Only this task mutates entries, so the id is still registered.
            let Some(entry) = self.entries.get_mut(&device_id) else {
                continue;
            };
            let new_status = if reachable {
                LivenessStatus::On
            } else {
                LivenessStatus::Off
            };
            entry.last_checked = Some(now);
            if reachable {
                entry.last_seen = Some(now);
            }
            if entry.status != new_status {
                changes.push((device_id, entry.status, new_status));
                entry.status = new_status;
            }
        }
        summary.changed = changes.len();

        self.snapshot.send_replace(Arc::new(self.entries.clone()));

        for (device_id, old_status, new_status) in changes {
            self.apply_change(device_id, old_status, new_status, now).await;
        }

        tracing::debug!(
            registered = summary.registered,
            deregistered = summary.deregistered,
            probed = summary.probed,
            changed = summary.changed,
            "Liveness tick"
        );
        summary
    }

    /// Drain the request queue. Only the last request sent for each id is
    /// applied.
    fn drain_requests(&mut self) -> TickSummary {
        let mut summary = TickSummary::default();

        let mut latest: HashMap<DeviceId, LivenessRequest> = HashMap::new();
        while let Ok(request) = self.requests.try_recv() {
            latest.insert(request.device_id(), request);
        }

        for request in latest.into_values() {
            match request {
                LivenessRequest::Deregister { device_id } => {
                    if self.entries.remove(&device_id).is_some() {
                        summary.deregistered += 1;
                        tracing::info!(device_id, "Device removed from liveness polling");
                    }
                }
                LivenessRequest::Register { device_id, address } => {
                    match self.entries.get_mut(&device_id) {
                        Some(entry) if entry.address == address => {}
                        Some(entry) => {
                            entry.address = address;
                            entry.status = LivenessStatus::Unknown;
                        }
                        None => {
                            tracing::info!(
                                device_id,
                                address = %address,
                                "Device registered for liveness polling"
                            );
                            self.entries.insert(
                                device_id,
                                LivenessEntry {
                                    device_id,
                                    address,
                                    status: LivenessStatus::Unknown,
                                    last_checked: None,
                                    last_seen: None,
                                },
                            );
                            summary.registered += 1;
                        }
                    }
                }
            }
        }

        summary
    }

    async fn apply_change(
        &self,
        device_id: DeviceId,
        old_status: LivenessStatus,
        new_status: LivenessStatus,
        now: DateTime<Utc>,
    ) {
        tracing::info!(
            device_id,
            old_status = %old_status,
            new_status = %new_status,
            "Device status changed"
        );

        if let Some(shared) = &self.store {
            let online = new_status == LivenessStatus::On;
            let write = store::blocking(shared, move |s| {
                s.set_device_liveness(device_id, online, online.then_some(now))
            })
            .await;
            if let Err(e) = write {
                tracing::debug!(device_id, error = %e, "Liveness not persisted");
            }
        }

        if let Some(event_bus) = &self.event_bus {
            event_bus.publish_with_source(
                HubEvent::DeviceStatusChanged {
                    device_id,
                    old_status,
                    new_status,
                    timestamp: now.timestamp(),
                },
                "liveness",
            );
        }
    }

    /// Poll on the configured interval until shut down.
    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(self.config.poll_interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            interval_secs = self.config.poll_interval_secs,
            "Liveness monitor started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = timer.tick() => {
                    self.tick().await;
                }
            }
        }

        tracing::info!("Liveness monitor stopped");
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
