//! Connection lifecycle management.
//!
//! Per address: `Absent -> Connecting -> Connected -> Absent`. A connect in
//! flight is a shared future stored in the slot, so concurrent callers for
//! the same address await one physical connect instead of racing. Different
//! addresses never block each other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use remotehub_core::config::ConnectionConfig;
use remotehub_core::model::{Device, DeviceId};
use thiserror::Error;

use crate::adapter::{AdapterSession, ProtocolAdapter};

/// Connection errors. `Clone` because one result fans out to every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Device {0} has no address and no default address is configured")]
    NoAddress(DeviceId),

    #[error("Connection to {0} already in progress, retry later")]
    InFlight(String),

    #[error("Connect to {address} timed out after {timeout_ms}ms")]
    Timeout { address: String, timeout_ms: u64 },

    #[error("Connect to {address} failed: {reason}")]
    Failed { address: String, reason: String },
}

/// A cached, open session.
#[derive(Clone)]
pub struct ConnectionHandle {
    address: String,
    adapter: String,
    attempt: u64,
    session: Arc<dyn AdapterSession>,
}

impl ConnectionHandle {
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Name of the adapter that opened the session.
    pub fn adapter(&self) -> &str {
        &self.adapter
    }

    pub fn session(&self) -> Arc<dyn AdapterSession> {
        self.session.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Whether two handles refer to the same physical connect.
    pub fn same_connection(&self, other: &ConnectionHandle) -> bool {
        self.attempt == other.attempt && self.address == other.address
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("address", &self.address)
            .field("adapter", &self.adapter)
            .field("attempt", &self.attempt)
            .field("connected", &self.session.is_connected())
            .finish()
    }
}

/// Observable state of one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Absent,
    Connecting,
    Connected,
}

type ConnectFuture = Shared<BoxFuture<'static, Result<ConnectionHandle, ConnectionError>>>;

enum Slot {
    Connecting { attempt: u64, connect: ConnectFuture },
    Connected(ConnectionHandle),
}

/// Per-process registry of open device sessions.
pub struct ConnectionManager {
    config: ConnectionConfig,
    slots: Mutex<HashMap<String, Slot>>,
    next_attempt: AtomicU64,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            slots: Mutex::new(HashMap::new()),
            next_attempt: AtomicU64::new(1),
        }
    }

    /// Return the cached session for the address, connecting if needed.
    ///
    /// `address` falls back to the configured default only when `None`.
    pub async fn get_connection(
        &self,
        adapter: &Arc<dyn ProtocolAdapter>,
        device: &Device,
        address: Option<&str>,
    ) -> Result<ConnectionHandle, ConnectionError> {
        let address = address
            .map(str::to_string)
            .or_else(|| self.config.default_address.clone())
            .ok_or(ConnectionError::NoAddress(device.id))?;

        let (attempt, connect) = {
            let mut slots = self.slots.lock();
            let pending = match slots.get(&address) {
                Some(Slot::Connected(handle)) if handle.is_connected() => {
                    return Ok(handle.clone());
                }
                Some(Slot::Connected(_)) => {
                    tracing::debug!(address = %address, "Cached session is dead, reconnecting");
                    None
                }
                Some(Slot::Connecting { attempt, connect }) => Some((*attempt, connect.clone())),
                None => None,
            };

            match pending {
                Some(_) if !self.config.wait_for_in_flight => {
                    return Err(ConnectionError::InFlight(address));
                }
                Some(pending) => pending,
                None => {
                    let attempt = self.next_attempt.fetch_add(1, Ordering::SeqCst);
                    let connect = self.connect_future(adapter.clone(), device.clone(), address.clone(), attempt);
                    slots.insert(
                        address.clone(),
                        Slot::Connecting {
                            attempt,
                            connect: connect.clone(),
                        },
                    );
                    (attempt, connect)
                }
            }
        };

        let result = connect.await;

        // Only the attempt still owning the slot may move it on.
        let mut slots = self.slots.lock();
        let owns_slot = matches!(
            slots.get(&address),
            Some(Slot::Connecting { attempt: current, .. }) if *current == attempt
        );
        if owns_slot {
            match &result {
                Ok(handle) => {
                    slots.insert(address.clone(), Slot::Connected(handle.clone()));
                }
                Err(_) => {
                    slots.remove(&address);
                }
            }
        }
        result
    }

    fn connect_future(
        &self,
        adapter: Arc<dyn ProtocolAdapter>,
        device: Device,
        address: String,
        attempt: u64,
    ) -> ConnectFuture {
        let timeout = self.config.connect_timeout();
        let timeout_ms = self.config.connect_timeout_ms;

        async move {
            tracing::info!(
                device_id = device.id,
                address = %address,
                adapter = adapter.name(),
                attempt,
                "Connecting"
            );
            match tokio::time::timeout(timeout, adapter.connect(&device, &address)).await {
                Ok(Ok(session)) => {
                    tracing::info!(device_id = device.id, address = %address, "Connected");
                    Ok(ConnectionHandle {
                        address,
                        adapter: adapter.name().to_string(),
                        attempt,
                        session,
                    })
                }
                Ok(Err(e)) => {
                    tracing::warn!(device_id = device.id, address = %address, error = %e, "Connect failed");
                    Err(ConnectionError::Failed {
                        address,
                        reason: e.to_string(),
                    })
                }
                Err(_) => {
                    tracing::warn!(device_id = device.id, address = %address, timeout_ms, "Connect timed out");
                    Err(ConnectionError::Timeout {
                        address,
                        timeout_ms,
                    })
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Current state of an address.
    pub fn state(&self, address: &str) -> ConnectionState {
        match self.slots.lock().get(address) {
            Some(Slot::Connecting { .. }) => ConnectionState::Connecting,
            Some(Slot::Connected(_)) => ConnectionState::Connected,
            None => ConnectionState::Absent,
        }
    }

    /// Close a session whose transport reported disconnection.
    ///
    /// The cached slot is dropped only while it still holds this same
    /// session. A newer session or a connect in flight is left alone.
    pub async fn invalidate(&self, handle: &ConnectionHandle) {
        let evicted = {
            let mut slots = self.slots.lock();
            let current = matches!(
                slots.get(handle.address()),
                Some(Slot::Connected(cached)) if cached.same_connection(handle)
            );
            if current {
                slots.remove(handle.address());
            }
            current
        };

        if evicted {
            tracing::info!(address = %handle.address(), "Invalidating connection");
        } else {
            tracing::debug!(address = %handle.address(), "Stale session closed, cache untouched");
        }
        handle.session.close().await;
    }

    /// Close every cached session.
    pub async fn shutdown(&self) {
        let handles: Vec<ConnectionHandle> = {
            let mut slots = self.slots.lock();
            slots
                .drain()
                .filter_map(|(_, slot)| match slot {
                    Slot::Connected(handle) => Some(handle),
                    Slot::Connecting { .. } => None,
                })
                .collect()
        };

        tracing::info!(count = handles.len(), "Closing connections");
        for handle in handles {
            handle.session.close().await;
        }
    }

    /// Number of cached or in-flight addresses.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}
