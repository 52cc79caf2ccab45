//! Command dispatch.
//!
//! Routes one command to the adapter claiming the device, resolves it via the
//! [`CommandMapper`], opens a session when the adapter needs one and folds
//! every adapter error into a [`DispatchError`]. Nothing raised by an adapter
//! escapes this module.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use remotehub_core::config::DispatchConfig;
use remotehub_core::model::{CommandType, ConnectionType, Device, DeviceCommand, DeviceId, LivenessStatus};
use remotehub_core::store;
use remotehub_core::{EventBus, HubEvent, SharedStore, StoreError};
use serde::Serialize;
use thiserror::Error;

use crate::adapter::{AdapterError, AdapterRegistry, AdapterSession, ProtocolAdapter};
use crate::connection::{ConnectionError, ConnectionManager};
use crate::mapping::{CommandMapper, CommandParams, NativeAction};

/// Which command of a device to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSelector {
    /// Stored command name, case-insensitive.
    Name(String),
    /// Neutral command type.
    Type(CommandType),
}

impl From<&str> for CommandSelector {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for CommandSelector {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<CommandType> for CommandSelector {
    fn from(command_type: CommandType) -> Self {
        Self::Type(command_type)
    }
}

impl std::fmt::Display for CommandSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Type(command_type) => write!(f, "{}", command_type),
        }
    }
}

/// Successful dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchReport {
    pub device_id: DeviceId,
    pub command: String,
    pub command_type: CommandType,
    pub adapter: String,
    pub action: NativeAction,
    pub elapsed_ms: u64,
}

/// Dispatch failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DispatchError {
    #[error("No adapter handles {connection_type} devices (device {device_id})")]
    AdapterNotFound {
        device_id: DeviceId,
        connection_type: ConnectionType,
    },

    #[error("Command '{command}' is not supported by adapter '{adapter}': {reason}")]
    NotSupportedByAdapter {
        adapter: String,
        command: String,
        reason: String,
    },

    #[error("Device {device_id} has no command '{command}'")]
    UnknownCommand { device_id: DeviceId, command: String },

    #[error("Transport failure on adapter '{adapter}': {detail}")]
    Transport { adapter: String, detail: String },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("Connection failed: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl DispatchError {
    /// Human-readable reason.
    pub fn reason(&self) -> String {
        self.to_string()
    }

    /// Transient, device-side failure.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Timeout { .. } | Self::Connection(_)
        )
    }
}

/// Routes commands to protocol adapters.
pub struct Dispatcher {
    registry: Arc<AdapterRegistry>,
    mapper: Arc<CommandMapper>,
    connections: Arc<ConnectionManager>,
    store: SharedStore,
    event_bus: EventBus,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        mapper: Arc<CommandMapper>,
        connections: Arc<ConnectionManager>,
        store: SharedStore,
        event_bus: EventBus,
        config: DispatchConfig,
    ) -> Self {
        Self {
            registry,
            mapper,
            connections,
            store,
            event_bus,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.registry
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Load the device by id, then [`dispatch`](Self::dispatch).
    pub async fn dispatch_to(
        &self,
        device_id: DeviceId,
        selector: impl Into<CommandSelector>,
        params: &CommandParams,
    ) -> Result<DispatchReport, DispatchError> {
        let device = store::blocking(&self.store, move |s| s.get_device(device_id))
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("device {}", device_id)))?;
        self.dispatch(&device, selector, params).await
    }

    /// Send a command, selected by name or type, to a device.
    pub async fn dispatch(
        &self,
        device: &Device,
        selector: impl Into<CommandSelector>,
        params: &CommandParams,
    ) -> Result<DispatchReport, DispatchError> {
        let selector = selector.into();
        let adapter = self.adapter_for(device)?;
        let command = self.select_command(device, selector).await?;
        self.send_with(adapter, device, &command, params).await
    }

    /// Send an already loaded command.
    pub async fn dispatch_command(
        &self,
        device: &Device,
        command: &DeviceCommand,
        params: &CommandParams,
    ) -> Result<DispatchReport, DispatchError> {
        let adapter = self.adapter_for(device)?;
        self.send_with(adapter, device, command, params).await
    }

    /// Ask the device's adapter whether the device answers.
    pub async fn test_connection(&self, device: &Device) -> Result<bool, DispatchError> {
        let adapter = self.adapter_for(device)?;
        let outcome = tokio::time::timeout(self.config.timeout(), adapter.test_connection(device)).await;
        self.fold(&adapter, device, "test_connection", outcome)
    }

    /// Ask the device's adapter for its power state.
    pub async fn device_status(&self, device: &Device) -> Result<LivenessStatus, DispatchError> {
        let adapter = self.adapter_for(device)?;
        let outcome = tokio::time::timeout(self.config.timeout(), adapter.get_status(device)).await;
        self.fold(&adapter, device, "get_status", outcome)
    }

    fn adapter_for(&self, device: &Device) -> Result<Arc<dyn ProtocolAdapter>, DispatchError> {
        self.registry.find_for(device).ok_or_else(|| {
            tracing::warn!(
                device_id = device.id,
                connection_type = %device.connection_type,
                "No adapter for device"
            );
            DispatchError::AdapterNotFound {
                device_id: device.id,
                connection_type: device.connection_type,
            }
        })
    }

    async fn select_command(
        &self,
        device: &Device,
        selector: CommandSelector,
    ) -> Result<DeviceCommand, DispatchError> {
        let device_id = device.id;
        match selector {
            CommandSelector::Name(name) => {
                let query = name.clone();
                store::blocking(&self.store, move |s| s.find_command(device_id, &query))
                    .await?
                    .ok_or(DispatchError::UnknownCommand {
                        device_id,
                        command: name,
                    })
            }
            CommandSelector::Type(command_type) => {
                let stored = store::blocking(&self.store, move |s| s.commands_for_device(device_id))
                    .await?
                    .into_iter()
                    .find(|c| c.command_type == command_type);
                // Network families need no stored payload for most types.
                Ok(stored.unwrap_or_else(|| {
                    DeviceCommand::new(0, device_id, command_type.as_str(), command_type)
                }))
            }
        }
    }

    async fn send_with(
        &self,
        adapter: Arc<dyn ProtocolAdapter>,
        device: &Device,
        command: &DeviceCommand,
        params: &CommandParams,
    ) -> Result<DispatchReport, DispatchError> {
        let started = Instant::now();

        let action = self
            .mapper
            .resolve(adapter.family(), command, params)
            .map_err(|e| DispatchError::NotSupportedByAdapter {
                adapter: adapter.name().to_string(),
                command: command.name.clone(),
                reason: e.to_string(),
            })?;

        let result = self.send_action(&adapter, device, &action).await;
        self.record_outcome(device, &command.name, &result);

        match result {
            Ok(()) => {
                tracing::info!(
                    device_id = device.id,
                    command = %command.name,
                    adapter = adapter.name(),
                    "Command dispatched"
                );
                if let Some(delay_ms) = command.delay_ms.filter(|d| *d > 0) {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                Ok(DispatchReport {
                    device_id: device.id,
                    command: command.name.clone(),
                    command_type: command.command_type,
                    adapter: adapter.name().to_string(),
                    action,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                })
            }
            Err(e) => {
                tracing::warn!(
                    device_id = device.id,
                    command = %command.name,
                    adapter = adapter.name(),
                    error = %e,
                    "Command dispatch failed"
                );
                Err(e)
            }
        }
    }

    async fn send_action(
        &self,
        adapter: &Arc<dyn ProtocolAdapter>,
        device: &Device,
        action: &NativeAction,
    ) -> Result<(), DispatchError> {
        let handle = if adapter.requires_session() {
            Some(
                self.connections
                    .get_connection(adapter, device, device.address.as_deref())
                    .await?,
            )
        } else {
            None
        };
        let session: Option<Arc<dyn AdapterSession>> = handle.as_ref().map(|h| h.session());

        let outcome = tokio::time::timeout(self.config.timeout(), adapter.send(device, session, action)).await;

        match outcome {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(DispatchError::Transport {
                adapter: adapter.name().to_string(),
                detail: "device rejected the command".to_string(),
            }),
            Ok(Err(AdapterError::Disconnected(detail))) => {
                if let Some(handle) = &handle {
                    self.connections.invalidate(handle).await;
                }
                Err(DispatchError::Transport {
                    adapter: adapter.name().to_string(),
                    detail: format!("disconnected: {}", detail),
                })
            }
            Ok(Err(e)) => Err(self.adapter_error(adapter, "send", e)),
            Err(_) => Err(DispatchError::Timeout {
                operation: "send",
                timeout_ms: self.config.timeout_ms,
            }),
        }
    }

    fn fold<T>(
        &self,
        adapter: &Arc<dyn ProtocolAdapter>,
        device: &Device,
        operation: &'static str,
        outcome: Result<Result<T, AdapterError>, tokio::time::error::Elapsed>,
    ) -> Result<T, DispatchError> {
        let result = match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(self.adapter_error(adapter, operation, e)),
            Err(_) => Err(DispatchError::Timeout {
                operation,
                timeout_ms: self.config.timeout_ms,
            }),
        };
        if let Err(e) = &result {
            tracing::debug!(device_id = device.id, operation, error = %e, "Adapter query failed");
        }
        result
    }

    fn adapter_error(
        &self,
        adapter: &Arc<dyn ProtocolAdapter>,
        operation: &'static str,
        error: AdapterError,
    ) -> DispatchError {
        match error {
            AdapterError::Timeout(timeout_ms) => DispatchError::Timeout {
                operation,
                timeout_ms,
            },
            AdapterError::Unsupported(reason) => DispatchError::NotSupportedByAdapter {
                adapter: adapter.name().to_string(),
                command: operation.to_string(),
                reason,
            },
            other => DispatchError::Transport {
                adapter: adapter.name().to_string(),
                detail: other.to_string(),
            },
        }
    }

    /// Write liveness and publish events off the caller's path.
    fn record_outcome(&self, device: &Device, command: &str, result: &Result<(), DispatchError>) {
        let success = result.is_ok();
        let reason = result.as_ref().err().map(DispatchError::reason);
        // An adapter refusing the action says nothing about reachability.
        let affects_liveness = result.as_ref().err().map_or(true, DispatchError::is_transport);
        let shared = self.store.clone();
        let event_bus = self.event_bus.clone();
        let device_id = device.id;
        let was_online = device.is_online;
        let command = command.to_string();

        tokio::spawn(async move {
            let now = Utc::now();
            if affects_liveness {
                let write = store::blocking(&shared, move |s| {
                    s.set_device_liveness(device_id, success, success.then_some(now))
                })
                .await;
                if let Err(e) = write {
                    tracing::warn!(device_id, error = %e, "Failed to record device liveness");
                }
            }

            event_bus.publish_with_source(
                HubEvent::DeviceCommandExecuted {
                    device_id,
                    command,
                    success,
                    reason,
                    timestamp: now.timestamp(),
                },
                "dispatcher",
            );

            if affects_liveness && was_online != success {
                event_bus.publish_with_source(
                    HubEvent::DeviceStatusChanged {
                        device_id,
                        old_status: online_status(was_online),
                        new_status: online_status(success),
                        timestamp: now.timestamp(),
                    },
                    "dispatcher",
                );
            }
        });
    }
}

fn online_status(online: bool) -> LivenessStatus {
    if online {
        LivenessStatus::On
    } else {
        LivenessStatus::Off
    }
}
