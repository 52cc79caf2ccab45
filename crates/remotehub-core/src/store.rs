//! Persistence contract.
//!
//! The hub core reads devices, commands, activities and button mappings by
//! id and writes back a handful of runtime fields (online flag, last seen,
//! `last_used`). Implementations live in `remotehub-storage`.

use crate::model::{
    Activity, ActivityId, ButtonEventType, ButtonId, CommandId, Device, DeviceCommand, DeviceId,
    ModelError, RemoteId, StepId, UsbRemote, UsbRemoteButton, UsbRemoteButtonMapping,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Store error types.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Record not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Write would break a uniqueness rule.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Record violates a model invariant.
    #[error("Invalid record: {0}")]
    Invalid(String),

    /// Backend failure (I/O, database, serialization).
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<ModelError> for StoreError {
    fn from(e: ModelError) -> Self {
        StoreError::Invalid(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Backend(format!("Serialization error: {}", e))
    }
}

/// Synchronous CRUD over hub records.
pub trait HubStore: Send + Sync {
    // ========== Devices ==========

    fn get_device(&self, id: DeviceId) -> StoreResult<Option<Device>>;

    fn list_devices(&self) -> StoreResult<Vec<Device>>;

    fn save_device(&self, device: &Device) -> StoreResult<()>;

    /// Write the online flag. `last_seen` is only replaced when `Some`.
    fn set_device_liveness(
        &self,
        id: DeviceId,
        online: bool,
        last_seen: Option<DateTime<Utc>>,
    ) -> StoreResult<()>;

    // ========== Commands ==========

    fn get_command(&self, id: CommandId) -> StoreResult<Option<DeviceCommand>>;

    /// Find a device command by name, ignoring case.
    fn find_command(&self, device_id: DeviceId, name: &str) -> StoreResult<Option<DeviceCommand>>;

    fn commands_for_device(&self, device_id: DeviceId) -> StoreResult<Vec<DeviceCommand>>;

    /// Insert or replace a command. Fails with [`StoreError::Conflict`] when
    /// another command of the same device already uses the name.
    fn save_command(&self, command: &DeviceCommand) -> StoreResult<()>;

    // ========== Activities ==========

    fn get_activity(&self, id: ActivityId) -> StoreResult<Option<Activity>>;

    fn list_activities(&self) -> StoreResult<Vec<Activity>>;

    /// Insert or replace an activity after validating its steps.
    fn save_activity(&self, activity: &Activity) -> StoreResult<()>;

    /// Atomically renumber the activity's steps to follow `step_ids`.
    fn reorder_activity_steps(&self, id: ActivityId, step_ids: &[StepId]) -> StoreResult<()>;

    /// Record a successful run.
    fn touch_activity(&self, id: ActivityId, when: DateTime<Utc>) -> StoreResult<()>;

    // ========== USB remotes ==========

    fn get_remote(&self, id: RemoteId) -> StoreResult<Option<UsbRemote>>;

    fn save_remote(&self, remote: &UsbRemote) -> StoreResult<()>;

    fn find_button(&self, remote_id: RemoteId, key_code: u32) -> StoreResult<Option<UsbRemoteButton>>;

    fn save_button(&self, button: &UsbRemoteButton) -> StoreResult<()>;

    /// All mappings (enabled or not) for a button and event type.
    fn mappings_for(
        &self,
        button_id: ButtonId,
        event_type: ButtonEventType,
    ) -> StoreResult<Vec<UsbRemoteButtonMapping>>;

    fn save_mapping(&self, mapping: &UsbRemoteButtonMapping) -> StoreResult<()>;
}

/// Shared store handle.
pub type SharedStore = Arc<dyn HubStore>;

/// Run a store call on the blocking thread pool.
///
/// Backends may do file I/O, so async callers go through here rather than
/// calling [`HubStore`] methods on a runtime worker.
pub async fn blocking<T, F>(store: &SharedStore, f: F) -> StoreResult<T>
where
    F: FnOnce(&dyn HubStore) -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| StoreError::Backend(format!("Store task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConnectionType;
    use parking_lot::RwLock;
    use std::collections::HashMap;

    /// Device-only store; the rest of the contract is unused here.
    #[derive(Default)]
    struct DeviceStore {
        devices: RwLock<HashMap<DeviceId, Device>>,
    }

    impl HubStore for DeviceStore {
        fn get_device(&self, id: DeviceId) -> StoreResult<Option<Device>> {
            Ok(self.devices.read().get(&id).cloned())
        }
        fn list_devices(&self) -> StoreResult<Vec<Device>> {
            Ok(self.devices.read().values().cloned().collect())
        }
        fn save_device(&self, device: &Device) -> StoreResult<()> {
            if device.name.is_empty() {
                panic!("unnamed device");
            }
            self.devices.write().insert(device.id, device.clone());
            Ok(())
        }
        fn set_device_liveness(&self, id: DeviceId, _: bool, _: Option<DateTime<Utc>>) -> StoreResult<()> {
            Err(StoreError::NotFound(format!("device {}", id)))
        }
        fn get_command(&self, _: CommandId) -> StoreResult<Option<DeviceCommand>> {
            Ok(None)
        }
        fn find_command(&self, _: DeviceId, _: &str) -> StoreResult<Option<DeviceCommand>> {
            Ok(None)
        }
        fn commands_for_device(&self, _: DeviceId) -> StoreResult<Vec<DeviceCommand>> {
            Ok(Vec::new())
        }
        fn save_command(&self, _: &DeviceCommand) -> StoreResult<()> {
            Ok(())
        }
        fn get_activity(&self, _: ActivityId) -> StoreResult<Option<Activity>> {
            Ok(None)
        }
        fn list_activities(&self) -> StoreResult<Vec<Activity>> {
            Ok(Vec::new())
        }
        fn save_activity(&self, _: &Activity) -> StoreResult<()> {
            Ok(())
        }
        fn reorder_activity_steps(&self, _: ActivityId, _: &[StepId]) -> StoreResult<()> {
            Ok(())
        }
        fn touch_activity(&self, _: ActivityId, _: DateTime<Utc>) -> StoreResult<()> {
            Ok(())
        }
        fn get_remote(&self, _: RemoteId) -> StoreResult<Option<UsbRemote>> {
            Ok(None)
        }
        fn save_remote(&self, _: &UsbRemote) -> StoreResult<()> {
            Ok(())
        }
        fn find_button(&self, _: RemoteId, _: u32) -> StoreResult<Option<UsbRemoteButton>> {
            Ok(None)
        }
        fn save_button(&self, _: &UsbRemoteButton) -> StoreResult<()> {
            Ok(())
        }
        fn mappings_for(&self, _: ButtonId, _: ButtonEventType) -> StoreResult<Vec<UsbRemoteButtonMapping>> {
            Ok(Vec::new())
        }
        fn save_mapping(&self, _: &UsbRemoteButtonMapping) -> StoreResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_blocking_runs_store_calls() {
        let store: SharedStore = Arc::new(DeviceStore::default());
        let device = Device::new(1, "TV", ConnectionType::Infrared);

        let saved = device.clone();
        blocking(&store, move |s| s.save_device(&saved)).await.unwrap();
        let loaded = blocking(&store, |s| s.get_device(1)).await.unwrap();
        assert_eq!(loaded.map(|d| d.name), Some("TV".to_string()));

        let err = blocking(&store, |s| s.set_device_liveness(9, true, None)).await;
        assert_eq!(err, Err(StoreError::NotFound("device 9".to_string())));
    }

    #[tokio::test]
    async fn test_blocking_maps_panics_to_backend_errors() {
        let store: SharedStore = Arc::new(DeviceStore::default());
        let unnamed = Device::new(2, "", ConnectionType::Infrared);

        let result = blocking(&store, move |s| s.save_device(&unnamed)).await;
        assert!(matches!(result, Err(StoreError::Backend(_))));
        assert!(blocking(&store, |s| s.list_devices()).await.unwrap().is_empty());
    }
}
