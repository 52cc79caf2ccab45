//! In-memory store.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use remotehub_core::model::*;
use remotehub_core::{HubStore, StoreError, StoreResult};
use std::collections::BTreeMap;

#[derive(Default)]
struct Tables {
    devices: BTreeMap<DeviceId, Device>,
    commands: BTreeMap<CommandId, DeviceCommand>,
    activities: BTreeMap<ActivityId, Activity>,
    remotes: BTreeMap<RemoteId, UsbRemote>,
    buttons: BTreeMap<ButtonId, UsbRemoteButton>,
    mappings: BTreeMap<MappingId, UsbRemoteButtonMapping>,
}

/// [`HubStore`] kept entirely in process memory.
///
/// Every operation takes the single table lock, so multi-record updates
/// such as step reordering are atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HubStore for MemoryStore {
    fn get_device(&self, id: DeviceId) -> StoreResult<Option<Device>> {
        Ok(self.tables.read().devices.get(&id).cloned())
    }

    fn list_devices(&self) -> StoreResult<Vec<Device>> {
        Ok(self.tables.read().devices.values().cloned().collect())
    }

    fn save_device(&self, device: &Device) -> StoreResult<()> {
        self.tables.write().devices.insert(device.id, device.clone());
        Ok(())
    }

    fn set_device_liveness(
        &self,
        id: DeviceId,
        online: bool,
        last_seen: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let device = tables
            .devices
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("device {}", id)))?;
        device.is_online = online;
        if last_seen.is_some() {
            device.last_seen = last_seen;
        }
        Ok(())
    }

    fn get_command(&self, id: CommandId) -> StoreResult<Option<DeviceCommand>> {
        Ok(self.tables.read().commands.get(&id).cloned())
    }

    fn find_command(&self, device_id: DeviceId, name: &str) -> StoreResult<Option<DeviceCommand>> {
        Ok(self
            .tables
            .read()
            .commands
            .values()
            .find(|c| c.device_id == device_id && c.name_matches(name))
            .cloned())
    }

    fn commands_for_device(&self, device_id: DeviceId) -> StoreResult<Vec<DeviceCommand>> {
        Ok(self
            .tables
            .read()
            .commands
            .values()
            .filter(|c| c.device_id == device_id)
            .cloned()
            .collect())
    }

    fn save_command(&self, command: &DeviceCommand) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let clash = tables.commands.values().any(|c| {
            c.id != command.id && c.device_id == command.device_id && c.name_matches(&command.name)
        });
        if clash {
            return Err(StoreError::Conflict(format!(
                "device {} already has a command named '{}'",
                command.device_id, command.name
            )));
        }
        tables.commands.insert(command.id, command.clone());
        Ok(())
    }

    fn get_activity(&self, id: ActivityId) -> StoreResult<Option<Activity>> {
        Ok(self.tables.read().activities.get(&id).cloned())
    }

    fn list_activities(&self) -> StoreResult<Vec<Activity>> {
        Ok(self.tables.read().activities.values().cloned().collect())
    }

    fn save_activity(&self, activity: &Activity) -> StoreResult<()> {
        activity.validate()?;
        self.tables
            .write()
            .activities
            .insert(activity.id, activity.clone());
        Ok(())
    }

    fn reorder_activity_steps(&self, id: ActivityId, step_ids: &[StepId]) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let activity = tables
            .activities
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("activity {}", id)))?;
        activity.reorder_steps(step_ids)?;
        Ok(())
    }

    fn touch_activity(&self, id: ActivityId, when: DateTime<Utc>) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let activity = tables
            .activities
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("activity {}", id)))?;
        activity.last_used = Some(when);
        Ok(())
    }

    fn get_remote(&self, id: RemoteId) -> StoreResult<Option<UsbRemote>> {
        Ok(self.tables.read().remotes.get(&id).cloned())
    }

    fn save_remote(&self, remote: &UsbRemote) -> StoreResult<()> {
        self.tables.write().remotes.insert(remote.id, remote.clone());
        Ok(())
    }

    fn find_button(&self, remote_id: RemoteId, key_code: u32) -> StoreResult<Option<UsbRemoteButton>> {
        Ok(self
            .tables
            .read()
            .buttons
            .values()
            .find(|b| b.remote_id == remote_id && b.key_code == key_code)
            .cloned())
    }

    fn save_button(&self, button: &UsbRemoteButton) -> StoreResult<()> {
        self.tables.write().buttons.insert(button.id, button.clone());
        Ok(())
    }

    fn mappings_for(
        &self,
        button_id: ButtonId,
        event_type: ButtonEventType,
    ) -> StoreResult<Vec<UsbRemoteButtonMapping>> {
        Ok(self
            .tables
            .read()
            .mappings
            .values()
            .filter(|m| m.button_id == button_id && m.event_type == event_type)
            .cloned()
            .collect())
    }

    fn save_mapping(&self, mapping: &UsbRemoteButtonMapping) -> StoreResult<()> {
        self.tables
            .write()
            .mappings
            .insert(mapping.id, mapping.clone());
        Ok(())
    }
}
