//! Persistent store on redb.
//!
//! One table per record kind, keyed by id, values stored as JSON. Activities
//! carry their steps inline so a reorder is a single-record write.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;

use remotehub_core::model::*;
use remotehub_core::{HubStore, StoreError, StoreResult};

use crate::error::Result;

type Table = TableDefinition<'static, i64, &'static [u8]>;

const DEVICES_TABLE: Table = TableDefinition::new("devices");
const COMMANDS_TABLE: Table = TableDefinition::new("device_commands");
const ACTIVITIES_TABLE: Table = TableDefinition::new("activities");
const REMOTES_TABLE: Table = TableDefinition::new("usb_remotes");
const BUTTONS_TABLE: Table = TableDefinition::new("usb_remote_buttons");
const MAPPINGS_TABLE: Table = TableDefinition::new("usb_remote_button_mappings");

const ALL_TABLES: [Table; 6] = [
    DEVICES_TABLE,
    COMMANDS_TABLE,
    ACTIVITIES_TABLE,
    REMOTES_TABLE,
    BUTTONS_TABLE,
    MAPPINGS_TABLE,
];

/// [`HubStore`] backed by a redb database file.
pub struct RedbStore {
    db: Arc<Database>,
    path: PathBuf,
    /// Removed on drop for temporary stores.
    temporary: bool,
}

impl RedbStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database::create(path)?;
        let store = Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
            temporary: false,
        };
        store.create_tables()?;
        tracing::info!(path = %path.display(), "Opened hub store");
        Ok(store)
    }

    /// Create a store in a fresh temp file, deleted on drop.
    pub fn temporary() -> Result<Self> {
        // redb has no in-memory mode
        let path =
            std::env::temp_dir().join(format!("remotehub_store_{}.redb", uuid::Uuid::new_v4()));
        let mut store = Self::open(&path)?;
        store.temporary = true;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn create_tables(&self) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        for table in ALL_TABLES {
            write_txn.open_table(table)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get<V: DeserializeOwned>(&self, table: Table, id: i64) -> Result<Option<V>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table)?;
        let value = match table.get(id)? {
            Some(value) => Some(serde_json::from_slice(value.value())?),
            None => None,
        };
        Ok(value)
    }

    fn list<V: DeserializeOwned>(&self, table: Table) -> Result<Vec<V>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table)?;

        let mut values = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            values.push(serde_json::from_slice(value.value())?);
        }
        Ok(values)
    }

    fn list_where<V, F>(&self, table: Table, predicate: F) -> Result<Vec<V>>
    where
        V: DeserializeOwned,
        F: Fn(&V) -> bool,
    {
        Ok(self
            .list(table)?
            .into_iter()
            .filter(|v| predicate(v))
            .collect())
    }

    fn put<V: Serialize>(&self, table: Table, id: i64, value: &V) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(table)?;
            table.insert(id, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Read-modify-write one record inside a single write transaction.
    fn update<V, F>(&self, table: Table, id: i64, what: &str, apply: F) -> Result<()>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce(&mut V) -> StoreResult<()>,
    {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(table)?;
            let current: Option<V> = match table.get(id)? {
                Some(value) => Some(serde_json::from_slice(value.value())?),
                None => None,
            };
            let mut record =
                current.ok_or_else(|| StoreError::NotFound(format!("{} {}", what, id)))?;
            apply(&mut record)?;
            let bytes = serde_json::to_vec(&record)?;
            table.insert(id, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn insert_command(&self, command: &DeviceCommand) -> Result<()> {
        let bytes = serde_json::to_vec(command)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(COMMANDS_TABLE)?;
            let mut clash = false;
            for entry in table.iter()? {
                let (_, value) = entry?;
                let existing: DeviceCommand = serde_json::from_slice(value.value())?;
                if existing.id != command.id
                    && existing.device_id == command.device_id
                    && existing.name_matches(&command.name)
                {
                    clash = true;
                    break;
                }
            }
            if clash {
                return Err(StoreError::Conflict(format!(
                    "device {} already has a command named '{}'",
                    command.device_id, command.name
                ))
                .into());
            }
            table.insert(command.id, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

impl Drop for RedbStore {
    fn drop(&mut self) {
        if self.temporary && Arc::strong_count(&self.db) == 1 {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::debug!(path = %self.path.display(), error = %e, "Failed to remove temp store");
            }
        }
    }
}

impl HubStore for RedbStore {
    fn get_device(&self, id: DeviceId) -> StoreResult<Option<Device>> {
        Ok(self.get(DEVICES_TABLE, id)?)
    }

    fn list_devices(&self) -> StoreResult<Vec<Device>> {
        Ok(self.list(DEVICES_TABLE)?)
    }

    fn save_device(&self, device: &Device) -> StoreResult<()> {
        Ok(self.put(DEVICES_TABLE, device.id, device)?)
    }

    fn set_device_liveness(
        &self,
        id: DeviceId,
        online: bool,
        last_seen: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        Ok(self.update(DEVICES_TABLE, id, "device", |device: &mut Device| {
            device.is_online = online;
            if last_seen.is_some() {
                device.last_seen = last_seen;
            }
            Ok(())
        })?)
    }

    fn get_command(&self, id: CommandId) -> StoreResult<Option<DeviceCommand>> {
        Ok(self.get(COMMANDS_TABLE, id)?)
    }

    fn find_command(&self, device_id: DeviceId, name: &str) -> StoreResult<Option<DeviceCommand>> {
        let matches = self.list_where(COMMANDS_TABLE, |c: &DeviceCommand| {
            c.device_id == device_id && c.name_matches(name)
        })?;
        Ok(matches.into_iter().next())
    }

    fn commands_for_device(&self, device_id: DeviceId) -> StoreResult<Vec<DeviceCommand>> {
        Ok(self.list_where(COMMANDS_TABLE, |c: &DeviceCommand| c.device_id == device_id)?)
    }

    fn save_command(&self, command: &DeviceCommand) -> StoreResult<()> {
        Ok(self.insert_command(command)?)
    }

    fn get_activity(&self, id: ActivityId) -> StoreResult<Option<Activity>> {
        Ok(self.get(ACTIVITIES_TABLE, id)?)
    }

    fn list_activities(&self) -> StoreResult<Vec<Activity>> {
        Ok(self.list(ACTIVITIES_TABLE)?)
    }

    fn save_activity(&self, activity: &Activity) -> StoreResult<()> {
        activity.validate()?;
        Ok(self.put(ACTIVITIES_TABLE, activity.id, activity)?)
    }

    fn reorder_activity_steps(&self, id: ActivityId, step_ids: &[StepId]) -> StoreResult<()> {
        Ok(self.update(ACTIVITIES_TABLE, id, "activity", |activity: &mut Activity| {
            activity.reorder_steps(step_ids)?;
            Ok(())
        })?)
    }

    fn touch_activity(&self, id: ActivityId, when: DateTime<Utc>) -> StoreResult<()> {
        Ok(self.update(ACTIVITIES_TABLE, id, "activity", |activity: &mut Activity| {
            activity.last_used = Some(when);
            Ok(())
        })?)
    }

    fn get_remote(&self, id: RemoteId) -> StoreResult<Option<UsbRemote>> {
        Ok(self.get(REMOTES_TABLE, id)?)
    }

    fn save_remote(&self, remote: &UsbRemote) -> StoreResult<()> {
        Ok(self.put(REMOTES_TABLE, remote.id, remote)?)
    }

    fn find_button(&self, remote_id: RemoteId, key_code: u32) -> StoreResult<Option<UsbRemoteButton>> {
        let matches = self.list_where(BUTTONS_TABLE, |b: &UsbRemoteButton| {
            b.remote_id == remote_id && b.key_code == key_code
        })?;
        Ok(matches.into_iter().next())
    }

    fn save_button(&self, button: &UsbRemoteButton) -> StoreResult<()> {
        Ok(self.put(BUTTONS_TABLE, button.id, button)?)
    }

    fn mappings_for(
        &self,
        button_id: ButtonId,
        event_type: ButtonEventType,
    ) -> StoreResult<Vec<UsbRemoteButtonMapping>> {
        Ok(self.list_where(MAPPINGS_TABLE, |m: &UsbRemoteButtonMapping| {
            m.button_id == button_id && m.event_type == event_type
        })?)
    }

    fn save_mapping(&self, mapping: &UsbRemoteButtonMapping) -> StoreResult<()> {
        Ok(self.put(MAPPINGS_TABLE, mapping.id, mapping)?)
    }
}
