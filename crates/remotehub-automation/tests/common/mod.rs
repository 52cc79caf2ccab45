//! Shared fixtures for automation tests.

#![allow(dead_code)]

use std::sync::Arc;

use remotehub_automation::Hub;
use remotehub_core::model::*;
use remotehub_core::{HubEvent, HubStore, SharedStore};
use remotehub_devices::MockAdapter;
use remotehub_storage::MemoryStore;

pub struct Fixture {
    pub hub: Arc<Hub>,
    pub ir: Arc<MockAdapter>,
    pub store: SharedStore,
}

/// Hub over an in-memory store with one IR mock adapter.
pub fn fixture() -> Fixture {
    let store: SharedStore = Arc::new(MemoryStore::new());
    let ir = Arc::new(MockAdapter::for_type("ir-blaster", ConnectionType::Infrared));
    let hub = Hub::builder()
        .store(store.clone())
        .adapter(ir.clone())
        .build()
        .unwrap();
    Fixture {
        hub: Arc::new(hub),
        ir,
        store,
    }
}

/// IR device `id` with one command `100 + id` named `command`.
pub fn ir_device(
    store: &SharedStore,
    id: DeviceId,
    name: &str,
    command: &str,
    command_type: CommandType,
) -> CommandId {
    store
        .save_device(&Device::new(id, name, ConnectionType::Infrared))
        .unwrap();
    let command_id = 100 + id;
    store
        .save_command(
            &DeviceCommand::new(command_id, id, command, command_type)
                .with_payload(format!("0x20DF{:04X}", id)),
        )
        .unwrap();
    command_id
}

/// Activity events only, in publish order.
pub fn activity_events(events: Vec<HubEvent>) -> Vec<HubEvent> {
    events.into_iter().filter(HubEvent::is_activity_event).collect()
}
