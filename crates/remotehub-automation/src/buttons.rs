//! USB remote button mappings.
//!
//! A button event resolves remote -> button (by raw key code) -> every
//! enabled mapping for the event type. Mappings run highest priority first,
//! each one independent of the others' outcome. Unmapped input is common and
//! is not an error.

use std::cmp::Reverse;
use std::sync::Arc;

use chrono::Utc;
use remotehub_core::model::{
    ButtonEventType, CommandId, DeviceId, MappingId, RemoteId, UsbRemoteButtonMapping,
};
use remotehub_core::store;
use remotehub_core::{EventBus, HubEvent, SharedStore, StoreError, StoreResult};
use remotehub_devices::{CommandParams, DispatchError, DispatchReport, Dispatcher};

/// Outcome of one attempted mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingExecution {
    pub mapping_id: MappingId,
    pub priority: i32,
    pub device_id: DeviceId,
    pub command_id: CommandId,
    pub result: Result<DispatchReport, DispatchError>,
}

impl MappingExecution {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Turns button events into dispatches.
pub struct ButtonMappingExecutor {
    store: SharedStore,
    dispatcher: Arc<Dispatcher>,
    event_bus: EventBus,
}

impl ButtonMappingExecutor {
    pub fn new(store: SharedStore, dispatcher: Arc<Dispatcher>, event_bus: EventBus) -> Self {
        Self {
            store,
            dispatcher,
            event_bus,
        }
    }

    /// Run every enabled mapping for the event.
    ///
    /// Only store failures while resolving the button are errors. Returns
    /// one entry per attempted mapping, in execution order.
    pub async fn on_button_event(
        &self,
        remote_id: RemoteId,
        key_code: u32,
        event_type: ButtonEventType,
    ) -> StoreResult<Vec<MappingExecution>> {
        if store::blocking(&self.store, move |s| s.get_remote(remote_id))
            .await?
            .is_none()
        {
            tracing::debug!(remote_id, key_code, "Event from unknown remote ignored");
            return Ok(Vec::new());
        }
        let button = store::blocking(&self.store, move |s| s.find_button(remote_id, key_code)).await?;
        let Some(button) = button else {
            tracing::debug!(remote_id, key_code, "Unmapped key ignored");
            return Ok(Vec::new());
        };

        let button_id = button.id;
        let mappings = ordered(
            store::blocking(&self.store, move |s| s.mappings_for(button_id, event_type)).await?,
        );
        tracing::debug!(
            remote_id,
            key_code,
            ?event_type,
            mappings = mappings.len(),
            "Button event"
        );

        let mut executions = Vec::with_capacity(mappings.len());
        for mapping in mappings {
            let result = self.run_mapping(&mapping).await;
            if let Err(e) = &result {
                tracing::warn!(
                    remote_id,
                    mapping_id = mapping.id,
                    device_id = mapping.device_id,
                    error = %e,
                    "Button mapping failed"
                );
            }
            executions.push(MappingExecution {
                mapping_id: mapping.id,
                priority: mapping.priority,
                device_id: mapping.device_id,
                command_id: mapping.command_id,
                result,
            });
        }
        Ok(executions)
    }

    async fn run_mapping(
        &self,
        mapping: &UsbRemoteButtonMapping,
    ) -> Result<DispatchReport, DispatchError> {
        let (device_id, command_id) = (mapping.device_id, mapping.command_id);
        let (device, command) = store::blocking(&self.store, move |s| {
            let device = s
                .get_device(device_id)?
                .ok_or_else(|| StoreError::NotFound(format!("device {}", device_id)))?;
            let command = s
                .get_command(command_id)?
                .ok_or_else(|| StoreError::NotFound(format!("command {}", command_id)))?;
            Ok((device, command))
        })
        .await?;

        self.dispatcher
            .dispatch_command(&device, &command, &CommandParams::default())
            .await
    }

    pub fn remote_connected(&self, remote_id: RemoteId) {
        tracing::info!(remote_id, "Remote connected");
        self.event_bus.publish_with_source(
            HubEvent::RemoteConnected {
                remote_id,
                timestamp: Utc::now().timestamp(),
            },
            "buttons",
        );
    }

    pub fn remote_disconnected(&self, remote_id: RemoteId) {
        tracing::info!(remote_id, "Remote disconnected");
        self.event_bus.publish_with_source(
            HubEvent::RemoteDisconnected {
                remote_id,
                timestamp: Utc::now().timestamp(),
            },
            "buttons",
        );
    }
}

/// Enabled mappings, highest priority first, ties by ascending id.
fn ordered(mut mappings: Vec<UsbRemoteButtonMapping>) -> Vec<UsbRemoteButtonMapping> {
    mappings.retain(|m| m.enabled);
    mappings.sort_by_key(|m| (Reverse(m.priority), m.id));
    mappings
}
