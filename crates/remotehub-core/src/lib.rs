//! Core types for remotehub.
//!
//! This crate holds everything the other remotehub crates agree on: the
//! device/activity data model, the persistence contract, hub events with the
//! event bus that carries them, and typed configuration.

pub mod config;
pub mod event;
pub mod eventbus;
pub mod logging;
pub mod model;
pub mod store;

pub use config::{ConfigError, HubConfig};
pub use event::{EventMetadata, HubEvent};
pub use eventbus::{EventBus, EventBusReceiver, FilteredReceiver, SharedEventBus, DEFAULT_CHANNEL_CAPACITY};
pub use logging::LoggingError;
pub use model::{
    Activity, ActivityId, ActivityStep, ButtonEventType, ButtonId, CommandId, CommandType,
    ConnectionType, Device, DeviceCommand, DeviceId, LivenessStatus, MappingId, ModelError,
    RemoteId, StepId, UsbRemote, UsbRemoteButton, UsbRemoteButtonMapping,
};
pub use store::{HubStore, SharedStore, StoreError, StoreResult};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::HubConfig;
    pub use crate::event::HubEvent;
    pub use crate::eventbus::{EventBus, SharedEventBus};
    pub use crate::model::*;
    pub use crate::store::{HubStore, SharedStore, StoreError, StoreResult};
}
