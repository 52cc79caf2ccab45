//! Hub events.
//!
//! Fire-and-forget notifications published on the [`EventBus`](crate::EventBus)
//! by the dispatcher, liveness monitor, activity orchestrator and button
//! executor.

use crate::model::{ActivityId, DeviceId, LivenessStatus, RemoteId, StepId};
use serde::{Deserialize, Serialize};

/// Event published by hub components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    /// Reachability or online flag of a device changed.
    DeviceStatusChanged {
        device_id: DeviceId,
        old_status: LivenessStatus,
        new_status: LivenessStatus,
        timestamp: i64,
    },

    /// A command was dispatched to a device.
    DeviceCommandExecuted {
        device_id: DeviceId,
        command: String,
        success: bool,
        reason: Option<String>,
        timestamp: i64,
    },

    ActivityStarted {
        activity_id: ActivityId,
        name: String,
        timestamp: i64,
    },

    ActivityStepExecuted {
        activity_id: ActivityId,
        step_id: StepId,
        step_order: u32,
        success: bool,
        reason: Option<String>,
        timestamp: i64,
    },

    ActivityCompleted {
        activity_id: ActivityId,
        success: bool,
        /// Step that aborted the run, if any.
        failed_step: Option<StepId>,
        reason: Option<String>,
        timestamp: i64,
    },

    RemoteConnected {
        remote_id: RemoteId,
        timestamp: i64,
    },

    RemoteDisconnected {
        remote_id: RemoteId,
        timestamp: i64,
    },
}

impl HubEvent {
    /// Variant name, for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::DeviceStatusChanged { .. } => "DeviceStatusChanged",
            Self::DeviceCommandExecuted { .. } => "DeviceCommandExecuted",
            Self::ActivityStarted { .. } => "ActivityStarted",
            Self::ActivityStepExecuted { .. } => "ActivityStepExecuted",
            Self::ActivityCompleted { .. } => "ActivityCompleted",
            Self::RemoteConnected { .. } => "RemoteConnected",
            Self::RemoteDisconnected { .. } => "RemoteDisconnected",
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Self::DeviceStatusChanged { timestamp, .. }
            | Self::DeviceCommandExecuted { timestamp, .. }
            | Self::ActivityStarted { timestamp, .. }
            | Self::ActivityStepExecuted { timestamp, .. }
            | Self::ActivityCompleted { timestamp, .. }
            | Self::RemoteConnected { timestamp, .. }
            | Self::RemoteDisconnected { timestamp, .. } => *timestamp,
        }
    }

    /// Device the event is about, if any.
    pub fn device_id(&self) -> Option<DeviceId> {
        match self {
            Self::DeviceStatusChanged { device_id, .. }
            | Self::DeviceCommandExecuted { device_id, .. } => Some(*device_id),
            _ => None,
        }
    }

    pub fn is_device_event(&self) -> bool {
        matches!(
            self,
            Self::DeviceStatusChanged { .. } | Self::DeviceCommandExecuted { .. }
        )
    }

    pub fn is_activity_event(&self) -> bool {
        matches!(
            self,
            Self::ActivityStarted { .. }
                | Self::ActivityStepExecuted { .. }
                | Self::ActivityCompleted { .. }
        )
    }

    pub fn is_remote_event(&self) -> bool {
        matches!(
            self,
            Self::RemoteConnected { .. } | Self::RemoteDisconnected { .. }
        )
    }
}

/// Metadata attached to every published event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub event_id: String,
    /// Component that published the event, e.g. `dispatcher` or `liveness`.
    pub source: String,
    pub timestamp: i64,
}

impl EventMetadata {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}
