//! Error types for automation and hub assembly.

use remotehub_core::model::ActivityId;
use remotehub_core::{ConfigError, StoreError};
use remotehub_devices::RegistryError;
use thiserror::Error;

/// Activity run errors.
///
/// Step failures are not errors; they are reported in the run report.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AutomationError {
    #[error("Activity {0} not found")]
    NotFound(ActivityId),

    #[error("Activity {0} is disabled")]
    Disabled(ActivityId),

    #[error("Activity {0} is already running")]
    AlreadyRunning(ActivityId),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors raised while assembling a [`Hub`](crate::Hub).
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Adapter registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Storage error: {0}")]
    Storage(#[from] remotehub_storage::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, AutomationError>;
