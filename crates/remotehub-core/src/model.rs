//! Hub data model.
//!
//! Devices, their stored commands, activities (macros built from those
//! commands) and USB remote button mappings. The persistence layer owns these
//! records; the runtime components only hold short-lived copies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Device identifier.
pub type DeviceId = i64;
/// Stored command identifier.
pub type CommandId = i64;
/// Activity identifier.
pub type ActivityId = i64;
/// Activity step identifier.
pub type StepId = i64;
/// USB remote identifier.
pub type RemoteId = i64;
/// USB remote button identifier.
pub type ButtonId = i64;
/// Button mapping identifier.
pub type MappingId = i64;

/// Errors raised by model invariants.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    /// Two steps of one activity share a step order.
    #[error("Duplicate step order {order} in activity {activity_id}")]
    DuplicateStepOrder { activity_id: ActivityId, order: u32 },

    /// A reorder request does not name exactly the activity's steps.
    #[error("Invalid step reorder for activity {activity_id}: {reason}")]
    InvalidReorder { activity_id: ActivityId, reason: String },
}

/// Transport used to reach a device. Decides which adapter may claim it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Infrared,
    Bluetooth,
    NetworkTcp,
    #[serde(rename = "network_websocket")]
    NetworkWebSocket,
    #[serde(rename = "webos")]
    WebOs,
    Tizen,
    Usb,
}

impl ConnectionType {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Infrared => "infrared",
            Self::Bluetooth => "bluetooth",
            Self::NetworkTcp => "network_tcp",
            Self::NetworkWebSocket => "network_websocket",
            Self::WebOs => "webos",
            Self::Tizen => "tizen",
            Self::Usb => "usb",
        }
    }

    /// Whether devices of this type are addressed over IP.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::NetworkTcp | Self::NetworkWebSocket | Self::WebOs | Self::Tizen
        )
    }
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol-neutral command vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    Power,
    VolumeUp,
    VolumeDown,
    Mute,
    ChannelUp,
    ChannelDown,
    Input,
    Menu,
    Back,
    Home,
    Ok,
    Up,
    Down,
    Left,
    Right,
    Number,
    PlayPause,
    Stop,
    FastForward,
    Rewind,
    AppLaunch,
    KeyboardInput,
    Custom,
}

impl CommandType {
    /// Every command type, in declaration order.
    pub const ALL: [CommandType; 23] = [
        Self::Power,
        Self::VolumeUp,
        Self::VolumeDown,
        Self::Mute,
        Self::ChannelUp,
        Self::ChannelDown,
        Self::Input,
        Self::Menu,
        Self::Back,
        Self::Home,
        Self::Ok,
        Self::Up,
        Self::Down,
        Self::Left,
        Self::Right,
        Self::Number,
        Self::PlayPause,
        Self::Stop,
        Self::FastForward,
        Self::Rewind,
        Self::AppLaunch,
        Self::KeyboardInput,
        Self::Custom,
    ];

    /// Snake-case name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Power => "power",
            Self::VolumeUp => "volume_up",
            Self::VolumeDown => "volume_down",
            Self::Mute => "mute",
            Self::ChannelUp => "channel_up",
            Self::ChannelDown => "channel_down",
            Self::Input => "input",
            Self::Menu => "menu",
            Self::Back => "back",
            Self::Home => "home",
            Self::Ok => "ok",
            Self::Up => "up",
            Self::Down => "down",
            Self::Left => "left",
            Self::Right => "right",
            Self::Number => "number",
            Self::PlayPause => "play_pause",
            Self::Stop => "stop",
            Self::FastForward => "fast_forward",
            Self::Rewind => "rewind",
            Self::AppLaunch => "app_launch",
            Self::KeyboardInput => "keyboard_input",
            Self::Custom => "custom",
        }
    }

    /// Parse a command type name, ignoring case, `_`, `-` and spaces.
    ///
    /// `"volume_up"`, `"VolumeUp"` and `"VOLUME-UP"` all parse to
    /// [`CommandType::VolumeUp`].
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted = normalize(name);
        if wanted.is_empty() {
            return None;
        }
        Self::ALL
            .iter()
            .copied()
            .find(|t| normalize(t.as_str()) == wanted)
    }
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reachability status maintained by the liveness monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessStatus {
    #[default]
    Unknown,
    On,
    Off,
}

impl std::fmt::Display for LivenessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::On => write!(f, "on"),
            Self::Off => write!(f, "off"),
        }
    }
}

/// A controllable device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    pub connection_type: ConnectionType,
    /// Network address (host or IP) for network transports.
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub mac_address: Option<String>,
    /// Opaque per-device pairing/auth token handed to the adapter.
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

impl Device {
    /// Create a device with only the required fields set.
    pub fn new(id: DeviceId, name: impl Into<String>, connection_type: ConnectionType) -> Self {
        Self {
            id,
            name: name.into(),
            brand: None,
            model: None,
            connection_type,
            address: None,
            port: None,
            mac_address: None,
            auth_token: None,
            is_online: false,
            last_seen: None,
        }
    }

    /// Set the network address.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Set the network port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set brand and model.
    pub fn with_model(mut self, brand: impl Into<String>, model: impl Into<String>) -> Self {
        self.brand = Some(brand.into());
        self.model = Some(model.into());
        self
    }

    /// Set the MAC address.
    pub fn with_mac(mut self, mac: impl Into<String>) -> Self {
        self.mac_address = Some(mac.into());
        self
    }

    /// Set the auth token.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

/// A command stored for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCommand {
    pub id: CommandId,
    pub device_id: DeviceId,
    /// Unique within the device, compared case-insensitively.
    pub name: String,
    pub command_type: CommandType,
    /// IR hex code or free-form network payload.
    #[serde(default)]
    pub payload: Option<String>,
    /// Fixed pause after a successful send, in milliseconds.
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

impl DeviceCommand {
    pub fn new(
        id: CommandId,
        device_id: DeviceId,
        name: impl Into<String>,
        command_type: CommandType,
    ) -> Self {
        Self {
            id,
            device_id,
            name: name.into(),
            command_type,
            payload: None,
            delay_ms: None,
        }
    }

    /// Set the protocol payload.
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Set the post-send delay.
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    /// Case-insensitive name comparison, ignoring surrounding whitespace on
    /// both sides.
    pub fn name_matches(&self, name: &str) -> bool {
        self.name.trim().to_lowercase() == name.trim().to_lowercase()
    }
}

/// One step of an activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityStep {
    pub id: StepId,
    pub activity_id: ActivityId,
    pub command_id: CommandId,
    pub step_order: u32,
    #[serde(default)]
    pub delay_before_ms: u64,
    #[serde(default)]
    pub delay_after_ms: u64,
    #[serde(default = "default_required")]
    pub is_required: bool,
}

fn default_required() -> bool {
    true
}

impl ActivityStep {
    /// A required step with no delays.
    pub fn new(id: StepId, activity_id: ActivityId, command_id: CommandId, step_order: u32) -> Self {
        Self {
            id,
            activity_id,
            command_id,
            step_order,
            delay_before_ms: 0,
            delay_after_ms: 0,
            is_required: true,
        }
    }

    pub fn with_delays(mut self, before_ms: u64, after_ms: u64) -> Self {
        self.delay_before_ms = before_ms;
        self.delay_after_ms = after_ms;
        self
    }

    pub fn optional(mut self) -> Self {
        self.is_required = false;
        self
    }
}

/// A named macro over device commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Written only after a fully successful run.
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default)]
    pub steps: Vec<ActivityStep>,
}

fn default_enabled() -> bool {
    true
}

impl Activity {
    pub fn new(id: ActivityId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
            enabled: true,
            last_used: None,
            steps: Vec::new(),
        }
    }

    pub fn with_step(mut self, step: ActivityStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Check that step orders are unique.
    pub fn validate(&self) -> Result<(), ModelError> {
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.step_order) {
                return Err(ModelError::DuplicateStepOrder {
                    activity_id: self.id,
                    order: step.step_order,
                });
            }
        }
        Ok(())
    }

    /// Steps sorted by ascending step order.
    pub fn ordered_steps(&self) -> Vec<ActivityStep> {
        let mut steps = self.steps.clone();
        steps.sort_by_key(|s| s.step_order);
        steps
    }

    /// Reassign step orders `1..=n` following `step_ids`.
    ///
    /// `step_ids` must be a permutation of the current step ids. Nothing is
    /// modified unless the whole request is valid.
    pub fn reorder_steps(&mut self, step_ids: &[StepId]) -> Result<(), ModelError> {
        let activity_id = self.id;
        let invalid = |reason: String| ModelError::InvalidReorder { activity_id, reason };

        if step_ids.len() != self.steps.len() {
            return Err(invalid(format!(
                "expected {} step ids, got {}",
                self.steps.len(),
                step_ids.len()
            )));
        }

        let current: HashSet<StepId> = self.steps.iter().map(|s| s.id).collect();
        let mut seen = HashSet::with_capacity(step_ids.len());
        for id in step_ids {
            if !current.contains(id) {
                return Err(invalid(format!("step {} does not belong to the activity", id)));
            }
            if !seen.insert(*id) {
                return Err(invalid(format!("step {} listed twice", id)));
            }
        }

        for (position, id) in step_ids.iter().enumerate() {
            if let Some(step) = self.steps.iter_mut().find(|s| s.id == *id) {
                step.step_order = position as u32 + 1;
            }
        }
        Ok(())
    }
}

/// Kind of button event reported by a USB remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonEventType {
    KeyDown,
    KeyUp,
    LongPress,
}

/// A USB input remote known to the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbRemote {
    pub id: RemoteId,
    pub name: String,
    #[serde(default)]
    pub vendor_id: Option<u16>,
    #[serde(default)]
    pub product_id: Option<u16>,
}

impl UsbRemote {
    pub fn new(id: RemoteId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            vendor_id: None,
            product_id: None,
        }
    }
}

/// A physical button on a USB remote, identified by its raw key code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbRemoteButton {
    pub id: ButtonId,
    pub remote_id: RemoteId,
    pub key_code: u32,
    #[serde(default)]
    pub label: Option<String>,
}

impl UsbRemoteButton {
    pub fn new(id: ButtonId, remote_id: RemoteId, key_code: u32) -> Self {
        Self {
            id,
            remote_id,
            key_code,
            label: None,
        }
    }
}

/// Links a button event to a device command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbRemoteButtonMapping {
    pub id: MappingId,
    pub button_id: ButtonId,
    pub event_type: ButtonEventType,
    pub device_id: DeviceId,
    pub command_id: CommandId,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Higher runs first.
    #[serde(default)]
    pub priority: i32,
}

impl UsbRemoteButtonMapping {
    pub fn new(
        id: MappingId,
        button_id: ButtonId,
        event_type: ButtonEventType,
        device_id: DeviceId,
        command_id: CommandId,
    ) -> Self {
        Self {
            id,
            button_id,
            event_type,
            device_id,
            command_id,
            enabled: true,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}
