//! Command mapping.
//!
//! Translates protocol-neutral [`CommandType`]s into the native call each
//! device family understands. Every family is a [`FamilyTable`]: plain data
//! that can be swapped per family without touching the dispatcher.

use std::collections::HashMap;

use remotehub_core::model::{CommandType, ConnectionType, DeviceCommand};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Command vocabulary family an adapter speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceFamily {
    Infrared,
    BluetoothHid,
    #[serde(rename = "webos")]
    WebOs,
    Tizen,
    Usb,
    GenericNetwork,
}

impl DeviceFamily {
    /// Family usually paired with a connection type.
    pub fn for_connection_type(connection_type: ConnectionType) -> Self {
        match connection_type {
            ConnectionType::Infrared => Self::Infrared,
            ConnectionType::Bluetooth => Self::BluetoothHid,
            ConnectionType::WebOs => Self::WebOs,
            ConnectionType::Tizen => Self::Tizen,
            ConnectionType::Usb => Self::Usb,
            ConnectionType::NetworkTcp | ConnectionType::NetworkWebSocket => Self::GenericNetwork,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Infrared => "infrared",
            Self::BluetoothHid => "bluetooth_hid",
            Self::WebOs => "webos",
            Self::Tizen => "tizen",
            Self::Usb => "usb",
            Self::GenericNetwork => "generic_network",
        }
    }
}

impl std::fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Adapter-specific call produced by the mapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NativeAction {
    /// IR code, usually hex.
    IrCode { code: String },
    /// Named remote key, e.g. `HOME` or `KEY_VOLUP`.
    KeyCode { key: String },
    /// Request URI, e.g. `ssap://audio/volumeUp`.
    Intent { uri: String },
    /// HID usage on a usage page.
    Hid { page: u16, usage: u16 },
    LaunchApp { app_id: String },
    Text { text: String },
    /// Payload forwarded untouched.
    Raw { payload: String },
}

impl NativeAction {
    pub fn key(key: impl Into<String>) -> Self {
        Self::KeyCode { key: key.into() }
    }

    pub fn intent(uri: impl Into<String>) -> Self {
        Self::Intent { uri: uri.into() }
    }

    pub fn consumer(usage: u16) -> Self {
        Self::Hid {
            page: HID_PAGE_CONSUMER,
            usage,
        }
    }

    pub fn keyboard(usage: u16) -> Self {
        Self::Hid {
            page: HID_PAGE_KEYBOARD,
            usage,
        }
    }
}

/// HID keyboard/keypad usage page.
pub const HID_PAGE_KEYBOARD: u16 = 0x07;
/// HID consumer control usage page.
pub const HID_PAGE_CONSUMER: u16 = 0x0C;

/// Per-call parameters for commands that take an argument.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandParams {
    /// Digit for [`CommandType::Number`].
    #[serde(default)]
    pub digit: Option<u8>,
    /// Text for [`CommandType::KeyboardInput`].
    #[serde(default)]
    pub text: Option<String>,
    /// Application id for [`CommandType::AppLaunch`].
    #[serde(default)]
    pub app_id: Option<String>,
}

impl CommandParams {
    pub fn digit(digit: u8) -> Self {
        Self {
            digit: Some(digit),
            ..Default::default()
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn app(app_id: impl Into<String>) -> Self {
        Self {
            app_id: Some(app_id.into()),
            ..Default::default()
        }
    }
}

/// Mapping failures. All of them mean the adapter is never invoked.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MappingError {
    #[error("{command} is not supported by {family} devices: {reason}")]
    NotSupported {
        family: DeviceFamily,
        command: CommandType,
        reason: String,
    },

    #[error("{command} needs a {parameter}")]
    MissingParameter {
        command: CommandType,
        parameter: &'static str,
    },
}

/// How a family treats the stored command payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadPolicy {
    /// Payload only matters for `Custom`, `Number`, `AppLaunch` and text input.
    Secondary,
    /// Every command is its payload; no payload means unsupported.
    IrCode,
    /// Every command is its payload, forwarded raw.
    Raw,
}

/// Mapping table for one device family.
#[derive(Debug, Clone)]
pub struct FamilyTable {
    family: DeviceFamily,
    payload: PayloadPolicy,
    actions: HashMap<CommandType, NativeAction>,
    digits: HashMap<u8, NativeAction>,
    vocabulary: HashMap<String, NativeAction>,
    launches_apps: bool,
    accepts_text: bool,
}

impl FamilyTable {
    pub fn new(family: DeviceFamily) -> Self {
        Self {
            family,
            payload: PayloadPolicy::Secondary,
            actions: HashMap::new(),
            digits: HashMap::new(),
            vocabulary: HashMap::new(),
            launches_apps: false,
            accepts_text: false,
        }
    }

    pub fn family(&self) -> DeviceFamily {
        self.family
    }

    pub fn payload_policy(mut self, policy: PayloadPolicy) -> Self {
        self.payload = policy;
        self
    }

    /// Map a command type. Key codes also join the custom vocabulary.
    pub fn action(mut self, command: CommandType, action: NativeAction) -> Self {
        if let NativeAction::KeyCode { key } = &action {
            self.vocabulary.insert(key.to_ascii_uppercase(), action.clone());
        }
        self.actions.insert(command, action);
        self
    }

    /// Map one digit for [`CommandType::Number`].
    pub fn digit(mut self, digit: u8, action: NativeAction) -> Self {
        if let NativeAction::KeyCode { key } = &action {
            self.vocabulary.insert(key.to_ascii_uppercase(), action.clone());
        }
        self.digits.insert(digit, action);
        self
    }

    /// Add a native name reachable only through custom payloads.
    pub fn word(mut self, name: &str, action: NativeAction) -> Self {
        self.vocabulary.insert(name.to_ascii_uppercase(), action);
        self
    }

    pub fn with_app_launch(mut self) -> Self {
        self.launches_apps = true;
        self
    }

    pub fn with_text_input(mut self) -> Self {
        self.accepts_text = true;
        self
    }

    /// Look up a native vocabulary name, ignoring case.
    pub fn lookup_word(&self, name: &str) -> Option<&NativeAction> {
        self.vocabulary.get(&name.trim().to_ascii_uppercase())
    }

    /// Resolve a stored command into a native action.
    pub fn resolve(
        &self,
        command: &DeviceCommand,
        params: &CommandParams,
    ) -> Result<NativeAction, MappingError> {
        let command_type = command.command_type;
        let payload = command
            .payload
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty());

        match self.payload {
            PayloadPolicy::IrCode => {
                return payload
                    .map(|code| NativeAction::IrCode {
                        code: code.to_string(),
                    })
                    .ok_or_else(|| self.unsupported(command_type, "command has no IR code"));
            }
            PayloadPolicy::Raw => {
                // Forwarded byte for byte, including line terminators.
                return match (payload, command.payload.as_deref()) {
                    (Some(_), Some(raw)) => Ok(NativeAction::Raw {
                        payload: raw.to_string(),
                    }),
                    _ => Err(self.unsupported(command_type, "command has no payload")),
                };
            }
            PayloadPolicy::Secondary => {}
        }

        match command_type {
            CommandType::Number => {
                let digit = params
                    .digit
                    .or_else(|| payload.and_then(|p| p.parse().ok()))
                    .ok_or(MappingError::MissingParameter {
                        command: command_type,
                        parameter: "digit",
                    })?;
                self.digits
                    .get(&digit)
                    .cloned()
                    .ok_or_else(|| self.unsupported(command_type, &format!("no key for digit {}", digit)))
            }
            CommandType::AppLaunch if self.launches_apps => {
                let app_id = params
                    .app_id
                    .as_deref()
                    .or(payload)
                    .ok_or(MappingError::MissingParameter {
                        command: command_type,
                        parameter: "app id",
                    })?;
                Ok(NativeAction::LaunchApp {
                    app_id: app_id.to_string(),
                })
            }
            CommandType::KeyboardInput if self.accepts_text => {
                let text = params
                    .text
                    .as_deref()
                    .or(command.payload.as_deref())
                    .ok_or(MappingError::MissingParameter {
                        command: command_type,
                        parameter: "text",
                    })?;
                Ok(NativeAction::Text {
                    text: text.to_string(),
                })
            }
            CommandType::Custom => self.resolve_custom(payload),
            other => self
                .actions
                .get(&other)
                .cloned()
                .ok_or_else(|| self.unsupported(other, "no mapping")),
        }
    }

    fn resolve_custom(&self, payload: Option<&str>) -> Result<NativeAction, MappingError> {
        let payload = payload.ok_or(MappingError::MissingParameter {
            command: CommandType::Custom,
            parameter: "payload",
        })?;

        if let Some(action) = self.lookup_word(payload) {
            return Ok(action.clone());
        }

        // A payload naming a neutral command, e.g. "VolumeUp".
        if let Some(action) = CommandType::from_name(payload)
            .filter(|t| *t != CommandType::Custom)
            .and_then(|t| self.actions.get(&t))
        {
            return Ok(action.clone());
        }

        Err(self.unsupported(
            CommandType::Custom,
            &format!("unknown payload '{}'", payload),
        ))
    }

    fn unsupported(&self, command: CommandType, reason: &str) -> MappingError {
        MappingError::NotSupported {
            family: self.family,
            command,
            reason: reason.to_string(),
        }
    }
}

/// Mapping tables for every known family.
#[derive(Debug, Clone)]
pub struct CommandMapper {
    tables: HashMap<DeviceFamily, FamilyTable>,
}

impl Default for CommandMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandMapper {
    /// Mapper with the built-in tables.
    pub fn new() -> Self {
        let tables = [
            infrared_table(),
            webos_table(),
            tizen_table(),
            hid_table(DeviceFamily::BluetoothHid),
            hid_table(DeviceFamily::Usb),
            generic_network_table(),
        ]
        .into_iter()
        .map(|t| (t.family(), t))
        .collect();
        Self { tables }
    }

    /// Replace the table for one family.
    pub fn with_family(mut self, table: FamilyTable) -> Self {
        self.tables.insert(table.family(), table);
        self
    }

    pub fn table(&self, family: DeviceFamily) -> Option<&FamilyTable> {
        self.tables.get(&family)
    }

    pub fn resolve(
        &self,
        family: DeviceFamily,
        command: &DeviceCommand,
        params: &CommandParams,
    ) -> Result<NativeAction, MappingError> {
        match self.tables.get(&family) {
            Some(table) => table.resolve(command, params),
            None => Err(MappingError::NotSupported {
                family,
                command: command.command_type,
                reason: "no mapping table".to_string(),
            }),
        }
    }
}

fn infrared_table() -> FamilyTable {
    FamilyTable::new(DeviceFamily::Infrared).payload_policy(PayloadPolicy::IrCode)
}

fn generic_network_table() -> FamilyTable {
    FamilyTable::new(DeviceFamily::GenericNetwork).payload_policy(PayloadPolicy::Raw)
}

fn webos_table() -> FamilyTable {
    use CommandType::*;

    let mut table = FamilyTable::new(DeviceFamily::WebOs)
        .action(Power, NativeAction::intent("ssap://system/turnOff"))
        .action(VolumeUp, NativeAction::intent("ssap://audio/volumeUp"))
        .action(VolumeDown, NativeAction::intent("ssap://audio/volumeDown"))
        .action(Mute, NativeAction::intent("ssap://audio/setMute"))
        .action(ChannelUp, NativeAction::intent("ssap://tv/channelUp"))
        .action(ChannelDown, NativeAction::intent("ssap://tv/channelDown"))
        .action(Input, NativeAction::intent("ssap://tv/switchInput"))
        .action(PlayPause, NativeAction::intent("ssap://media.controls/play"))
        .action(Stop, NativeAction::intent("ssap://media.controls/stop"))
        .action(FastForward, NativeAction::intent("ssap://media.controls/fastForward"))
        .action(Rewind, NativeAction::intent("ssap://media.controls/rewind"))
        .action(Menu, NativeAction::key("MENU"))
        .action(Back, NativeAction::key("BACK"))
        .action(Home, NativeAction::key("HOME"))
        .action(Ok, NativeAction::key("ENTER"))
        .action(Up, NativeAction::key("UP"))
        .action(Down, NativeAction::key("DOWN"))
        .action(Left, NativeAction::key("LEFT"))
        .action(Right, NativeAction::key("RIGHT"))
        .with_app_launch()
        .with_text_input();

    for (digit, key) in [
        (0, "0"),
        (1, "1"),
        (2, "2"),
        (3, "3"),
        (4, "4"),
        (5, "5"),
        (6, "6"),
        (7, "7"),
        (8, "8"),
        (9, "9"),
    ] {
        table = table.digit(digit, NativeAction::key(key));
    }

    for key in [
        "EXIT", "INFO", "GUIDE", "RED", "GREEN", "YELLOW", "BLUE", "PAUSE", "PLAY", "ASTERISK",
        "DASH", "CC", "QMENU", "LIST", "AD",
    ] {
        table = table.word(key, NativeAction::key(key));
    }
    table
}

fn tizen_table() -> FamilyTable {
    use CommandType::*;

    let mut table = FamilyTable::new(DeviceFamily::Tizen)
        .action(Power, NativeAction::key("KEY_POWER"))
        .action(VolumeUp, NativeAction::key("KEY_VOLUP"))
        .action(VolumeDown, NativeAction::key("KEY_VOLDOWN"))
        .action(Mute, NativeAction::key("KEY_MUTE"))
        .action(ChannelUp, NativeAction::key("KEY_CHUP"))
        .action(ChannelDown, NativeAction::key("KEY_CHDOWN"))
        .action(Input, NativeAction::key("KEY_SOURCE"))
        .action(Menu, NativeAction::key("KEY_MENU"))
        .action(Back, NativeAction::key("KEY_RETURN"))
        .action(Home, NativeAction::key("KEY_HOME"))
        .action(Ok, NativeAction::key("KEY_ENTER"))
        .action(Up, NativeAction::key("KEY_UP"))
        .action(Down, NativeAction::key("KEY_DOWN"))
        .action(Left, NativeAction::key("KEY_LEFT"))
        .action(Right, NativeAction::key("KEY_RIGHT"))
        .action(PlayPause, NativeAction::key("KEY_PLAY"))
        .action(Stop, NativeAction::key("KEY_STOP"))
        .action(FastForward, NativeAction::key("KEY_FF"))
        .action(Rewind, NativeAction::key("KEY_REWIND"))
        .with_app_launch()
        .with_text_input();

    for (digit, key) in [
        (0, "KEY_0"),
        (1, "KEY_1"),
        (2, "KEY_2"),
        (3, "KEY_3"),
        (4, "KEY_4"),
        (5, "KEY_5"),
        (6, "KEY_6"),
        (7, "KEY_7"),
        (8, "KEY_8"),
        (9, "KEY_9"),
    ] {
        table = table.digit(digit, NativeAction::key(key));
    }

    for key in [
        "KEY_PAUSE",
        "KEY_EXIT",
        "KEY_INFO",
        "KEY_GUIDE",
        "KEY_TOOLS",
        "KEY_RED",
        "KEY_GREEN",
        "KEY_YELLOW",
        "KEY_CYAN",
        "KEY_PRECH",
        "KEY_CH_LIST",
        "KEY_HDMI",
        "KEY_SLEEP",
    ] {
        table = table.word(key, NativeAction::key(key));
    }
    table
}

/// Shared by Bluetooth HID and USB remotes.
fn hid_table(family: DeviceFamily) -> FamilyTable {
    use CommandType::*;

    let mut table = FamilyTable::new(family)
        .action(Power, NativeAction::consumer(0x30))
        .action(VolumeUp, NativeAction::consumer(0xE9))
        .action(VolumeDown, NativeAction::consumer(0xEA))
        .action(Mute, NativeAction::consumer(0xE2))
        .action(ChannelUp, NativeAction::consumer(0x9C))
        .action(ChannelDown, NativeAction::consumer(0x9D))
        .action(Menu, NativeAction::consumer(0x40))
        .action(Home, NativeAction::consumer(0x223))
        .action(Back, NativeAction::consumer(0x224))
        .action(PlayPause, NativeAction::consumer(0xCD))
        .action(Stop, NativeAction::consumer(0xB7))
        .action(FastForward, NativeAction::consumer(0xB3))
        .action(Rewind, NativeAction::consumer(0xB4))
        .action(Ok, NativeAction::keyboard(0x28))
        .action(Right, NativeAction::keyboard(0x4F))
        .action(Left, NativeAction::keyboard(0x50))
        .action(Down, NativeAction::keyboard(0x51))
        .action(Up, NativeAction::keyboard(0x52))
        .with_text_input();

    // Keyboard usages run 1..9 then 0; there is no usage for "digit - 1".
    for (digit, usage) in [
        (1, 0x1E),
        (2, 0x1F),
        (3, 0x20),
        (4, 0x21),
        (5, 0x22),
        (6, 0x23),
        (7, 0x24),
        (8, 0x25),
        (9, 0x26),
        (0, 0x27),
    ] {
        table = table.digit(digit, NativeAction::keyboard(usage));
    }

    for (name, action) in [
        ("ENTER", NativeAction::keyboard(0x28)),
        ("ESCAPE", NativeAction::keyboard(0x29)),
        ("BACKSPACE", NativeAction::keyboard(0x2A)),
        ("TAB", NativeAction::keyboard(0x2B)),
        ("SPACE", NativeAction::keyboard(0x2C)),
        ("PAGE_UP", NativeAction::keyboard(0x4B)),
        ("PAGE_DOWN", NativeAction::keyboard(0x4E)),
        ("SEARCH", NativeAction::consumer(0x221)),
        ("BRIGHTNESS_UP", NativeAction::consumer(0x6F)),
        ("BRIGHTNESS_DOWN", NativeAction::consumer(0x70)),
        ("NEXT_TRACK", NativeAction::consumer(0xB5)),
        ("PREVIOUS_TRACK", NativeAction::consumer(0xB6)),
    ] {
        table = table.word(name, action);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(command_type: CommandType) -> DeviceCommand {
        DeviceCommand::new(1, 1, command_type.as_str(), command_type)
    }

    #[test]
    fn test_infrared_uses_payload() {
        let mapper = CommandMapper::new();
        let power = command(CommandType::Power).with_payload("0x20DF10EF");
        assert_eq!(
            mapper.resolve(DeviceFamily::Infrared, &power, &CommandParams::default()),
            Ok(NativeAction::IrCode {
                code: "0x20DF10EF".to_string()
            })
        );

        let no_code = command(CommandType::Power);
        assert!(matches!(
            mapper.resolve(DeviceFamily::Infrared, &no_code, &CommandParams::default()),
            Err(MappingError::NotSupported { .. })
        ));
    }

    #[test]
    fn test_hid_digit_table() {
        let mapper = CommandMapper::new();
        let number = command(CommandType::Number);

        let zero = mapper
            .resolve(DeviceFamily::BluetoothHid, &number, &CommandParams::digit(0))
            .unwrap();
        assert_eq!(zero, NativeAction::keyboard(0x27));

        let one = mapper
            .resolve(DeviceFamily::Usb, &number, &CommandParams::digit(1))
            .unwrap();
        assert_eq!(one, NativeAction::keyboard(0x1E));

        assert!(matches!(
            mapper.resolve(DeviceFamily::Usb, &number, &CommandParams::digit(12)),
            Err(MappingError::NotSupported { .. })
        ));
        assert!(matches!(
            mapper.resolve(DeviceFamily::Usb, &number, &CommandParams::default()),
            Err(MappingError::MissingParameter { .. })
        ));
    }

    #[test]
    fn test_number_digit_from_payload() {
        let mapper = CommandMapper::new();
        let seven = command(CommandType::Number).with_payload("7");
        assert_eq!(
            mapper.resolve(DeviceFamily::Tizen, &seven, &CommandParams::default()),
            Ok(NativeAction::key("KEY_7"))
        );
    }

    #[test]
    fn test_unmapped_type_not_supported() {
        let mapper = CommandMapper::new();
        let input = command(CommandType::Input);
        let err = mapper
            .resolve(DeviceFamily::BluetoothHid, &input, &CommandParams::default())
            .unwrap_err();
        assert!(matches!(
            err,
            MappingError::NotSupported {
                family: DeviceFamily::BluetoothHid,
                command: CommandType::Input,
                ..
            }
        ));

        let launch = command(CommandType::AppLaunch);
        assert!(mapper
            .resolve(DeviceFamily::BluetoothHid, &launch, &CommandParams::app("netflix"))
            .is_err());
    }

    #[test]
    fn test_custom_payload_vocabulary() {
        let mapper = CommandMapper::new();

        let source = command(CommandType::Custom).with_payload("key_source");
        assert_eq!(
            mapper.resolve(DeviceFamily::Tizen, &source, &CommandParams::default()),
            Ok(NativeAction::key("KEY_SOURCE"))
        );

        let red = command(CommandType::Custom).with_payload("Red");
        assert_eq!(
            mapper.resolve(DeviceFamily::WebOs, &red, &CommandParams::default()),
            Ok(NativeAction::key("RED"))
        );

        let neutral = command(CommandType::Custom).with_payload("VolumeUp");
        assert_eq!(
            mapper.resolve(DeviceFamily::WebOs, &neutral, &CommandParams::default()),
            Ok(NativeAction::intent("ssap://audio/volumeUp"))
        );

        let unknown = command(CommandType::Custom).with_payload("SELF_DESTRUCT");
        assert!(matches!(
            mapper.resolve(DeviceFamily::WebOs, &unknown, &CommandParams::default()),
            Err(MappingError::NotSupported { .. })
        ));
    }

    #[test]
    fn test_generic_network_passthrough() {
        let mapper = CommandMapper::new();
        let raw = command(CommandType::Custom).with_payload("PWR ON\r");
        assert_eq!(
            mapper.resolve(DeviceFamily::GenericNetwork, &raw, &CommandParams::default()),
            Ok(NativeAction::Raw {
                payload: "PWR ON\r".to_string()
            })
        );
    }

    #[test]
    fn test_app_launch_and_text() {
        let mapper = CommandMapper::new();
        let launch = command(CommandType::AppLaunch);
        assert_eq!(
            mapper.resolve(DeviceFamily::WebOs, &launch, &CommandParams::app("netflix")),
            Ok(NativeAction::LaunchApp {
                app_id: "netflix".to_string()
            })
        );

        let typing = command(CommandType::KeyboardInput);
        assert_eq!(
            mapper.resolve(DeviceFamily::Usb, &typing, &CommandParams::text("hello world")),
            Ok(NativeAction::Text {
                text: "hello world".to_string()
            })
        );
    }

    #[test]
    fn test_with_family_replaces_table() {
        let mapper = CommandMapper::new().with_family(
            FamilyTable::new(DeviceFamily::BluetoothHid)
                .action(CommandType::Input, NativeAction::consumer(0x89)),
        );
        let input = command(CommandType::Input);
        assert_eq!(
            mapper.resolve(DeviceFamily::BluetoothHid, &input, &CommandParams::default()),
            Ok(NativeAction::consumer(0x89))
        );
        // The replaced table no longer knows Power.
        assert!(mapper
            .resolve(
                DeviceFamily::BluetoothHid,
                &command(CommandType::Power),
                &CommandParams::default()
            )
            .is_err());
    }
}
