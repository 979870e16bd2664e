use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Channel list used to inhibit every validator channel at once.
pub const ALL_CHANNELS_SPEC: &str = "1,2,3,4,5,6,7,8";

/// Commands understood by the hopper and the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceCommand {
    /// Pay out `amount` minor units from the hopper.
    DoPayout,
    /// Inhibit the channels listed in `channels`.
    DisableChannels,
    /// Accept the channels listed in `channels`.
    EnableChannels,
    /// Stop the device from accepting or paying anything.
    Disable,
    /// Re-arm the device.
    Enable,
    /// Ask the hopper which note values it could currently pay change for.
    TestAllCoinChannels,
}

impl DeviceCommand {
    /// Wire spelling of the command (`cmd` field).
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceCommand::DoPayout => "do-payout",
            DeviceCommand::DisableChannels => "disable-channels",
            DeviceCommand::EnableChannels => "enable-channels",
            DeviceCommand::Disable => "disable",
            DeviceCommand::Enable => "enable",
            DeviceCommand::TestAllCoinChannels => "z-test-all-coin-channels",
        }
    }

    /// Parse the wire spelling back into a command.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "do-payout" => Some(DeviceCommand::DoPayout),
            "disable-channels" => Some(DeviceCommand::DisableChannels),
            "enable-channels" => Some(DeviceCommand::EnableChannels),
            "disable" => Some(DeviceCommand::Disable),
            "enable" => Some(DeviceCommand::Enable),
            "z-test-all-coin-channels" => Some(DeviceCommand::TestAllCoinChannels),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Banknote values the hopper reports on in a probe response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Denomination {
    Note5,
    Note10,
    Note20,
    Note50,
}

impl Denomination {
    /// Face value in major currency units.
    pub fn value(&self) -> u32 {
        match self {
            Denomination::Note5 => 5,
            Denomination::Note10 => 10,
            Denomination::Note20 => 20,
            Denomination::Note50 => 50,
        }
    }
}

/// Wire envelope for every hopper and validator message: requests, their
/// correlated responses, and unsolicited device events.
///
/// Absent fields are omitted when encoding and unknown fields are ignored
/// when decoding, so newer firmware can add fields without breaking us.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMessage {
    #[serde(rename = "cmd", default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(rename = "msgId", default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Equals the `msgId` of the request this message answers.
    #[serde(rename = "correlId", default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Minor currency units (cents).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(rename = "error", default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
    #[serde(rename = "result", default, skip_serializing_if = "Option::is_none")]
    pub result_text: Option<String>,
    /// ISO currency code.
    #[serde(rename = "cc", default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Comma-joined channel numbers, e.g. `"1,3"`.
    #[serde(rename = "channels", default, skip_serializing_if = "Option::is_none")]
    pub channel_spec: Option<String>,
    #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(rename = "note5ok", default, skip_serializing_if = "Option::is_none")]
    pub note_5_ok: Option<u8>,
    #[serde(rename = "note10ok", default, skip_serializing_if = "Option::is_none")]
    pub note_10_ok: Option<u8>,
    #[serde(rename = "note20ok", default, skip_serializing_if = "Option::is_none")]
    pub note_20_ok: Option<u8>,
    #[serde(rename = "note50ok", default, skip_serializing_if = "Option::is_none")]
    pub note_50_ok: Option<u8>,
}

impl DeviceMessage {
    /// A request for `command` carrying a fresh UUID v4 `msgId`.
    pub fn request(command: DeviceCommand) -> Self {
        Self {
            command: Some(command.as_str().to_string()),
            message_id: Some(Uuid::new_v4().to_string()),
            ..Self::default()
        }
    }

    pub fn do_payout(amount: i64) -> Self {
        Self {
            amount: Some(amount),
            ..Self::request(DeviceCommand::DoPayout)
        }
    }

    pub fn disable_channels(channel_spec: impl Into<String>) -> Self {
        Self {
            channel_spec: Some(channel_spec.into()),
            ..Self::request(DeviceCommand::DisableChannels)
        }
    }

    pub fn enable_channels(channel_spec: impl Into<String>) -> Self {
        Self {
            channel_spec: Some(channel_spec.into()),
            ..Self::request(DeviceCommand::EnableChannels)
        }
    }

    /// `disable-channels` for every validator channel.
    pub fn inhibit_all_channels() -> Self {
        Self::disable_channels(ALL_CHANNELS_SPEC)
    }

    pub fn disable() -> Self {
        Self::request(DeviceCommand::Disable)
    }

    pub fn enable() -> Self {
        Self::request(DeviceCommand::Enable)
    }

    pub fn test_all_coin_channels() -> Self {
        Self::request(DeviceCommand::TestAllCoinChannels)
    }

    /// An unsolicited device event named `name`.
    pub fn event(name: impl Into<String>) -> Self {
        Self {
            event: Some(name.into()),
            message_id: Some(Uuid::new_v4().to_string()),
            ..Self::default()
        }
    }

    /// An empty response correlated with `request`.
    pub fn response_to(request: &DeviceMessage) -> Self {
        Self {
            message_id: Some(Uuid::new_v4().to_string()),
            correlation_id: request.message_id.clone(),
            ..Self::default()
        }
    }

    /// The parsed command, if this message carries a known one.
    pub fn device_command(&self) -> Option<DeviceCommand> {
        self.command.as_deref().and_then(DeviceCommand::parse)
    }

    /// Event name with spaces folded to hyphens, so `"smart emptied"` and
    /// `"smart-emptied"` compare equal.
    pub fn event_name(&self) -> Option<String> {
        self.event.as_deref().map(|e| e.trim().replace(' ', "-"))
    }

    /// Whether the probe response marks `denomination` as payable.
    pub fn accepts(&self, denomination: Denomination) -> bool {
        let flag = match denomination {
            Denomination::Note5 => self.note_5_ok,
            Denomination::Note10 => self.note_10_ok,
            Denomination::Note20 => self.note_20_ok,
            Denomination::Note50 => self.note_50_ok,
        };
        flag == Some(1)
    }

    pub fn set_accepts(&mut self, denomination: Denomination, accepted: bool) {
        let flag = Some(u8::from(accepted));
        match denomination {
            Denomination::Note5 => self.note_5_ok = flag,
            Denomination::Note10 => self.note_10_ok = flag,
            Denomination::Note20 => self.note_20_ok = flag,
            Denomination::Note50 => self.note_50_ok = flag,
        }
    }

    pub fn decode(raw: &str) -> Result<Self, KioskError> {
        serde_json::from_str(raw).map_err(|e| KioskError::Decode(e.to_string()))
    }

    pub fn encode(&self) -> Result<String, KioskError> {
        serde_json::to_string(self).map_err(|e| KioskError::Encode(e.to_string()))
    }
}

/// Lifecycle announcement published by the kiosk itself. Never answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfStatusEvent {
    #[serde(rename = "msgId")]
    pub message_id: String,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(
        rename = "inhibitedChannels",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub inhibited_channels: Option<Vec<u8>>,
}

impl SelfStatusEvent {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            event: event.into(),
            channel: None,
            amount: None,
            inhibited_channels: None,
        }
    }

    pub fn encode(&self) -> Result<String, KioskError> {
        serde_json::to_string(self).map_err(|e| KioskError::Encode(e.to_string()))
    }
}

/// Error type shared by every change-o-matic crate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KioskError {
    #[error("Malformed message: {0}")]
    Decode(String),

    #[error("Message encoding failed: {0}")]
    Encode(String),

    #[error("Bus channel error: {0}")]
    Channel(String),

    #[error("Request has no msgId to correlate on")]
    MissingMessageId,

    #[error("Response correlId {actual:?} does not match expected {expected}")]
    CorrelationMismatch {
        expected: String,
        actual: Option<String>,
    },

    #[error("Response handler failed: {0}")]
    Handler(String),

    #[error("Front panel never became ready")]
    PanelUnavailable,

    #[error("Configuration error: {0}")]
    Config(String),
}
