use core::fmt;

use fpvlink_core::{LinkId, LoopTime};

/// Numeric command ids understood by the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CommandId {
    SetRadioLinkFrequency = 1,
    SetRadioLinkFlags = 2,
    SetRadioLinkCapabilities = 3,
    UpdateVideoLinkProfiles = 4,
    SetVideoParams = 5,
    ManualSwitchToVideoLinkQualityHigh = 6,
    ManualSwitchToVideoLinkQualityMedium = 7,
    ManualSwitchToVideoLinkQualityLow = 8,
    ManualSwitchToVideoLinkQualityAuto = 9,
}

impl CommandId {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Commands sharing a class may not be issued while one of them is pending
    pub fn class(self) -> CommandClass {
        match self {
            CommandId::SetRadioLinkFrequency => CommandClass::LinkFrequency,
            CommandId::SetRadioLinkFlags => CommandClass::LinkFlags,
            CommandId::SetRadioLinkCapabilities => CommandClass::LinkCapabilities,
            CommandId::UpdateVideoLinkProfiles => CommandClass::VideoProfiles,
            CommandId::SetVideoParams => CommandClass::VideoParams,
            CommandId::ManualSwitchToVideoLinkQualityHigh
            | CommandId::ManualSwitchToVideoLinkQualityMedium
            | CommandId::ManualSwitchToVideoLinkQualityLow
            | CommandId::ManualSwitchToVideoLinkQualityAuto => CommandClass::VideoQualitySwitch,
        }
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommandId::SetRadioLinkFrequency => "SET_RADIO_LINK_FREQUENCY",
            CommandId::SetRadioLinkFlags => "SET_RADIO_LINK_FLAGS",
            CommandId::SetRadioLinkCapabilities => "SET_RADIO_LINK_CAPABILITIES",
            CommandId::UpdateVideoLinkProfiles => "UPDATE_VIDEO_LINK_PROFILES",
            CommandId::SetVideoParams => "SET_VIDEO_PARAMS",
            CommandId::ManualSwitchToVideoLinkQualityHigh => "MANUAL_SWITCH_TO_VIDEO_LINK_QUALITY_HQ",
            CommandId::ManualSwitchToVideoLinkQualityMedium => "MANUAL_SWITCH_TO_VIDEO_LINK_QUALITY_MQ",
            CommandId::ManualSwitchToVideoLinkQualityLow => "MANUAL_SWITCH_TO_VIDEO_LINK_QUALITY_LQ",
            CommandId::ManualSwitchToVideoLinkQualityAuto => "MANUAL_SWITCH_TO_VIDEO_LINK_QUALITY_AUTO",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandClass {
    LinkFrequency,
    LinkFlags,
    LinkCapabilities,
    VideoProfiles,
    VideoParams,
    VideoQualitySwitch,
}

/// Pending-command key: a class, optionally scoped to one link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandKey {
    pub class: CommandClass,
    pub link: Option<LinkId>,
}

impl CommandKey {
    pub fn new(id: CommandId, link: Option<LinkId>) -> Self {
        Self { class: id.class(), link }
    }
}

/// Outbound command towards the vehicle, handed to the Vehicle entity.
/// `token` is chosen by the issuer and comes back in the result.
#[derive(Debug, Clone)]
pub struct VehicleCommand {
    pub id: CommandId,
    pub param: i32,
    pub payload: Vec<u8>,
    pub token: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Vehicle confirmed the change
    Acked,
    /// Vehicle reported it could not apply the change
    Nacked,
    /// Command channel did not accept the command for sending
    NotSent,
}

/// Result of an earlier VehicleCommand, routed back to its issuer
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub id: CommandId,
    pub token: u32,
    pub outcome: CommandOutcome,
}

/// Acknowledgment received from the vehicle over the air
#[derive(Debug, Clone)]
pub struct VehicleAck {
    pub id: CommandId,
    pub token: u32,
    pub success: bool,
}

/// Proof of life of the controller -> vehicle command link
#[derive(Debug, Clone, Copy)]
pub struct LinkActivity {
    pub last_ack: LoopTime,
}
