use serde::{Deserialize, Serialize};

use crate::{Direction, ErrorKind, Frequency, LinkId, RadioModulation};

/// Four-way usage choice offered to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkUsage {
    Disabled,
    VideoAndData,
    VideoOnly,
    DataOnly,
}

/// Three-way direction choice offered to the user, seen from the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkDirection {
    Bidirectional,
    DownlinkOnly,
    UplinkOnly,
}

impl LinkDirection {
    pub fn as_direction(&self) -> Direction {
        match self {
            LinkDirection::Bidirectional => Direction::Both,
            LinkDirection::DownlinkOnly => Direction::Dl,
            LinkDirection::UplinkOnly => Direction::Ul,
        }
    }
}

/// Capability flags of a logical link.
/// `can_tx` means the vehicle transmits on it (downlink), `can_rx` means the
/// vehicle receives on it (uplink).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkFlags {
    pub can_tx: bool,
    pub can_rx: bool,
    pub used_for_video: bool,
    pub used_for_data: bool,
    pub disabled: bool,
    pub is_relay: bool,
    pub use_lowest_datarate_for_data: bool,
}

impl LinkFlags {
    /// Translates the user's usage and direction choices into flags.
    /// Fails on combinations that cannot carry any traffic.
    pub fn from_usage(usage: LinkUsage, dir: LinkDirection, keep: &LinkFlags) -> Result<LinkFlags, ErrorKind> {
        let mut flags = LinkFlags {
            is_relay: keep.is_relay,
            use_lowest_datarate_for_data: keep.use_lowest_datarate_for_data,
            ..Default::default()
        };
        if usage == LinkUsage::Disabled {
            flags.disabled = true;
            return Ok(flags);
        }

        let d = dir.as_direction();
        flags.can_tx = d.includes_dl();
        flags.can_rx = d.includes_ul();
        flags.used_for_video = matches!(usage, LinkUsage::VideoAndData | LinkUsage::VideoOnly);
        flags.used_for_data = matches!(usage, LinkUsage::VideoAndData | LinkUsage::DataOnly);

        if !flags.can_tx && !flags.can_rx {
            return Err(ErrorKind::InvalidCapabilityCombination("no direction enabled"));
        }
        if flags.used_for_video && !flags.can_tx {
            return Err(ErrorKind::InvalidCapabilityCombination("video requires downlink"));
        }
        Ok(flags)
    }

    pub fn usage(&self) -> LinkUsage {
        match (self.disabled, self.used_for_video, self.used_for_data) {
            (true, _, _) | (false, false, false) => LinkUsage::Disabled,
            (false, true, true) => LinkUsage::VideoAndData,
            (false, true, false) => LinkUsage::VideoOnly,
            (false, false, true) => LinkUsage::DataOnly,
        }
    }

    /// Parameter of SET_RADIO_LINK_CAPABILITIES
    pub fn to_bits(&self) -> u8 {
        self.can_tx as u8
            | (self.can_rx as u8) << 1
            | (self.used_for_video as u8) << 2
            | (self.used_for_data as u8) << 3
            | (self.disabled as u8) << 4
            | (self.is_relay as u8) << 5
            | (self.use_lowest_datarate_for_data as u8) << 6
    }

    pub fn direction(&self) -> Direction {
        Direction::from_flags(self.can_tx, self.can_rx)
    }

    /// Flag invariants: disabled links carry nothing, usable links have a direction
    pub fn is_consistent(&self) -> bool {
        if self.disabled {
            return !self.used_for_video && !self.used_for_data;
        }
        self.can_tx || self.can_rx
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalRadioLink {
    pub id: LinkId,
    pub frequency: Frequency,
    pub flags: LinkFlags,
    pub modulation: RadioModulation,
}

impl LogicalRadioLink {
    pub fn usable(&self) -> bool {
        !self.flags.disabled && (self.flags.can_tx || self.flags.can_rx)
    }
}
