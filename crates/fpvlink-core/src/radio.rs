use core::fmt;

use serde::{Deserialize, Serialize};

/// Frequency bands a radio interface may support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FreqBand {
    /// 433 / 868 / 915 MHz ISM, used by SiK serial modems
    Sub1G,
    /// 2.4 GHz WiFi
    Band2G4,
    /// 5.8 GHz WiFi
    Band5G8,
}

/// Center frequency in MHz
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Frequency(pub u32);

impl Frequency {
    pub fn mhz(&self) -> u32 {
        self.0
    }

    /// Band this frequency falls into, if any
    pub fn band(&self) -> Option<FreqBand> {
        match self.0 {
            400..=1000 => Some(FreqBand::Sub1G),
            2300..=2500 => Some(FreqBand::Band2G4),
            5000..=6000 => Some(FreqBand::Band5G8),
            _ => None,
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}MHz", self.0)
    }
}

impl fmt::Debug for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}MHz", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChannelWidth {
    #[default]
    W20,
    W40,
}

impl ChannelWidth {
    pub fn mhz(&self) -> u8 {
        match self {
            ChannelWidth::W20 => 20,
            ChannelWidth::W40 => 40,
        }
    }
}

/// Which side of the link receives modulation flag changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyTarget {
    Vehicle,
    Controller,
    Both,
}

impl ApplyTarget {
    #[inline]
    pub fn includes_vehicle(&self) -> bool {
        matches!(self, ApplyTarget::Vehicle | ApplyTarget::Both)
    }

    #[inline]
    pub fn includes_controller(&self) -> bool {
        matches!(self, ApplyTarget::Controller | ApplyTarget::Both)
    }
}

/// Radio PHY data rate, either a legacy rate in Mbps or an MCS index.
/// On the wire, legacy rates are positive Mbps values and MCS index n is
/// encoded as -(n+1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataRate {
    Legacy(u8),
    Mcs(u8),
}

/// 802.11n 20MHz long-GI rates in units of 100kbps, per MCS index
const MCS_RATES_20MHZ: [u16; 8] = [65, 130, 195, 260, 390, 520, 585, 650];
/// 802.11n 40MHz long-GI rates in units of 100kbps, per MCS index
const MCS_RATES_40MHZ: [u16; 8] = [135, 270, 405, 540, 810, 1080, 1215, 1350];

pub const MAX_MCS_INDEX: u8 = 7;

impl DataRate {
    pub fn to_raw(self) -> i32 {
        match self {
            DataRate::Legacy(mbps) => mbps as i32,
            DataRate::Mcs(idx) => -(idx as i32) - 1,
        }
    }

    pub fn from_raw(raw: i32) -> Option<DataRate> {
        match raw {
            1..=54 => Some(DataRate::Legacy(raw as u8)),
            -8..=-1 => Some(DataRate::Mcs((-raw - 1) as u8)),
            _ => None,
        }
    }

    pub fn is_mcs(&self) -> bool {
        matches!(self, DataRate::Mcs(_))
    }

    /// Approximate PHY throughput in kbit/s, used to compute transmit time budgets
    pub fn approx_kbps(&self, width: ChannelWidth, sgi: bool) -> u32 {
        match *self {
            DataRate::Legacy(mbps) => mbps as u32 * 1000,
            DataRate::Mcs(idx) => {
                let idx = idx.min(MAX_MCS_INDEX) as usize;
                let base = match width {
                    ChannelWidth::W20 => MCS_RATES_20MHZ[idx],
                    ChannelWidth::W40 => MCS_RATES_40MHZ[idx],
                } as u32
                    * 100;
                if sgi { base * 10 / 9 } else { base }
            }
        }
    }

    /// Next lower rate of the same class, if any
    pub fn step_down(&self) -> Option<DataRate> {
        const LEGACY_LADDER: [u8; 8] = [6, 9, 12, 18, 24, 36, 48, 54];
        match *self {
            DataRate::Mcs(0) => None,
            DataRate::Mcs(idx) => Some(DataRate::Mcs(idx.min(MAX_MCS_INDEX + 1) - 1)),
            DataRate::Legacy(mbps) => LEGACY_LADDER.iter().rev().find(|&&r| r < mbps).map(|&r| DataRate::Legacy(r)),
        }
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataRate::Legacy(mbps) => write!(f, "{}Mbps", mbps),
            DataRate::Mcs(idx) => write!(f, "MCS{}", idx),
        }
    }
}

impl Serialize for DataRate {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.to_raw())
    }
}

impl<'de> Deserialize<'de> for DataRate {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = i32::deserialize(deserializer)?;
        DataRate::from_raw(raw).ok_or_else(|| serde::de::Error::custom(format!("invalid data rate {}", raw)))
    }
}

/// Modulation state of a logical link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioModulation {
    pub data_rate: DataRate,
    pub width: ChannelWidth,
    pub ldpc: bool,
    pub sgi: bool,
    pub stbc: bool,
}

impl Default for RadioModulation {
    fn default() -> Self {
        Self {
            data_rate: DataRate::Mcs(1),
            width: ChannelWidth::W20,
            ldpc: false,
            sgi: false,
            stbc: false,
        }
    }
}

impl RadioModulation {
    pub fn approx_kbps(&self) -> u32 {
        self.data_rate.approx_kbps(self.width, self.sgi)
    }

    /// Packs the modulation flags into the single parameter byte used by
    /// SET_RADIO_LINK_FLAGS. Bit 0 = 40MHz, 1 = LDPC, 2 = SGI, 3 = STBC.
    pub fn flag_bits(&self) -> u8 {
        (self.width == ChannelWidth::W40) as u8
            | (self.ldpc as u8) << 1
            | (self.sgi as u8) << 2
            | (self.stbc as u8) << 3
    }
}

/// A request to change modulation parameters on a link.
/// MCS rates carry LDPC/SGI/STBC/width flags and must name an apply target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioFlags {
    pub modulation: RadioModulation,
    pub apply_target: Option<ApplyTarget>,
}
