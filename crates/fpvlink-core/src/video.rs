use core::fmt;

use serde::{Deserialize, Serialize};

use crate::DataRate;

/// Quality tier of the video link. High is the nominal tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VideoTier {
    High,
    Medium,
    Low,
}

impl VideoTier {
    pub const ALL: [VideoTier; 3] = [VideoTier::High, VideoTier::Medium, VideoTier::Low];

    /// Tier selected after `drops` data-rate reductions below nominal
    pub fn from_rate_drops(drops: usize) -> VideoTier {
        match drops {
            0 => VideoTier::High,
            1 => VideoTier::Medium,
            _ => VideoTier::Low,
        }
    }

    /// Share of EC packets relative to data packets when the FEC shape is auto
    pub fn auto_ec_percent(&self) -> u32 {
        match self {
            VideoTier::High => 25,
            VideoTier::Medium => 50,
            VideoTier::Low => 100,
        }
    }
}

impl fmt::Display for VideoTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoTier::High => write!(f, "HQ"),
            VideoTier::Medium => write!(f, "MQ"),
            VideoTier::Low => write!(f, "LQ"),
        }
    }
}

/// Keyframe interval setting of a profile tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyframeSetting {
    /// Use the keyframe interval of the active user video parameters
    Inherit,
    /// Fixed interval in frames
    Manual(u16),
    /// Encoder adapts the interval, never exceeding `max` frames
    Auto { max: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FecShape {
    Auto,
    Manual { data: u16, ec: u16 },
}

/// Duplication percentage, in steps of 10
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DupPercent {
    /// Derived from the currently measured loss rate
    Auto,
    Fixed(u8),
}

impl DupPercent {
    pub fn is_valid(&self) -> bool {
        match *self {
            DupPercent::Auto => true,
            DupPercent::Fixed(p) => p <= 100 && p % 10 == 0,
        }
    }

    /// Resolves the setting against a measured loss rate in percent.
    /// Auto duplicates twice the loss rate, rounded up to the next 10% step.
    pub fn resolve(&self, loss_percent: u8) -> u8 {
        match *self {
            DupPercent::Fixed(p) => p.min(100),
            DupPercent::Auto => {
                let want = (loss_percent as u32 * 2).min(100);
                (want.div_ceil(10) * 10) as u8
            }
        }
    }
}

/// Stored parameters of one quality tier. `None` fields inherit from the
/// active user video parameters at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoLinkProfile {
    pub bitrate_kbps: Option<u32>,
    pub fps: Option<u16>,
    pub keyframe: KeyframeSetting,
    pub packet_len: u16,
    pub fec: FecShape,
    pub video_data_rate: Option<DataRate>,
    pub data_data_rate: Option<DataRate>,
    pub retransmission_window_ms: u32,
    pub retransmission_dup: DupPercent,
    pub transmission_dup: DupPercent,
}

impl VideoLinkProfile {
    pub fn factory_default(tier: VideoTier) -> Self {
        match tier {
            VideoTier::High => Self {
                bitrate_kbps: None,
                fps: None,
                keyframe: KeyframeSetting::Inherit,
                packet_len: 1200,
                fec: FecShape::Auto,
                video_data_rate: None,
                data_data_rate: None,
                retransmission_window_ms: 60,
                retransmission_dup: DupPercent::Auto,
                transmission_dup: DupPercent::Fixed(0),
            },
            VideoTier::Medium => Self {
                bitrate_kbps: Some(3000),
                fps: None,
                keyframe: KeyframeSetting::Auto { max: 60 },
                packet_len: 1000,
                fec: FecShape::Auto,
                video_data_rate: None,
                data_data_rate: None,
                retransmission_window_ms: 100,
                retransmission_dup: DupPercent::Auto,
                transmission_dup: DupPercent::Fixed(0),
            },
            VideoTier::Low => Self {
                bitrate_kbps: Some(1500),
                fps: Some(30),
                keyframe: KeyframeSetting::Auto { max: 30 },
                packet_len: 800,
                fec: FecShape::Auto,
                video_data_rate: None,
                data_data_rate: None,
                retransmission_window_ms: 150,
                retransmission_dup: DupPercent::Auto,
                transmission_dup: DupPercent::Fixed(20),
            },
        }
    }
}

/// Video parameters the user configured for the active camera
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserVideoParams {
    pub bitrate_kbps: u32,
    pub fps: u16,
    pub keyframe_interval: u16,
}

impl Default for UserVideoParams {
    fn default() -> Self {
        Self {
            bitrate_kbps: 8000,
            fps: 60,
            keyframe_interval: 20,
        }
    }
}

/// A profile with all inherited fields substituted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedVideoProfile {
    pub tier: VideoTier,
    pub bitrate_kbps: u32,
    pub fps: u16,
    pub keyframe_interval: u16,
    pub keyframe_auto: bool,
    pub packet_len: u16,
    pub fec: FecShape,
    pub video_data_rate: Option<DataRate>,
    pub data_data_rate: Option<DataRate>,
    pub retransmission_window_ms: u32,
    pub retransmission_dup: DupPercent,
    pub transmission_dup: DupPercent,
}

/// Bytes of per-packet header added on air on top of the packet payload,
/// including the length prefix of FEC data shards
pub const FEC_PACKET_OVERHEAD: u16 = 12;

/// Limits negotiated with the paired vehicle's platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformLimits {
    /// Maximum data + EC packets per FEC block
    pub max_block_packets: u16,
    pub mtu: u16,
}

impl PlatformLimits {
    pub fn max_packet_payload(&self) -> u16 {
        self.mtu.saturating_sub(FEC_PACKET_OVERHEAD)
    }
}

impl Default for PlatformLimits {
    fn default() -> Self {
        Self { max_block_packets: 64, mtu: 1400 }
    }
}

/// FEC block geometry actually used on air
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedFec {
    pub data_packets: u16,
    pub ec_packets: u16,
    pub packet_len: u16,
}
