use fpvlink_config::CfgVideo;
use fpvlink_core::{
    DataRate, DisplayValue, DupPercent, ErrorKind, FecShape, KeyframeSetting, PackedFec, PlatformLimits, ResolvedVideoProfile, SettingValue,
    UserVideoParams, VideoLinkProfile, VideoTier, MAX_MCS_INDEX,
};

pub const MIN_PACKET_LEN: u16 = 100;

fn tier_index(tier: VideoTier) -> usize {
    match tier {
        VideoTier::High => 0,
        VideoTier::Medium => 1,
        VideoTier::Low => 2,
    }
}

fn invalid(field: &'static str, reason: &'static str) -> ErrorKind {
    ErrorKind::InvalidParameter { field, reason }
}

/// The three quality tiers of the video link. Stored profiles keep their
/// inherit markers; resolution against the user video parameters happens on read.
#[derive(Debug, Clone)]
pub struct VideoProfileStore {
    profiles: [VideoLinkProfile; 3],
}

impl VideoProfileStore {
    pub fn new(cfg: &CfgVideo) -> Self {
        Self {
            profiles: [cfg.high, cfg.medium, cfg.low],
        }
    }

    pub fn factory() -> Self {
        Self {
            profiles: VideoTier::ALL.map(VideoLinkProfile::factory_default),
        }
    }

    /// Stored profile, inherit markers included
    pub fn stored(&self, tier: VideoTier) -> &VideoLinkProfile {
        &self.profiles[tier_index(tier)]
    }

    pub fn get(&self, tier: VideoTier, user: &UserVideoParams) -> ResolvedVideoProfile {
        let p = self.stored(tier);
        let (keyframe_interval, keyframe_auto) = match p.keyframe {
            KeyframeSetting::Inherit => (user.keyframe_interval, false),
            KeyframeSetting::Manual(n) => (n, false),
            KeyframeSetting::Auto { max } => (max, true),
        };
        ResolvedVideoProfile {
            tier,
            bitrate_kbps: p.bitrate_kbps.unwrap_or(user.bitrate_kbps),
            fps: p.fps.unwrap_or(user.fps),
            keyframe_interval,
            keyframe_auto,
            packet_len: p.packet_len,
            fec: p.fec,
            video_data_rate: p.video_data_rate,
            data_data_rate: p.data_data_rate,
            retransmission_window_ms: p.retransmission_window_ms,
            retransmission_dup: p.retransmission_dup,
            transmission_dup: p.transmission_dup,
        }
    }

    pub fn validate(profile: &VideoLinkProfile, limits: &PlatformLimits) -> Result<(), ErrorKind> {
        if profile.bitrate_kbps == Some(0) {
            return Err(invalid("bitrate_kbps", "must be positive"));
        }
        if profile.fps == Some(0) {
            return Err(invalid("fps", "must be positive"));
        }
        match profile.keyframe {
            KeyframeSetting::Manual(0) | KeyframeSetting::Auto { max: 0 } => {
                return Err(invalid("keyframe", "interval must be positive"));
            }
            _ => {}
        }
        if profile.packet_len < MIN_PACKET_LEN {
            return Err(invalid("packet_len", "below minimum packet length"));
        }
        if let FecShape::Manual { data, ec } = profile.fec {
            if data == 0 {
                return Err(invalid("fec", "needs at least one data packet"));
            }
            if data as u32 + ec as u32 > limits.max_block_packets as u32 {
                return Err(invalid("fec", "data + ec exceeds the platform block size"));
            }
        }
        for rate in [profile.video_data_rate, profile.data_data_rate].into_iter().flatten() {
            if let DataRate::Mcs(idx) = rate {
                if idx > MAX_MCS_INDEX {
                    return Err(invalid("data_rate", "MCS index out of range"));
                }
            }
        }
        if !profile.retransmission_dup.is_valid() {
            return Err(invalid("retransmission_dup", "must be 0..=100 in steps of 10"));
        }
        if !profile.transmission_dup.is_valid() {
            return Err(invalid("transmission_dup", "must be 0..=100 in steps of 10"));
        }
        Ok(())
    }

    pub fn set(&mut self, tier: VideoTier, profile: VideoLinkProfile, limits: &PlatformLimits) -> Result<(), ErrorKind> {
        Self::validate(&profile, limits)?;
        self.profiles[tier_index(tier)] = profile;
        Ok(())
    }

    /// Restores factory defaults of one tier
    pub fn reset(&mut self, tier: VideoTier) {
        self.profiles[tier_index(tier)] = VideoLinkProfile::factory_default(tier);
    }

    /// Block geometry for a resolved profile under the platform limits.
    /// Auto shapes size one block per video frame. Shapes above the block
    /// limit are scaled down keeping the data/EC ratio.
    pub fn pack_fec_shape(profile: &ResolvedVideoProfile, limits: &PlatformLimits) -> PackedFec {
        let max_payload = limits.max_packet_payload();
        let packet_len = if profile.packet_len > max_payload {
            max_payload / 10 * 10
        } else {
            profile.packet_len
        }
        .max(10);

        let (data, ec) = match profile.fec {
            FecShape::Manual { data, ec } => (data.max(1) as u32, ec as u32),
            FecShape::Auto => {
                let bytes_per_frame = profile.bitrate_kbps as u64 * 1000 / 8 / profile.fps.max(1) as u64;
                let data = bytes_per_frame.div_ceil(packet_len as u64).max(1) as u32;
                let ec = (data * profile.tier.auto_ec_percent()).div_ceil(100).max(1);
                (data, ec)
            }
        };

        let max_block = (limits.max_block_packets as u32).max(2);
        let (data, ec) = if data + ec > max_block {
            let scaled_data = (data * max_block / (data + ec)).max(1);
            let scaled_ec = ec.min(max_block - scaled_data);
            (scaled_data, scaled_ec)
        } else {
            (data, ec)
        };

        PackedFec {
            data_packets: data as u16,
            ec_packets: ec as u16,
            packet_len,
        }
    }

    /// Payload of UPDATE_VIDEO_LINK_PROFILES: the three stored profiles in
    /// tier order, inherit and auto markers as zero or negative values
    pub fn encode_profiles(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(3 * 20);
        for p in &self.profiles {
            out.extend_from_slice(&p.bitrate_kbps.unwrap_or(0).to_be_bytes());
            out.extend_from_slice(&p.fps.unwrap_or(0).to_be_bytes());
            let keyframe: i16 = match p.keyframe {
                KeyframeSetting::Inherit => 0,
                KeyframeSetting::Manual(n) => n.min(i16::MAX as u16) as i16,
                KeyframeSetting::Auto { max } => -(max.min(i16::MAX as u16) as i16),
            };
            out.extend_from_slice(&keyframe.to_be_bytes());
            out.extend_from_slice(&p.packet_len.to_be_bytes());
            let (data, ec) = match p.fec {
                FecShape::Auto => (0u8, 0u8),
                FecShape::Manual { data, ec } => (data.min(255) as u8, ec.min(255) as u8),
            };
            out.push(data);
            out.push(ec);
            out.push(p.video_data_rate.map_or(0, |r| r.to_raw()) as i8 as u8);
            out.push(p.data_data_rate.map_or(0, |r| r.to_raw()) as i8 as u8);
            out.extend_from_slice(&(p.retransmission_window_ms.min(u16::MAX as u32) as u16).to_be_bytes());
            out.push(encode_dup(p.retransmission_dup));
            out.push(encode_dup(p.transmission_dup));
        }
        out
    }

    pub fn values_to_display(&self, tier: VideoTier, user: &UserVideoParams) -> Vec<DisplayValue> {
        let stored = self.stored(tier);
        let r = self.get(tier, user);
        let inherit = |v: Option<i64>, resolved: i64| match v {
            Some(v) => v.to_string(),
            None => format!("inherit ({})", resolved),
        };
        let keyframe = match stored.keyframe {
            KeyframeSetting::Inherit => format!("inherit ({})", r.keyframe_interval),
            KeyframeSetting::Manual(n) => n.to_string(),
            KeyframeSetting::Auto { max } => format!("auto (max {})", max),
        };
        let fec = match stored.fec {
            FecShape::Auto => "auto".to_string(),
            FecShape::Manual { data, ec } => format!("{}/{}", data, ec),
        };
        let dup = |d: DupPercent| match d {
            DupPercent::Auto => "auto".to_string(),
            DupPercent::Fixed(p) => format!("{}%", p),
        };
        vec![
            ("bitrate_kbps", SettingValue::Text(inherit(stored.bitrate_kbps.map(i64::from), r.bitrate_kbps as i64))),
            ("fps", SettingValue::Text(inherit(stored.fps.map(i64::from), r.fps as i64))),
            ("keyframe_interval", SettingValue::Text(keyframe)),
            ("packet_len", SettingValue::range(stored.packet_len as i64, MIN_PACKET_LEN as i64, 1500, 10)),
            ("fec", SettingValue::Text(fec)),
            ("retransmission_window_ms", SettingValue::range(stored.retransmission_window_ms as i64, 0, 1000, 10)),
            ("retransmission_dup", SettingValue::Text(dup(stored.retransmission_dup))),
            ("transmission_dup", SettingValue::Text(dup(stored.transmission_dup))),
        ]
    }
}

fn encode_dup(d: DupPercent) -> u8 {
    match d {
        DupPercent::Auto => 0xFF,
        DupPercent::Fixed(p) => p,
    }
}
