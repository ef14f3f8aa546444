use serde::Deserialize;
use std::sync::{Arc, RwLock};

use fpvlink_core::{
    DataRate, FecShape, Frequency, InterfaceIndex, KeyframeSetting, LinkDirection, LinkId, LinkUsage, PlatformLimits, RadioModulation,
    TxRxMode, UserVideoParams, VideoLinkProfile, VideoTier, FEC_PACKET_OVERHEAD,
};

use crate::stack_config_sik::CfgSik;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ClockSyncMode {
    /// Raw one-way timestamps, no correction
    None,
    /// Offset from RTT/2
    Basic,
    /// Regression over low-RTT samples, compensates drift
    Advanced,
}

#[derive(Debug, Clone)]
pub struct CfgController {
    pub limits: PlatformLimits,
    /// Vehicle commands without acknowledgment are failed after this long
    pub command_timeout_ms: u64,
    /// Scan the system for radio interfaces at startup
    pub scan_interfaces: bool,
}

impl Default for CfgController {
    fn default() -> Self {
        Self {
            limits: PlatformLimits::default(),
            command_timeout_ms: 2000,
            scan_interfaces: true,
        }
    }
}

/// Persisted user overrides for one physical interface
#[derive(Debug, Clone, Default)]
pub struct CfgInterfaceOverride {
    pub index: InterfaceIndex,
    pub disabled: Option<bool>,
    pub mode: Option<TxRxMode>,
    pub preferred_tx: Option<u8>,
    pub internal: Option<bool>,
}

/// Persisted logical link, as last negotiated with the vehicle
#[derive(Debug, Clone)]
pub struct CfgLink {
    pub id: LinkId,
    pub frequency: Frequency,
    pub usage: LinkUsage,
    pub direction: LinkDirection,
    pub relay: bool,
    pub use_lowest_datarate_for_data: bool,
    pub modulation: RadioModulation,
    /// Local interfaces assigned to this link
    pub interfaces: Vec<InterfaceIndex>,
}

#[derive(Debug, Clone)]
pub struct CfgVideo {
    pub user: UserVideoParams,
    pub high: VideoLinkProfile,
    pub medium: VideoLinkProfile,
    pub low: VideoLinkProfile,
}

impl CfgVideo {
    pub fn profile(&self, tier: VideoTier) -> &VideoLinkProfile {
        match tier {
            VideoTier::High => &self.high,
            VideoTier::Medium => &self.medium,
            VideoTier::Low => &self.low,
        }
    }

    pub fn profile_mut(&mut self, tier: VideoTier) -> &mut VideoLinkProfile {
        match tier {
            VideoTier::High => &mut self.high,
            VideoTier::Medium => &mut self.medium,
            VideoTier::Low => &mut self.low,
        }
    }
}

impl Default for CfgVideo {
    fn default() -> Self {
        Self {
            user: UserVideoParams::default(),
            high: VideoLinkProfile::factory_default(VideoTier::High),
            medium: VideoLinkProfile::factory_default(VideoTier::Medium),
            low: VideoLinkProfile::factory_default(VideoTier::Low),
        }
    }
}

/// Adaptive bitrate controller tuning
#[derive(Debug, Clone)]
pub struct CfgAdaptive {
    /// When false, only the bitrate floor is enforced
    pub overload_check: bool,
    /// 1 = slow and conservative, 10 = fast and aggressive
    pub strength: u8,
    pub bitrate_quantum_kbps: u32,
    pub lowest_allowed_bitrate_kbps: u32,
    /// Minimum time spent degraded before recovery is attempted
    pub cooldown_ms: u64,
    /// Consecutive good samples needed before recovery is attempted
    pub recover_good_samples: u32,
    /// Recovery is confirmed if no overload is seen for this long
    pub confirm_window_ms: u64,
    pub ack_rtt_threshold_ms: u32,
    /// Samples older than this are dropped from the rolling window
    pub sample_window_ms: u64,
}

impl Default for CfgAdaptive {
    fn default() -> Self {
        Self {
            overload_check: true,
            strength: 5,
            bitrate_quantum_kbps: 1000,
            lowest_allowed_bitrate_kbps: 1000,
            cooldown_ms: 3000,
            recover_good_samples: 5,
            confirm_window_ms: 2000,
            ack_rtt_threshold_ms: 150,
            sample_window_ms: 5000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CfgRetransmission {
    pub enabled: bool,
    /// No repeated request for the same slot before this elapsed
    pub retry_timeout_ms: u64,
    /// Request the next block proactively after this much video silence. 0 disables.
    pub request_on_video_silence_ms: u64,
    /// Suspend requests when no vehicle acknowledgment was seen for this long
    pub disable_after_link_lost_ms: u64,
    /// Open blocks kept per stream before the oldest is abandoned
    pub max_open_blocks: usize,
}

impl Default for CfgRetransmission {
    fn default() -> Self {
        Self {
            enabled: true,
            retry_timeout_ms: 20,
            request_on_video_silence_ms: 0,
            disable_after_link_lost_ms: 2000,
            max_open_blocks: 16,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CfgClockSync {
    pub mode: ClockSyncMode,
    /// Pings per second
    pub ping_frequency: u8,
    /// Samples kept for the advanced regression
    pub regression_samples: usize,
}

impl Default for CfgClockSync {
    fn default() -> Self {
        Self {
            mode: ClockSyncMode::Basic,
            ping_frequency: 1,
            regression_samples: 32,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub debug_log: Option<String>,
    /// Control loop period
    pub tick_ms: u64,

    pub controller: CfgController,
    pub interfaces: Vec<CfgInterfaceOverride>,
    pub links: Vec<CfgLink>,
    pub video: CfgVideo,
    pub adaptive: CfgAdaptive,
    pub retransmission: CfgRetransmission,
    pub clock_sync: CfgClockSync,
    pub sik: CfgSik,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            debug_log: None,
            tick_ms: 10,
            controller: CfgController::default(),
            interfaces: vec![],
            links: vec![],
            video: CfgVideo::default(),
            adaptive: CfgAdaptive::default(),
            retransmission: CfgRetransmission::default(),
            clock_sync: CfgClockSync::default(),
            sik: CfgSik::default(),
        }
    }
}

impl ControllerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate that all configuration fields are within range.
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_ms == 0 {
            return Err("tick_ms must be positive".to_string());
        }
        let limits = &self.controller.limits;
        if limits.max_block_packets < 2 {
            return Err("max_block_packets must be at least 2".to_string());
        }
        if limits.mtu < FEC_PACKET_OVERHEAD + 10 {
            return Err(format!("mtu must be at least {}", FEC_PACKET_OVERHEAD + 10));
        }
        if !(1..=10).contains(&self.adaptive.strength) {
            return Err(format!("adaptive strength {} outside 1..=10", self.adaptive.strength));
        }
        if self.adaptive.bitrate_quantum_kbps == 0 {
            return Err("adaptive bitrate_quantum_kbps must be positive".to_string());
        }
        if self.clock_sync.ping_frequency == 0 {
            return Err("clock_sync ping_frequency must be positive".to_string());
        }

        for (i, link) in self.links.iter().enumerate() {
            if self.links[..i].iter().any(|l| l.id == link.id) {
                return Err(format!("duplicate link id {}", link.id));
            }
            if link.frequency.band().is_none() {
                return Err(format!("link {} frequency {} not in any known band", link.id, link.frequency));
            }
            if let DataRate::Mcs(idx) = link.modulation.data_rate {
                if idx > fpvlink_core::MAX_MCS_INDEX {
                    return Err(format!("link {} MCS index {} out of range", link.id, idx));
                }
            }
        }

        for tier in VideoTier::ALL {
            let p = self.video.profile(tier);
            if let FecShape::Manual { data, ec } = p.fec {
                if data == 0 || data + ec > limits.max_block_packets {
                    return Err(format!("{} FEC shape {}+{} exceeds block limit", tier, data, ec));
                }
            }
            if !p.retransmission_dup.is_valid() || !p.transmission_dup.is_valid() {
                return Err(format!("{} duplication must be 0..=100 in steps of 10", tier));
            }
            if let KeyframeSetting::Manual(0) = p.keyframe {
                return Err(format!("{} keyframe interval must be positive", tier));
            }
        }
        Ok(())
    }
}

/// Mutable runtime state shared with UI collaborators (lock protected).
/// Written by the control loop only.
#[derive(Debug, Clone, Default)]
pub struct ControllerState {
    pub vehicle_paired: bool,
    pub retransmissions_suspended: bool,
    pub active_tier: Option<VideoTier>,
    pub adaptive_pinned: bool,
    pub sik_failed: bool,
    pub topology_violations: usize,
    pub clock_offset_ms: Option<i64>,
}

/// Global shared configuration: immutable config + mutable state.
#[derive(Clone)]
pub struct SharedConfig {
    /// Read-only configuration (immutable after construction).
    cfg: Arc<ControllerConfig>,
    /// Mutable state guarded with RwLock (write by the control loop, read by others).
    state: Arc<RwLock<ControllerState>>,
}

impl SharedConfig {
    pub fn new() -> Self {
        Self::from_config(ControllerConfig::new())
    }

    pub fn from_config(cfg: ControllerConfig) -> Self {
        Self::from_parts(cfg, ControllerState::default())
    }

    /// The caller is responsible for having validated `cfg`
    pub fn from_parts(cfg: ControllerConfig, state: ControllerState) -> Self {
        Self {
            cfg: Arc::new(cfg),
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Access immutable config.
    pub fn config(&self) -> Arc<ControllerConfig> {
        Arc::clone(&self.cfg)
    }

    /// Read guard for mutable state.
    pub fn state_read(&self) -> std::sync::RwLockReadGuard<'_, ControllerState> {
        self.state.read().expect("ControllerState RwLock poisoned")
    }

    /// Write guard for mutable state.
    pub fn state_write(&self) -> std::sync::RwLockWriteGuard<'_, ControllerState> {
        self.state.write().expect("ControllerState RwLock poisoned")
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self::new()
    }
}
