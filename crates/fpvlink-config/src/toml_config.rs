use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::Deserialize;
use toml::Value;

use fpvlink_core::{
    ChannelWidth, DataRate, DupPercent, FecShape, Frequency, KeyframeSetting, LinkDirection, LinkUsage, RadioModulation, TxRxMode,
    VideoLinkProfile,
};

use super::stack_config::{
    CfgAdaptive, CfgClockSync, CfgController, CfgInterfaceOverride, CfgLink, CfgRetransmission, CfgVideo, ClockSyncMode,
    ControllerConfig, ControllerState, SharedConfig,
};
use super::stack_config_sik::{CfgSikDto, apply_sik_patch};

pub const EXPECTED_CONFIG_VERSION: &str = "0.3";

/// Build `SharedConfig` from a TOML configuration file
pub fn from_toml_str(toml_str: &str) -> Result<SharedConfig, Box<dyn std::error::Error>> {
    let root: TomlConfigRoot = toml::from_str(toml_str)?;

    if !root.config_version.eq(EXPECTED_CONFIG_VERSION) {
        return Err(format!(
            "Unrecognized config_version: {}, expect {}",
            root.config_version, EXPECTED_CONFIG_VERSION
        )
        .into());
    }
    check_unknown_fields(&root)?;

    let mut cfg = ControllerConfig::new();
    cfg.debug_log = root.debug_log;
    if let Some(v) = root.tick_ms {
        cfg.tick_ms = v;
    }

    if let Some(c) = root.controller {
        apply_controller_patch(&mut cfg.controller, c);
    }
    cfg.interfaces = root.interface.into_iter().map(interface_from_dto).collect();
    cfg.links = root.link.into_iter().map(link_from_dto).collect();

    if let Some(video) = root.video {
        apply_video_patch(&mut cfg.video, video)?;
    }
    if let Some(a) = root.adaptive {
        apply_adaptive_patch(&mut cfg.adaptive, a);
    }
    if let Some(r) = root.retransmission {
        apply_retransmission_patch(&mut cfg.retransmission, r);
    }
    if let Some(cs) = root.clock_sync {
        apply_clock_sync_patch(&mut cfg.clock_sync, cs);
    }
    if let Some(sik) = root.sik {
        apply_sik_patch(&mut cfg.sik, sik);
    }

    cfg.validate().map_err(|e| format!("Invalid configuration: {}", e))?;

    Ok(SharedConfig::from_parts(cfg, ControllerState::default()))
}

/// Build `SharedConfig` from any reader.
pub fn from_reader<R: Read>(reader: R) -> Result<SharedConfig, Box<dyn std::error::Error>> {
    let mut contents = String::new();
    let mut reader = BufReader::new(reader);
    reader.read_to_string(&mut contents)?;
    from_toml_str(&contents)
}

/// Build `SharedConfig` from a file path.
pub fn from_file<P: AsRef<Path>>(path: P) -> Result<SharedConfig, Box<dyn std::error::Error>> {
    let f = File::open(path)?;
    let r = BufReader::new(f);
    let cfg = from_reader(r)?;
    Ok(cfg)
}

fn check_unknown_fields(root: &TomlConfigRoot) -> Result<(), String> {
    fn check(section: &str, extra: &HashMap<String, Value>) -> Result<(), String> {
        if extra.is_empty() {
            Ok(())
        } else {
            Err(format!("Unrecognized fields: {}::{:?}", section, sorted_keys(extra)))
        }
    }

    if !root.extra.is_empty() {
        return Err(format!("Unrecognized top-level fields: {:?}", sorted_keys(&root.extra)));
    }
    if let Some(ref c) = root.controller {
        check("controller", &c.extra)?;
    }
    for i in root.interface.iter() {
        check("interface", &i.extra)?;
    }
    for l in root.link.iter() {
        check("link", &l.extra)?;
    }
    if let Some(ref v) = root.video {
        check("video", &v.extra)?;
        if let Some(ref u) = v.user {
            check("video.user", &u.extra)?;
        }
        for (name, p) in [("video.high", &v.high), ("video.medium", &v.medium), ("video.low", &v.low)] {
            if let Some(p) = p {
                check(name, &p.extra)?;
            }
        }
    }
    if let Some(ref a) = root.adaptive {
        check("adaptive", &a.extra)?;
    }
    if let Some(ref r) = root.retransmission {
        check("retransmission", &r.extra)?;
    }
    if let Some(ref cs) = root.clock_sync {
        check("clock_sync", &cs.extra)?;
    }
    if let Some(ref sik) = root.sik {
        check("sik", &sik.extra)?;
    }
    Ok(())
}

fn apply_controller_patch(dst: &mut CfgController, src: ControllerDto) {
    if let Some(v) = src.max_block_packets {
        dst.limits.max_block_packets = v;
    }
    if let Some(v) = src.mtu {
        dst.limits.mtu = v;
    }
    if let Some(v) = src.command_timeout_ms {
        dst.command_timeout_ms = v;
    }
    if let Some(v) = src.scan_interfaces {
        dst.scan_interfaces = v;
    }
}

fn interface_from_dto(src: InterfaceDto) -> CfgInterfaceOverride {
    CfgInterfaceOverride {
        index: src.index,
        disabled: src.disabled,
        mode: src.mode,
        preferred_tx: src.preferred_tx,
        internal: src.internal,
    }
}

fn link_from_dto(src: LinkDto) -> CfgLink {
    CfgLink {
        id: src.id,
        frequency: Frequency(src.frequency_mhz),
        usage: src.usage,
        direction: src.direction.unwrap_or(LinkDirection::Bidirectional),
        relay: src.relay,
        use_lowest_datarate_for_data: src.use_lowest_datarate_for_data,
        modulation: RadioModulation {
            data_rate: src.data_rate.unwrap_or(DataRate::Mcs(1)),
            width: src.width.unwrap_or_default(),
            ldpc: src.ldpc,
            sgi: src.sgi,
            stbc: src.stbc,
        },
        interfaces: src.interfaces,
    }
}

fn apply_video_patch(dst: &mut CfgVideo, src: VideoDto) -> Result<(), String> {
    if let Some(u) = src.user {
        if let Some(v) = u.bitrate_kbps {
            dst.user.bitrate_kbps = v;
        }
        if let Some(v) = u.fps {
            dst.user.fps = v;
        }
        if let Some(v) = u.keyframe_interval {
            dst.user.keyframe_interval = v;
        }
    }
    if let Some(p) = src.high {
        apply_profile_patch(&mut dst.high, p)?;
    }
    if let Some(p) = src.medium {
        apply_profile_patch(&mut dst.medium, p)?;
    }
    if let Some(p) = src.low {
        apply_profile_patch(&mut dst.low, p)?;
    }
    Ok(())
}

/// The file format keeps the settings store's sentinels: 0 inherits,
/// a negative keyframe interval means auto with that ceiling, -1 duplication means auto.
fn apply_profile_patch(dst: &mut VideoLinkProfile, src: ProfileDto) -> Result<(), String> {
    if let Some(v) = src.bitrate_kbps {
        dst.bitrate_kbps = (v != 0).then_some(v);
    }
    if let Some(v) = src.fps {
        dst.fps = (v != 0).then_some(v);
    }
    if let Some(v) = src.keyframe_interval {
        dst.keyframe = match v {
            0 => KeyframeSetting::Inherit,
            v if v > 0 => KeyframeSetting::Manual(v.min(u16::MAX as i32) as u16),
            v => KeyframeSetting::Auto { max: (-v).min(u16::MAX as i32) as u16 },
        };
    }
    if let Some(v) = src.packet_len {
        dst.packet_len = v;
    }
    match (src.fec_data, src.fec_ec) {
        (Some(0), _) => dst.fec = FecShape::Auto,
        (Some(data), Some(ec)) => dst.fec = FecShape::Manual { data, ec },
        (Some(_), None) | (None, Some(_)) => return Err("fec_data and fec_ec must be given together".to_string()),
        (None, None) => {}
    }
    if let Some(v) = src.video_data_rate {
        dst.video_data_rate = data_rate_override(v)?;
    }
    if let Some(v) = src.data_data_rate {
        dst.data_data_rate = data_rate_override(v)?;
    }
    if let Some(v) = src.retransmission_window_ms {
        dst.retransmission_window_ms = v;
    }
    if let Some(v) = src.retransmission_dup {
        dst.retransmission_dup = dup_from_raw(v)?;
    }
    if let Some(v) = src.transmission_dup {
        dst.transmission_dup = dup_from_raw(v)?;
    }
    Ok(())
}

fn data_rate_override(raw: i32) -> Result<Option<DataRate>, String> {
    if raw == 0 {
        return Ok(None);
    }
    DataRate::from_raw(raw).map(Some).ok_or_else(|| format!("invalid data rate {}", raw))
}

fn dup_from_raw(raw: i16) -> Result<DupPercent, String> {
    match raw {
        -1 => Ok(DupPercent::Auto),
        0..=100 if raw % 10 == 0 => Ok(DupPercent::Fixed(raw as u8)),
        _ => Err(format!("invalid duplication percentage {}", raw)),
    }
}

fn apply_adaptive_patch(dst: &mut CfgAdaptive, src: AdaptiveDto) {
    if let Some(v) = src.overload_check {
        dst.overload_check = v;
    }
    if let Some(v) = src.strength {
        dst.strength = v;
    }
    if let Some(v) = src.bitrate_quantum_kbps {
        dst.bitrate_quantum_kbps = v;
    }
    if let Some(v) = src.lowest_allowed_bitrate_kbps {
        dst.lowest_allowed_bitrate_kbps = v;
    }
    if let Some(v) = src.cooldown_ms {
        dst.cooldown_ms = v;
    }
    if let Some(v) = src.recover_good_samples {
        dst.recover_good_samples = v;
    }
    if let Some(v) = src.confirm_window_ms {
        dst.confirm_window_ms = v;
    }
    if let Some(v) = src.ack_rtt_threshold_ms {
        dst.ack_rtt_threshold_ms = v;
    }
    if let Some(v) = src.sample_window_ms {
        dst.sample_window_ms = v;
    }
}

fn apply_retransmission_patch(dst: &mut CfgRetransmission, src: RetransmissionDto) {
    if let Some(v) = src.enabled {
        dst.enabled = v;
    }
    if let Some(v) = src.retry_timeout_ms {
        dst.retry_timeout_ms = v;
    }
    if let Some(v) = src.request_on_video_silence_ms {
        dst.request_on_video_silence_ms = v;
    }
    if let Some(v) = src.disable_after_link_lost_ms {
        dst.disable_after_link_lost_ms = v;
    }
    if let Some(v) = src.max_open_blocks {
        dst.max_open_blocks = v;
    }
}

fn apply_clock_sync_patch(dst: &mut CfgClockSync, src: ClockSyncDto) {
    if let Some(v) = src.mode {
        dst.mode = v;
    }
    if let Some(v) = src.ping_frequency {
        dst.ping_frequency = v;
    }
    if let Some(v) = src.regression_samples {
        dst.regression_samples = v;
    }
}

fn sorted_keys(map: &HashMap<String, Value>) -> Vec<&str> {
    let mut v: Vec<&str> = map.keys().map(|s| s.as_str()).collect();
    v.sort_unstable();
    v
}

/// ----------------------- DTOs for input shape -----------------------

#[derive(Deserialize)]
struct TomlConfigRoot {
    config_version: String,
    debug_log: Option<String>,
    tick_ms: Option<u64>,

    #[serde(default)]
    controller: Option<ControllerDto>,

    #[serde(default)]
    interface: Vec<InterfaceDto>,

    #[serde(default)]
    link: Vec<LinkDto>,

    #[serde(default)]
    video: Option<VideoDto>,

    #[serde(default)]
    adaptive: Option<AdaptiveDto>,

    #[serde(default)]
    retransmission: Option<RetransmissionDto>,

    #[serde(default)]
    clock_sync: Option<ClockSyncDto>,

    #[serde(default)]
    sik: Option<CfgSikDto>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct ControllerDto {
    max_block_packets: Option<u16>,
    mtu: Option<u16>,
    command_timeout_ms: Option<u64>,
    scan_interfaces: Option<bool>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct InterfaceDto {
    index: u16,
    disabled: Option<bool>,
    mode: Option<TxRxMode>,
    preferred_tx: Option<u8>,
    internal: Option<bool>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct LinkDto {
    id: u8,
    frequency_mhz: u32,
    usage: LinkUsage,
    direction: Option<LinkDirection>,
    #[serde(default)]
    relay: bool,
    #[serde(default)]
    use_lowest_datarate_for_data: bool,
    data_rate: Option<DataRate>,
    width: Option<ChannelWidth>,
    #[serde(default)]
    ldpc: bool,
    #[serde(default)]
    sgi: bool,
    #[serde(default)]
    stbc: bool,
    #[serde(default)]
    interfaces: Vec<u16>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct VideoDto {
    user: Option<UserVideoDto>,
    high: Option<ProfileDto>,
    medium: Option<ProfileDto>,
    low: Option<ProfileDto>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct UserVideoDto {
    bitrate_kbps: Option<u32>,
    fps: Option<u16>,
    keyframe_interval: Option<u16>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct ProfileDto {
    bitrate_kbps: Option<u32>,
    fps: Option<u16>,
    keyframe_interval: Option<i32>,
    packet_len: Option<u16>,
    fec_data: Option<u16>,
    fec_ec: Option<u16>,
    video_data_rate: Option<i32>,
    data_data_rate: Option<i32>,
    retransmission_window_ms: Option<u32>,
    retransmission_dup: Option<i16>,
    transmission_dup: Option<i16>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct AdaptiveDto {
    overload_check: Option<bool>,
    strength: Option<u8>,
    bitrate_quantum_kbps: Option<u32>,
    lowest_allowed_bitrate_kbps: Option<u32>,
    cooldown_ms: Option<u64>,
    recover_good_samples: Option<u32>,
    confirm_window_ms: Option<u64>,
    ack_rtt_threshold_ms: Option<u32>,
    sample_window_ms: Option<u64>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct RetransmissionDto {
    enabled: Option<bool>,
    retry_timeout_ms: Option<u64>,
    request_on_video_silence_ms: Option<u64>,
    disable_after_link_lost_ms: Option<u64>,
    max_open_blocks: Option<usize>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct ClockSyncDto {
    mode: Option<ClockSyncMode>,
    ping_frequency: Option<u8>,
    regression_samples: Option<usize>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use fpvlink_core::VideoTier;

    const SAMPLE: &str = r#"
config_version = "0.3"
tick_ms = 5

[controller]
max_block_packets = 32
mtu = 1200

[[interface]]
index = 1
mode = "TxOnly"
preferred_tx = 2

[[link]]
id = 0
frequency_mhz = 5800
usage = "VideoAndData"
data_rate = -1
interfaces = [0, 1]

[[link]]
id = 1
frequency_mhz = 915
usage = "DataOnly"
direction = "UplinkOnly"
data_rate = 12

[video.medium]
bitrate_kbps = 0
keyframe_interval = -45
fec_data = 8
fec_ec = 4
retransmission_dup = -1

[adaptive]
strength = 8

[clock_sync]
mode = "Advanced"

[sik]
max_retries = 5
"#;

    #[test]
    fn test_parse_sample() {
        let shared = from_toml_str(SAMPLE).unwrap();
        let cfg = shared.config();
        assert_eq!(cfg.tick_ms, 5);
        assert_eq!(cfg.controller.limits.max_block_packets, 32);
        assert_eq!(cfg.interfaces[0].mode, Some(TxRxMode::TxOnly));
        assert_eq!(cfg.links.len(), 2);
        assert_eq!(cfg.links[0].modulation.data_rate, DataRate::Mcs(0));
        assert_eq!(cfg.links[1].modulation.data_rate, DataRate::Legacy(12));
        assert_eq!(cfg.links[1].direction, LinkDirection::UplinkOnly);

        let medium = cfg.video.profile(VideoTier::Medium);
        assert_eq!(medium.bitrate_kbps, None);
        assert_eq!(medium.keyframe, KeyframeSetting::Auto { max: 45 });
        assert_eq!(medium.fec, FecShape::Manual { data: 8, ec: 4 });
        assert_eq!(medium.retransmission_dup, DupPercent::Auto);

        assert_eq!(cfg.adaptive.strength, 8);
        assert_eq!(cfg.clock_sync.mode, ClockSyncMode::Advanced);
        assert_eq!(cfg.sik.max_retries, 5);
    }

    #[test]
    fn test_reject_unknown_field() {
        let toml = "config_version = \"0.3\"\n[adaptive]\nstrenght = 3\n";
        let err = from_toml_str(toml).err().unwrap();
        assert!(err.to_string().contains("strenght"));
    }

    #[test]
    fn test_reject_version() {
        assert!(from_toml_str("config_version = \"0.1\"\n").is_err());
    }

    #[test]
    fn test_reject_invalid_dup_and_strength() {
        let toml = "config_version = \"0.3\"\n[video.low]\ntransmission_dup = 25\n";
        assert!(from_toml_str(toml).is_err());
        let toml = "config_version = \"0.3\"\n[adaptive]\nstrength = 11\n";
        assert!(from_toml_str(toml).is_err());
    }

    #[test]
    fn test_parse_shipped_example() {
        let shared = from_toml_str(include_str!("../../../bins/fpvlink-ground/config.example.toml")).unwrap();
        let cfg = shared.config();
        assert_eq!(cfg.links[0].modulation.data_rate, DataRate::Mcs(2));
        assert!(cfg.links[0].modulation.ldpc);
        assert_eq!(cfg.video.profile(VideoTier::Low).fec, FecShape::Manual { data: 6, ec: 6 });
        assert_eq!(cfg.clock_sync.ping_frequency, 4);
    }
}
