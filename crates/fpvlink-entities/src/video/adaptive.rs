use std::collections::BTreeMap;

use fpvlink_config::{CfgAdaptive, SharedConfig};
use fpvlink_core::{
    CoreEntity, DataRate, DisplayValue, ErrorKind, LoopTime, SettingValue, StreamId, VideoLinkProfile, VideoTier,
};
use fpvlink_msgs::clocksync::{Confidence, RttMeasured};
use fpvlink_msgs::command::{CommandId, CommandKey, CommandOutcome, CommandResult};
use fpvlink_msgs::links::{LinkQualitySample, TopologySnapshot};
use fpvlink_msgs::notify::{UserWarning, WarningKind};
use fpvlink_msgs::video::ActiveProfile;
use fpvlink_msgs::{CoreMsg, CoreMsgInner};

use crate::links::ChangeStatus;
use crate::vehicle::command_tracker::CommandTracker;
use crate::video::profile_store::VideoProfileStore;
use crate::video::quality::QualityWindow;
use crate::{CoreEntityTrait, MessageQueue, PairingContext};

const STATE_OPTIONS: &[&str] = &["Nominal", "Degrading", "Degraded", "Recovering"];
const MAX_CUSTOM_SHIFT: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptiveState {
    Nominal,
    /// Overload confirmed, one reduction step is applied on the next tick
    Degrading,
    Degraded,
    /// Conditions improved, waiting for the confirmation window
    Recovering,
}

/// Manual override of the adaptive controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pin {
    Tier(VideoTier),
    /// Tier with the bitrate lowered by `shift` quanta
    Custom { tier: VideoTier, shift: u8 },
}

/// A reduction that can be undone during recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Bitrate { previous_kbps: u32 },
    DataRate { previous: DataRate },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdaptiveChange {
    VideoParams,
    QualitySwitch,
    Profile(VideoTier, VideoLinkProfile),
}

#[derive(Debug)]
struct StreamControl {
    state: AdaptiveState,
    overload_streak: u32,
    good_streak: u32,
    steps: Vec<Step>,
    degraded_since: LoopTime,
    recovering_since: LoopTime,
    bitrate_kbps: u32,
    data_rate: Option<DataRate>,
    rate_drops: usize,
    tier: VideoTier,
    pin: Option<Pin>,
    quality: QualityWindow,
    /// Video parameters changed, send them at end of tick
    params_dirty: bool,
}

impl StreamControl {
    fn new(window_ms: u64, bitrate_kbps: u32, data_rate: Option<DataRate>) -> Self {
        Self {
            state: AdaptiveState::Nominal,
            overload_streak: 0,
            good_streak: 0,
            steps: Vec::new(),
            degraded_since: LoopTime::ZERO,
            recovering_since: LoopTime::ZERO,
            bitrate_kbps,
            data_rate,
            rate_drops: 0,
            tier: VideoTier::High,
            pin: None,
            quality: QualityWindow::new(window_ms),
            params_dirty: true,
        }
    }
}

/// Adaptive bitrate and data rate controller.
/// Owns the video profile store; every stream runs its own state machine
/// fed by link quality samples from the radio stack.
pub struct Adaptive {
    config: SharedConfig,
    store: VideoProfileStore,
    streams: BTreeMap<StreamId, StreamControl>,
    commands: CommandTracker<AdaptiveChange>,
    topology: TopologySnapshot,
    /// Round trip from clock sync, used when samples carry no ack time
    clock_rtt_ms: Option<u32>,
    ts: LoopTime,
}

impl Adaptive {
    pub fn new(config: SharedConfig) -> Self {
        let cfg = config.config();
        let store = VideoProfileStore::new(&cfg.video);
        let nominal = store.get(VideoTier::High, &cfg.video.user).bitrate_kbps;
        let mut streams = BTreeMap::new();
        streams.insert(0, StreamControl::new(cfg.adaptive.sample_window_ms, nominal, None));
        Self {
            config,
            store,
            streams,
            commands: CommandTracker::new(CoreEntity::Adaptive),
            topology: TopologySnapshot::default(),
            clock_rtt_ms: None,
            ts: LoopTime::default(),
        }
    }

    pub fn store(&self) -> &VideoProfileStore {
        &self.store
    }

    pub fn state(&self, stream: StreamId) -> Option<AdaptiveState> {
        self.streams.get(&stream).map(|s| s.state)
    }

    pub fn tier(&self, stream: StreamId) -> Option<VideoTier> {
        self.streams.get(&stream).map(|s| s.tier)
    }

    pub fn bitrate_kbps(&self, stream: StreamId) -> Option<u32> {
        self.streams.get(&stream).map(|s| s.bitrate_kbps)
    }

    pub fn data_rate(&self, stream: StreamId) -> Option<DataRate> {
        self.streams.get(&stream).and_then(|s| s.data_rate)
    }

    pub fn pin(&self, stream: StreamId) -> Option<Pin> {
        self.streams.get(&stream).and_then(|s| s.pin)
    }

    /// Data rate of the video link as configured, the undegraded value
    fn nominal_data_rate(&self) -> Option<DataRate> {
        let id = self.topology.video_link?;
        self.topology.link(id).map(|l| l.modulation.data_rate)
    }

    fn nominal_bitrate(&self, ctx: &PairingContext) -> u32 {
        self.store.get(VideoTier::High, &ctx.video).bitrate_kbps
    }

    fn stream_mut(&mut self, stream: StreamId, ctx: &PairingContext) -> &mut StreamControl {
        let window = self.config.config().adaptive.sample_window_ms;
        let bitrate = self.nominal_bitrate(ctx);
        let rate = self.nominal_data_rate();
        self.streams
            .entry(stream)
            .or_insert_with(|| StreamControl::new(window, bitrate, rate))
    }

    /// Pins a stream to a tier until `release_to_auto`
    pub fn force_profile(&mut self, queue: &mut MessageQueue, ctx: &PairingContext, stream: StreamId, tier: VideoTier) -> Result<ChangeStatus, ErrorKind> {
        self.pin_stream(queue, ctx, stream, Pin::Tier(tier))
    }

    /// Pins a stream to a tier with its bitrate lowered by `shift` quanta
    pub fn force_custom_level(
        &mut self,
        queue: &mut MessageQueue,
        ctx: &PairingContext,
        stream: StreamId,
        tier: VideoTier,
        shift: u8,
    ) -> Result<ChangeStatus, ErrorKind> {
        if shift > MAX_CUSTOM_SHIFT {
            return Err(ErrorKind::InvalidParameter {
                field: "shift",
                reason: "custom level shift out of range",
            });
        }
        self.pin_stream(queue, ctx, stream, Pin::Custom { tier, shift })
    }

    fn pin_stream(&mut self, queue: &mut MessageQueue, ctx: &PairingContext, stream: StreamId, pin: Pin) -> Result<ChangeStatus, ErrorKind> {
        let (tier, shift) = match pin {
            Pin::Tier(t) => (t, 0),
            Pin::Custom { tier, shift } => (tier, shift),
        };
        let id = match tier {
            VideoTier::High => CommandId::ManualSwitchToVideoLinkQualityHigh,
            VideoTier::Medium => CommandId::ManualSwitchToVideoLinkQualityMedium,
            VideoTier::Low => CommandId::ManualSwitchToVideoLinkQualityLow,
        };
        let status = self.issue_if_paired(queue, ctx, id, shift as i32, vec![stream], AdaptiveChange::QualitySwitch)?;

        let cfg = self.config.config();
        let resolved = self.store.get(tier, &ctx.video);
        let bitrate = resolved
            .bitrate_kbps
            .saturating_sub(shift as u32 * cfg.adaptive.bitrate_quantum_kbps)
            .max(cfg.adaptive.lowest_allowed_bitrate_kbps);
        let nominal_rate = self.nominal_data_rate();

        let s = self.stream_mut(stream, ctx);
        s.pin = Some(pin);
        s.state = AdaptiveState::Nominal;
        s.steps.clear();
        s.overload_streak = 0;
        s.good_streak = 0;
        s.tier = tier;
        s.bitrate_kbps = bitrate;
        s.data_rate = nominal_rate;
        s.rate_drops = 0;
        s.params_dirty = true;
        tracing::info!("stream {}: pinned to {:?}, {} kbps", stream, pin, bitrate);
        Ok(status)
    }

    /// Hands control of a stream back to the adaptive state machine
    pub fn release_to_auto(&mut self, queue: &mut MessageQueue, ctx: &PairingContext, stream: StreamId) -> Result<ChangeStatus, ErrorKind> {
        let status = self.issue_if_paired(queue, ctx, CommandId::ManualSwitchToVideoLinkQualityAuto, 0, vec![stream], AdaptiveChange::QualitySwitch)?;
        let bitrate = self.nominal_bitrate(ctx);
        let rate = self.nominal_data_rate();
        let s = self.stream_mut(stream, ctx);
        s.pin = None;
        s.state = AdaptiveState::Nominal;
        s.steps.clear();
        s.overload_streak = 0;
        s.good_streak = 0;
        s.tier = VideoTier::High;
        s.bitrate_kbps = bitrate;
        s.data_rate = rate;
        s.rate_drops = 0;
        s.params_dirty = true;
        tracing::info!("stream {}: back to auto", stream);
        Ok(status)
    }

    /// Replaces a stored profile. While paired it takes effect on acknowledgment.
    pub fn update_profile(
        &mut self,
        queue: &mut MessageQueue,
        ctx: &PairingContext,
        tier: VideoTier,
        profile: VideoLinkProfile,
    ) -> Result<ChangeStatus, ErrorKind> {
        VideoProfileStore::validate(&profile, &ctx.limits)?;
        if ctx.is_paired() {
            let mut candidate = self.store.clone();
            candidate.set(tier, profile, &ctx.limits)?;
            self.commands.issue(
                queue,
                self.ts,
                CommandId::UpdateVideoLinkProfiles,
                None,
                0,
                candidate.encode_profiles(),
                AdaptiveChange::Profile(tier, profile),
            )?;
            Ok(ChangeStatus::PendingConfirmation)
        } else {
            self.store.set(tier, profile, &ctx.limits)?;
            self.mark_tier_dirty(tier);
            Ok(ChangeStatus::Applied)
        }
    }

    pub fn reset_profile(&mut self, queue: &mut MessageQueue, ctx: &PairingContext, tier: VideoTier) -> Result<ChangeStatus, ErrorKind> {
        self.update_profile(queue, ctx, tier, VideoLinkProfile::factory_default(tier))
    }

    fn mark_tier_dirty(&mut self, tier: VideoTier) {
        for s in self.streams.values_mut().filter(|s| s.tier == tier) {
            s.params_dirty = true;
        }
    }

    fn issue_if_paired(
        &mut self,
        queue: &mut MessageQueue,
        ctx: &PairingContext,
        id: CommandId,
        param: i32,
        payload: Vec<u8>,
        change: AdaptiveChange,
    ) -> Result<ChangeStatus, ErrorKind> {
        if !ctx.is_paired() {
            return Ok(ChangeStatus::Applied);
        }
        self.commands.issue(queue, self.ts, id, None, param, payload, change)?;
        Ok(ChangeStatus::PendingConfirmation)
    }

    fn is_overload(cfg: &CfgAdaptive, sample: &LinkQualitySample, clock_rtt_ms: Option<u32>) -> bool {
        if sample.block_budget_us > 0 && sample.block_tx_time_us > sample.block_budget_us {
            return true;
        }
        match sample.ack_rtt_ms.or(clock_rtt_ms) {
            Some(rtt) => rtt > cfg.ack_rtt_threshold_ms,
            None => false,
        }
    }

    fn rx_link_quality(&mut self, ctx: &PairingContext, sample: LinkQualitySample) {
        let cfg = self.config.config();
        let a = &cfg.adaptive;
        let clock_rtt = self.clock_rtt_ms;
        let now = sample.ts.max(self.ts);
        let s = self.stream_mut(sample.stream, ctx);
        s.quality.push(sample);

        if s.pin.is_some() {
            return;
        }

        if !a.overload_check {
            if s.bitrate_kbps < a.lowest_allowed_bitrate_kbps {
                s.bitrate_kbps = a.lowest_allowed_bitrate_kbps;
                s.params_dirty = true;
            }
            return;
        }

        let overload = Self::is_overload(a, &sample, clock_rtt);
        let needed = 11u32.saturating_sub(a.strength as u32).max(1);
        if overload {
            s.overload_streak += 1;
            s.good_streak = 0;
        } else {
            s.overload_streak = 0;
            s.good_streak += 1;
        }

        match s.state {
            AdaptiveState::Nominal | AdaptiveState::Degraded if overload && s.overload_streak >= needed => {
                tracing::info!("stream {}: overload confirmed after {} samples", sample.stream, s.overload_streak);
                s.state = AdaptiveState::Degrading;
                s.overload_streak = 0;
            }
            AdaptiveState::Degraded if !overload => {
                if s.degraded_since.elapsed_at_least(now, a.cooldown_ms) && s.good_streak >= a.recover_good_samples {
                    tracing::info!("stream {}: recovering", sample.stream);
                    s.state = AdaptiveState::Recovering;
                    s.recovering_since = now;
                    s.good_streak = 0;
                }
            }
            AdaptiveState::Recovering if overload => {
                tracing::info!("stream {}: overload during recovery", sample.stream);
                s.state = AdaptiveState::Degraded;
                s.degraded_since = now;
                s.overload_streak = 0;
            }
            _ => {}
        }
    }

    /// Applies one reduction: bitrate first, data rate once the bitrate is at the floor
    fn degrade_step(s: &mut StreamControl, cfg: &CfgAdaptive, ts: LoopTime) {
        if s.bitrate_kbps > cfg.lowest_allowed_bitrate_kbps {
            let previous_kbps = s.bitrate_kbps;
            s.bitrate_kbps = previous_kbps.saturating_sub(cfg.bitrate_quantum_kbps).max(cfg.lowest_allowed_bitrate_kbps);
            s.steps.push(Step::Bitrate { previous_kbps });
        } else if let Some((previous, lower)) = s.data_rate.and_then(|r| r.step_down().map(|l| (r, l))) {
            s.data_rate = Some(lower);
            s.rate_drops += 1;
            s.steps.push(Step::DataRate { previous });
        } else {
            tracing::debug!("degrade_step: nothing left to reduce");
        }
        s.tier = VideoTier::from_rate_drops(s.rate_drops);
        s.state = AdaptiveState::Degraded;
        s.degraded_since = ts;
        s.good_streak = 0;
        s.params_dirty = true;
    }

    fn undo_step(s: &mut StreamControl, ts: LoopTime) {
        match s.steps.pop() {
            Some(Step::Bitrate { previous_kbps }) => s.bitrate_kbps = previous_kbps,
            Some(Step::DataRate { previous }) => {
                s.data_rate = Some(previous);
                s.rate_drops = s.rate_drops.saturating_sub(1);
            }
            None => {}
        }
        s.tier = VideoTier::from_rate_drops(s.rate_drops);
        if s.steps.is_empty() {
            s.state = AdaptiveState::Nominal;
        } else {
            s.state = AdaptiveState::Degraded;
            s.degraded_since = ts;
        }
        s.good_streak = 0;
        s.params_dirty = true;
    }

    fn rx_topology(&mut self, snapshot: TopologySnapshot) {
        self.topology = snapshot;
        let rate = self.nominal_data_rate();
        for s in self.streams.values_mut() {
            if s.pin.is_some() || s.rate_drops == 0 {
                if s.data_rate != rate {
                    s.data_rate = rate;
                    s.params_dirty = true;
                }
            }
        }
    }

    fn rx_command_result(&mut self, queue: &mut MessageQueue, ctx: &PairingContext, result: CommandResult) {
        let Some(pending) = self.commands.resolve(result.token) else {
            tracing::debug!("rx_command_result: unknown token {}", result.token);
            return;
        };
        match (result.outcome, pending.change) {
            (CommandOutcome::Acked, AdaptiveChange::Profile(tier, profile)) => {
                if let Err(e) = self.store.set(tier, profile, &ctx.limits) {
                    tracing::warn!("acknowledged {} profile no longer valid: {}", tier, e);
                }
                self.mark_tier_dirty(tier);
            }
            (CommandOutcome::Acked, _) => {}
            (outcome, _) => {
                tracing::warn!("{} failed: {:?}", pending.id, outcome);
                queue.push_back(CoreMsg::new(
                    CoreEntity::Adaptive,
                    CoreEntity::Warnings,
                    self.ts,
                    CoreMsgInner::Warning(UserWarning::once(WarningKind::CommandFailed, format!("{} {:?}", pending.id, outcome))),
                ));
            }
        }
    }

    /// Sends SET_VIDEO_PARAMS for streams whose parameters changed.
    /// Deferred while an earlier SET_VIDEO_PARAMS is unacknowledged.
    fn flush_params(&mut self, queue: &mut MessageQueue, ctx: &PairingContext, ts: LoopTime) -> bool {
        let video_params_key = CommandKey::new(CommandId::SetVideoParams, None);
        let mut sent = false;
        let ids: Vec<StreamId> = self.streams.iter().filter(|(_, s)| s.params_dirty).map(|(id, _)| *id).collect();

        for id in ids {
            let Some(s) = self.streams.get(&id) else {
                continue;
            };
            let resolved = self.store.get(s.tier, &ctx.video);
            let bitrate = s.bitrate_kbps.min(resolved.bitrate_kbps);
            let data_rate = resolved.video_data_rate.or(s.data_rate);
            let fec = VideoProfileStore::pack_fec_shape(&resolved, &ctx.limits);
            let tier = s.tier;

            if ctx.is_paired() {
                if self.commands.is_pending(video_params_key) {
                    continue;
                }
                let mut payload = vec![id];
                payload.extend_from_slice(&resolved.fps.to_be_bytes());
                payload.extend_from_slice(&resolved.keyframe_interval.to_be_bytes());
                payload.push(resolved.keyframe_auto as u8);
                payload.push(data_rate.map_or(0, |r| r.to_raw()) as i8 as u8);
                payload.push(fec.data_packets as u8);
                payload.push(fec.ec_packets as u8);
                payload.extend_from_slice(&fec.packet_len.to_be_bytes());
                if let Err(e) = self
                    .commands
                    .issue(queue, ts, CommandId::SetVideoParams, None, bitrate as i32, payload, AdaptiveChange::VideoParams)
                {
                    tracing::debug!("flush_params: {}", e);
                    continue;
                }
            }

            tracing::info!("stream {}: {} {} kbps rate {:?} fec {}+{}", id, tier, bitrate, data_rate, fec.data_packets, fec.ec_packets);
            queue.push_back(CoreMsg::new(
                CoreEntity::Adaptive,
                CoreEntity::Retransmit,
                ts,
                CoreMsgInner::ActiveProfileChanged(ActiveProfile {
                    stream: id,
                    tier,
                    fec,
                    retransmission_window_ms: resolved.retransmission_window_ms,
                    retransmission_dup: resolved.retransmission_dup,
                    transmission_dup: resolved.transmission_dup,
                }),
            ));
            if let Some(s) = self.streams.get_mut(&id) {
                s.params_dirty = false;
            }
            sent = true;
        }
        sent
    }

    pub fn values_to_display(&self, stream: StreamId) -> Option<Vec<DisplayValue>> {
        let s = self.streams.get(&stream)?;
        let state = match s.state {
            AdaptiveState::Nominal => 0,
            AdaptiveState::Degrading => 1,
            AdaptiveState::Degraded => 2,
            AdaptiveState::Recovering => 3,
        };
        let pin = match s.pin {
            None => "auto".to_string(),
            Some(Pin::Tier(t)) => t.to_string(),
            Some(Pin::Custom { tier, shift }) => format!("{} -{}", tier, shift),
        };
        Some(vec![
            ("state", SettingValue::EnumSelect { selected: state, options: STATE_OPTIONS }),
            ("tier", SettingValue::Text(s.tier.to_string())),
            ("bitrate_kbps", SettingValue::Text(s.bitrate_kbps.to_string())),
            ("data_rate", SettingValue::Text(s.data_rate.map_or("-".to_string(), |r| r.to_string()))),
            ("mode", SettingValue::Text(pin)),
            ("loss_percent", SettingValue::Text(s.quality.avg_loss_percent().to_string())),
        ])
    }
}

impl CoreEntityTrait for Adaptive {
    fn entity(&self) -> CoreEntity {
        CoreEntity::Adaptive
    }

    fn set_config(&mut self, config: SharedConfig) {
        self.config = config;
    }

    fn rx_prim(&mut self, queue: &mut MessageQueue, ctx: &PairingContext, message: CoreMsg) {
        tracing::debug!("rx_prim: {} from {:?}", message.kind(), message.src);
        match message.msg {
            CoreMsgInner::LinkQuality(sample) => self.rx_link_quality(ctx, sample),
            CoreMsgInner::TopologyUpdate(snapshot) => self.rx_topology(snapshot),
            CoreMsgInner::RttMeasured(RttMeasured { rtt_ms, confidence }) => {
                self.clock_rtt_ms = (confidence >= Confidence::Low).then_some(rtt_ms);
            }
            CoreMsgInner::CommandResult(r) => self.rx_command_result(queue, ctx, r),
            _ => {
                tracing::warn!("Adaptive: unexpected message {}", message.kind());
            }
        }
    }

    fn tick_start(&mut self, queue: &mut MessageQueue, _ctx: &PairingContext, ts: LoopTime) {
        self.ts = ts;
        let cfg = self.config.config();

        for (id, s) in self.streams.iter_mut() {
            s.quality.age_out(ts);
            match s.state {
                AdaptiveState::Degrading => {
                    Self::degrade_step(s, &cfg.adaptive, ts);
                    tracing::info!("stream {}: degraded to {} kbps, {}", id, s.bitrate_kbps, s.tier);
                }
                AdaptiveState::Recovering if s.recovering_since.elapsed_at_least(ts, cfg.adaptive.confirm_window_ms) => {
                    Self::undo_step(s, ts);
                    tracing::info!("stream {}: recovered to {} kbps, {}, {:?}", id, s.bitrate_kbps, s.tier, s.state);
                }
                _ => {}
            }
        }

        let timeout = cfg.controller.command_timeout_ms;
        for expired in self.commands.expire(ts, timeout) {
            tracing::warn!("{} timed out", expired.id);
            if expired.change == AdaptiveChange::VideoParams {
                // Resend the current parameters
                for s in self.streams.values_mut() {
                    s.params_dirty = true;
                }
            }
            queue.push_back(CoreMsg::new(
                CoreEntity::Adaptive,
                CoreEntity::Warnings,
                ts,
                CoreMsgInner::Warning(UserWarning::once(WarningKind::CommandFailed, format!("{} timed out", expired.id))),
            ));
        }
    }

    fn tick_end(&mut self, queue: &mut MessageQueue, ctx: &PairingContext, ts: LoopTime) -> bool {
        let sent = self.flush_params(queue, ctx, ts);
        if let Some(s) = self.streams.get(&0) {
            let mut state = self.config.state_write();
            state.active_tier = Some(s.tier);
            state.adaptive_pinned = s.pin.is_some();
        }
        sent
    }
}
