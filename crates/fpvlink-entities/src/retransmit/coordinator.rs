use std::collections::BTreeMap;

use fpvlink_config::SharedConfig;
use fpvlink_core::{BlockSeq, CoreEntity, LoopTime, StreamId};
use fpvlink_msgs::command::LinkActivity;
use fpvlink_msgs::notify::{UserWarning, WarningKind};
use fpvlink_msgs::video::{ActiveProfile, BlockStatus, FecPacket, RetransmissionRequest, VideoBlockOut};
use fpvlink_msgs::{CoreMsg, CoreMsgInner};

use crate::fec::{CauchyReedSolomon, ErasureCode, FecBlock};
use crate::{CoreEntityTrait, MessageQueue, PairingContext};

/// Weight of the newest block in the loss estimate
const LOSS_EMA_ALPHA: f32 = 0.2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetransmitStats {
    pub recovered: u64,
    /// Recovered blocks that needed at least one EC share
    pub fec_recovered: u64,
    pub abandoned: u64,
    pub requests: u64,
    pub dropped_stale: u64,
    /// Packets with an impossible block geometry
    pub dropped_malformed: u64,
}

#[derive(Debug)]
struct StreamBlocks {
    blocks: BTreeMap<BlockSeq, FecBlock>,
    highest_finished: Option<BlockSeq>,
    highest_seen: Option<BlockSeq>,
    last_packet: LoopTime,
    last_silence_request: Option<LoopTime>,
    profile: Option<ActiveProfile>,
    loss_percent: f32,
}

impl StreamBlocks {
    fn new(ts: LoopTime) -> Self {
        Self {
            blocks: BTreeMap::new(),
            highest_finished: None,
            highest_seen: None,
            last_packet: ts,
            last_silence_request: None,
            profile: None,
            loss_percent: 0.0,
        }
    }

    fn finish(&mut self, seq: BlockSeq, lost_fraction: f32) {
        self.highest_finished = Some(self.highest_finished.map_or(seq, |h| h.max(seq)));
        self.loss_percent = (1.0 - LOSS_EMA_ALPHA) * self.loss_percent + LOSS_EMA_ALPHA * lost_fraction * 100.0;
    }
}

/// Receives FEC packets, reconstructs blocks and asks the vehicle to resend
/// what FEC cannot restore. Block state only moves forward in sequence number:
/// a block at or below the highest finished one is never opened again.
pub struct RetransmitCoordinator {
    config: SharedConfig,
    codec: Box<dyn ErasureCode>,
    streams: BTreeMap<StreamId, StreamBlocks>,
    /// Last acknowledgment on the command link
    last_ack: LoopTime,
    suspended: bool,
    stats: RetransmitStats,
    ts: LoopTime,
}

impl RetransmitCoordinator {
    pub fn new(config: SharedConfig) -> Self {
        Self::with_codec(config, Box::new(CauchyReedSolomon::new()))
    }

    pub fn with_codec(config: SharedConfig, codec: Box<dyn ErasureCode>) -> Self {
        Self {
            config,
            codec,
            streams: BTreeMap::new(),
            last_ack: LoopTime::ZERO,
            suspended: false,
            stats: RetransmitStats::default(),
            ts: LoopTime::default(),
        }
    }

    pub fn stats(&self) -> RetransmitStats {
        self.stats
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn open_blocks(&self, stream: StreamId) -> usize {
        self.streams.get(&stream).map_or(0, |s| s.blocks.len())
    }

    pub fn highest_finished(&self, stream: StreamId) -> Option<BlockSeq> {
        self.streams.get(&stream).and_then(|s| s.highest_finished)
    }

    /// Current loss estimate of a stream in percent
    pub fn loss_percent(&self, stream: StreamId) -> u8 {
        self.streams.get(&stream).map_or(0, |s| s.loss_percent.round().clamp(0.0, 100.0) as u8)
    }

    fn window_ms(&self, stream: StreamId) -> u64 {
        match self.streams.get(&stream).and_then(|s| s.profile) {
            Some(p) => p.retransmission_window_ms as u64,
            None => self.config.config().video.high.retransmission_window_ms as u64,
        }
    }

    fn deliver(&self, queue: &mut MessageQueue, stream: StreamId, block: &FecBlock, status: BlockStatus) {
        queue.push_back(CoreMsg::new(
            CoreEntity::Retransmit,
            CoreEntity::VideoPipeline,
            self.ts,
            CoreMsgInner::VideoBlock(VideoBlockOut {
                stream,
                seq: block.seq,
                status,
                packets: block.data_packets(),
            }),
        ));
    }

    pub fn on_packet(&mut self, queue: &mut MessageQueue, pkt: FecPacket) {
        let ts = self.ts;
        let cfg = self.config.config();
        let max_open = cfg.retransmission.max_open_blocks.max(1);
        let max_shares = (cfg.controller.limits.max_block_packets as usize).min(self.codec.max_shards());
        let shares = pkt.data_count as usize + pkt.ec_count as usize;
        if pkt.data_count == 0 || shares > max_shares || pkt.index as usize >= shares {
            tracing::warn!(
                "stream {}: block {} packet {} with geometry {}+{} dropped",
                pkt.stream,
                pkt.seq,
                pkt.index,
                pkt.data_count,
                pkt.ec_count
            );
            self.stats.dropped_malformed += 1;
            return;
        }
        let st = self.streams.entry(pkt.stream).or_insert_with(|| StreamBlocks::new(ts));
        st.last_packet = ts;

        if !st.blocks.contains_key(&pkt.seq) {
            if st.highest_finished.is_some_and(|h| pkt.seq <= h) {
                tracing::trace!("stream {}: packet for finished block {} dropped", pkt.stream, pkt.seq);
                self.stats.dropped_stale += 1;
                return;
            }
            st.blocks.insert(pkt.seq, FecBlock::new(pkt.seq, pkt.data_count, pkt.ec_count, ts));
        }

        let newer = st.highest_seen.is_none_or(|h| pkt.seq > h);
        if newer {
            st.highest_seen = Some(pkt.seq);
        }

        let Some(block) = st.blocks.get_mut(&pkt.seq) else {
            return;
        };
        if block.data_count != pkt.data_count || block.ec_count != pkt.ec_count {
            tracing::warn!("stream {}: block {} geometry changed mid-block, packet dropped", pkt.stream, pkt.seq);
            return;
        }
        block.insert(pkt.index, pkt.payload);
        // Measured over the air, before FEC fills the data slots
        let lost_fraction = block.loss_up_to_highest();
        let data_received = block.data_received();

        let recovered = match block.try_recover(self.codec.as_ref()) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("stream {}: block {} recovery failed: {}", pkt.stream, pkt.seq, e);
                false
            }
        };

        let mut check: Vec<BlockSeq> = Vec::new();
        if recovered {
            if let Some(block) = st.blocks.remove(&pkt.seq) {
                let used_fec = data_received < block.data_count as usize;
                st.finish(block.seq, lost_fraction);
                self.stats.recovered += 1;
                if used_fec {
                    self.stats.fec_recovered += 1;
                }
                tracing::debug!("stream {}: block {} recovered", pkt.stream, block.seq);
                self.deliver(queue, pkt.stream, &block, BlockStatus::Recovered);
            }
        } else if block.saw_last_index() {
            check.push(pkt.seq);
        }

        let Some(st) = self.streams.get_mut(&pkt.stream) else {
            return;
        };
        if newer {
            // Older blocks were not completed before this one started
            check.extend(st.blocks.keys().copied().filter(|&s| s < pkt.seq));
        }

        let mut evicted = Vec::new();
        while st.blocks.len() > max_open {
            let Some((_, mut oldest)) = st.blocks.pop_first() else {
                break;
            };
            oldest.abandon();
            st.finish(oldest.seq, oldest.loss_total());
            tracing::debug!("stream {}: block {} abandoned, too many open blocks", pkt.stream, oldest.seq);
            evicted.push(oldest);
        }
        for block in evicted {
            self.stats.abandoned += 1;
            self.deliver(queue, pkt.stream, &block, BlockStatus::Gap);
        }

        for seq in check {
            self.on_missing_detected(queue, pkt.stream, seq);
        }
    }

    /// Requests the missing data slots of a block, if retransmission is
    /// active and the block is still inside its window. Slots are requested
    /// again only after `retry_timeout_ms`.
    pub fn on_missing_detected(&mut self, queue: &mut MessageQueue, stream: StreamId, seq: BlockSeq) -> bool {
        let cfg = self.config.config();
        if !cfg.retransmission.enabled || self.suspended {
            return false;
        }
        let ts = self.ts;
        let window = self.window_ms(stream);
        let Some(st) = self.streams.get_mut(&stream) else {
            return false;
        };
        let dup_setting = st.profile.map(|p| p.retransmission_dup);
        let loss = st.loss_percent.round().clamp(0.0, 100.0) as u8;
        let Some(block) = st.blocks.get_mut(&seq) else {
            return false;
        };
        if !block.is_open() || block.created.elapsed_at_least(ts, window) {
            return false;
        }

        let retry = cfg.retransmission.retry_timeout_ms;
        let missing: Vec<u16> = block
            .missing_data()
            .into_iter()
            .filter(|&i| block.last_request(i).is_none_or(|t| t.elapsed_at_least(ts, retry)))
            .collect();
        if missing.is_empty() {
            return false;
        }
        for &i in &missing {
            block.mark_requested(i, ts);
        }

        let dup_percent = dup_setting.map_or(0, |d| d.resolve(loss));
        tracing::debug!("stream {}: requesting {:?} of block {} (dup {}%)", stream, missing, seq, dup_percent);
        self.stats.requests += 1;
        queue.push_back(CoreMsg::new(
            CoreEntity::Retransmit,
            CoreEntity::RadioStack,
            ts,
            CoreMsgInner::RetransmissionRequest(RetransmissionRequest {
                stream,
                seq,
                missing,
                dup_percent,
            }),
        ));
        true
    }

    /// Asks for the block after the newest one seen when video stopped arriving
    pub fn on_video_silence(&mut self, queue: &mut MessageQueue, stream: StreamId) -> bool {
        let cfg = self.config.config();
        if !cfg.retransmission.enabled || self.suspended {
            return false;
        }
        let ts = self.ts;
        let Some(st) = self.streams.get_mut(&stream) else {
            return false;
        };
        let Some(profile) = st.profile else {
            return false;
        };
        let next = st.highest_seen.map_or(0, |h| h.wrapping_add(1));
        st.last_silence_request = Some(ts);
        let dup_percent = profile.retransmission_dup.resolve(st.loss_percent.round().clamp(0.0, 100.0) as u8);

        tracing::debug!("stream {}: video silent, requesting block {}", stream, next);
        self.stats.requests += 1;
        queue.push_back(CoreMsg::new(
            CoreEntity::Retransmit,
            CoreEntity::RadioStack,
            ts,
            CoreMsgInner::RetransmissionRequest(RetransmissionRequest {
                stream,
                seq: next,
                missing: (0..profile.fec.data_packets).collect(),
                dup_percent,
            }),
        ));
        true
    }

    fn rx_link_activity(&mut self, activity: LinkActivity) {
        self.last_ack = self.last_ack.max(activity.last_ack);
        if self.suspended && !self.last_ack.elapsed_at_least(self.ts, self.config.config().retransmission.disable_after_link_lost_ms) {
            tracing::info!("command link back, retransmissions resumed");
            self.suspended = false;
            self.config.state_write().retransmissions_suspended = false;
        }
    }

    fn update_suspension(&mut self, ts: LoopTime) {
        let limit = self.config.config().retransmission.disable_after_link_lost_ms;
        let lost = self.last_ack.elapsed_at_least(ts, limit);
        if lost != self.suspended {
            if lost {
                tracing::info!("no acknowledgment for {} ms, retransmissions suspended", self.last_ack.age(ts));
            } else {
                tracing::info!("retransmissions resumed");
            }
            self.suspended = lost;
            self.config.state_write().retransmissions_suspended = lost;
        }
    }

    fn expire_blocks(&mut self, queue: &mut MessageQueue, ts: LoopTime) -> usize {
        let stream_ids: Vec<StreamId> = self.streams.keys().copied().collect();
        let mut abandoned = 0;
        for stream in stream_ids {
            let window = self.window_ms(stream);
            let Some(st) = self.streams.get_mut(&stream) else {
                continue;
            };
            let expired: Vec<BlockSeq> = st
                .blocks
                .values()
                .filter(|b| b.created.elapsed_at_least(ts, window))
                .map(|b| b.seq)
                .collect();
            let mut gaps = Vec::new();
            for seq in expired {
                if let Some(mut block) = st.blocks.remove(&seq) {
                    block.abandon();
                    st.finish(seq, block.loss_total());
                    tracing::debug!("stream {}: block {} unrecoverable, missing {:?}", stream, seq, block.missing_data());
                    gaps.push(block);
                }
            }
            for block in gaps {
                self.deliver(queue, stream, &block, BlockStatus::Gap);
                self.stats.abandoned += 1;
                abandoned += 1;
            }
        }
        abandoned
    }

    fn retry_missing(&mut self, queue: &mut MessageQueue) {
        let mut candidates: Vec<(StreamId, BlockSeq)> = Vec::new();
        for (&stream, st) in &self.streams {
            for block in st.blocks.values() {
                let superseded = st.highest_seen.is_some_and(|h| h > block.seq);
                if block.is_open() && (block.saw_last_index() || superseded) {
                    candidates.push((stream, block.seq));
                }
            }
        }
        for (stream, seq) in candidates {
            self.on_missing_detected(queue, stream, seq);
        }
    }

    fn check_silence(&mut self, queue: &mut MessageQueue, ts: LoopTime) {
        let silence_ms = self.config.config().retransmission.request_on_video_silence_ms;
        if silence_ms == 0 {
            return;
        }
        let silent: Vec<StreamId> = self
            .streams
            .iter()
            .filter(|(_, st)| {
                st.last_packet.elapsed_at_least(ts, silence_ms)
                    && st.last_silence_request.is_none_or(|t| t.elapsed_at_least(ts, silence_ms))
            })
            .map(|(&id, _)| id)
            .collect();
        for stream in silent {
            self.on_video_silence(queue, stream);
        }
    }
}

impl CoreEntityTrait for RetransmitCoordinator {
    fn entity(&self) -> CoreEntity {
        CoreEntity::Retransmit
    }

    fn set_config(&mut self, config: SharedConfig) {
        self.config = config;
    }

    fn rx_prim(&mut self, queue: &mut MessageQueue, _ctx: &PairingContext, message: CoreMsg) {
        match message.msg {
            CoreMsgInner::VideoPacket(pkt) => self.on_packet(queue, pkt),
            CoreMsgInner::LinkActivity(a) => self.rx_link_activity(a),
            CoreMsgInner::ActiveProfileChanged(p) => {
                let ts = self.ts;
                self.streams.entry(p.stream).or_insert_with(|| StreamBlocks::new(ts)).profile = Some(p);
            }
            CoreMsgInner::TopologyUpdate(t) => {
                tracing::debug!("topology: video link {:?}", t.video_link);
            }
            _ => {
                tracing::warn!("RetransmitCoordinator: unexpected message {}", message.kind());
            }
        }
    }

    fn tick_start(&mut self, queue: &mut MessageQueue, _ctx: &PairingContext, ts: LoopTime) {
        self.ts = ts;
        self.update_suspension(ts);

        let abandoned = self.expire_blocks(queue, ts);
        if abandoned > 0 {
            queue.push_back(CoreMsg::new(
                CoreEntity::Retransmit,
                CoreEntity::Warnings,
                ts,
                CoreMsgInner::Warning(UserWarning::once(WarningKind::BlockUnrecoverable, format!("{} video blocks lost", abandoned))),
            ));
        }

        self.retry_missing(queue);
        self.check_silence(queue, ts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fec::encode_block;
    use fpvlink_config::ControllerConfig;

    fn packets(seq: BlockSeq) -> Vec<FecPacket> {
        let payloads: Vec<Vec<u8>> = (0..4u8).map(|i| vec![i; 50]).collect();
        encode_block(&CauchyReedSolomon::new(), 0, seq, &payloads, 2).unwrap()
    }

    fn coordinator(max_open: usize) -> RetransmitCoordinator {
        let mut cfg = ControllerConfig::default();
        cfg.retransmission.max_open_blocks = max_open;
        RetransmitCoordinator::new(SharedConfig::from_config(cfg))
    }

    #[test]
    fn test_finished_block_not_reopened() {
        let mut rc = coordinator(16);
        let mut queue = MessageQueue::new();
        // All data packets arrive, the trailing EC shares are no longer needed
        for p in packets(5) {
            rc.on_packet(&mut queue, p);
        }
        assert_eq!(rc.highest_finished(0), Some(5));
        assert_eq!(rc.stats().recovered, 1);
        assert_eq!(rc.stats().fec_recovered, 0);
        assert_eq!(rc.stats().dropped_stale, 2);

        // An unseen older block is not opened
        let late = packets(3);
        rc.on_packet(&mut queue, late[0].clone());
        assert_eq!(rc.open_blocks(0), 0);
        assert_eq!(rc.stats().dropped_stale, 3);
        assert_eq!(rc.stats().recovered, 1);
    }

    #[test]
    fn test_lossless_blocks_measure_no_loss() {
        let mut rc = coordinator(16);
        let mut queue = MessageQueue::new();
        for seq in 0..50 {
            for p in packets(seq) {
                rc.on_packet(&mut queue, p);
            }
        }
        assert_eq!(rc.stats().recovered, 50);
        assert_eq!(rc.loss_percent(0), 0);
    }

    #[test]
    fn test_oversized_block_dropped() {
        let mut rc = coordinator(16);
        let mut queue = MessageQueue::new();
        let oversized = |data_count: u16, ec_count: u16| FecPacket {
            stream: 0,
            seq: 0,
            index: 0,
            data_count,
            ec_count,
            payload: vec![0; 8],
        };
        rc.on_packet(&mut queue, oversized(u16::MAX, 1));
        // Default platform limit is 64 shares
        rc.on_packet(&mut queue, oversized(60, 5));
        assert_eq!(rc.stats().dropped_malformed, 2);
        assert_eq!(rc.open_blocks(0), 0);
        assert!(queue.is_empty());

        rc.on_packet(&mut queue, oversized(60, 4));
        assert_eq!(rc.open_blocks(0), 1);
    }

    #[test]
    fn test_open_block_limit() {
        let mut rc = coordinator(2);
        let mut queue = MessageQueue::new();
        for seq in 10..14 {
            rc.on_packet(&mut queue, packets(seq)[0].clone());
        }
        assert_eq!(rc.open_blocks(0), 2);
        assert_eq!(rc.stats().abandoned, 2);
        assert_eq!(rc.highest_finished(0), Some(11));

        let gaps = std::iter::from_fn(|| queue.pop_front())
            .filter(|m| matches!(&m.msg, CoreMsgInner::VideoBlock(b) if b.status == BlockStatus::Gap))
            .count();
        assert_eq!(gaps, 2);
    }
}
