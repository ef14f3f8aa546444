use std::collections::VecDeque;

use fpvlink_config::{ClockSyncMode, SharedConfig};
use fpvlink_core::{CoreEntity, LoopTime};
use fpvlink_msgs::clocksync::{ClockSyncPing, ClockSyncPong, Confidence, RttMeasured};
use fpvlink_msgs::{CoreMsg, CoreMsgInner};

use super::estimator::{ClockEstimate, ClockEstimator, ClockSample};
use crate::{CoreEntityTrait, MessageQueue, PairingContext};

/// Pings older than this many intervals are no longer expected back
const MAX_OUTSTANDING: usize = 8;

/// Keeps an estimate of the vehicle clock offset and the one-way latency of
/// the link. Pings go out at a fixed cadence in every mode; the mode only
/// decides how the answers are interpreted.
pub struct ClockSync {
    config: SharedConfig,
    estimator: ClockEstimator,
    interval_ms: u64,
    next_seq: u32,
    /// Pings sent and not yet answered, oldest first
    outstanding: VecDeque<(u32, LoopTime)>,
    last_ping: Option<LoopTime>,
    estimate: ClockEstimate,
    ts: LoopTime,
}

impl ClockSync {
    pub fn new(config: SharedConfig) -> Self {
        let cfg = config.config();
        let cs = &cfg.clock_sync;
        let interval_ms = 1000 / cs.ping_frequency.max(1) as u64;
        Self {
            estimator: ClockEstimator::new(cs.mode, cs.regression_samples),
            config,
            interval_ms,
            next_seq: 1,
            outstanding: VecDeque::new(),
            last_ping: None,
            estimate: ClockEstimate::NONE,
            ts: LoopTime::ZERO,
        }
    }

    pub fn mode(&self) -> ClockSyncMode {
        self.estimator.mode()
    }

    pub fn estimate(&self) -> ClockEstimate {
        self.estimate
    }

    /// None until at least one ping was answered
    pub fn estimated_one_way_latency(&self) -> Option<u32> {
        (!self.estimator.is_empty()).then_some(self.estimate.one_way_ms)
    }

    pub fn clock_offset(&self) -> (i64, Confidence) {
        (self.estimate.offset_ms, self.estimate.confidence)
    }

    /// Converts a vehicle timestamp to local loop time
    pub fn to_local(&self, vehicle_ms: u64) -> LoopTime {
        LoopTime::from_ms(vehicle_ms).add_ms(-self.estimate.offset_ms)
    }

    pub fn outstanding_pings(&self) -> usize {
        self.outstanding.len()
    }

    fn send_ping(&mut self, queue: &mut MessageQueue, ts: LoopTime) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.outstanding.push_back((seq, ts));
        while self.outstanding.len() > MAX_OUTSTANDING {
            if let Some((lost, _)) = self.outstanding.pop_front() {
                tracing::trace!("ClockSync: ping {} unanswered", lost);
            }
        }
        self.last_ping = Some(ts);
        queue.push_back(CoreMsg::new(
            CoreEntity::ClockSync,
            CoreEntity::RadioStack,
            ts,
            CoreMsgInner::ClockSyncPing(ClockSyncPing { seq, sent: ts }),
        ));
    }

    fn rx_pong(&mut self, queue: &mut MessageQueue, pong: ClockSyncPong) {
        let Some(pos) = self.outstanding.iter().position(|&(seq, sent)| seq == pong.seq && sent == pong.sent) else {
            tracing::debug!("ClockSync: ignoring pong for unknown ping {}", pong.seq);
            return;
        };
        // Anything older than an answered ping is not coming back
        self.outstanding.drain(..=pos);

        self.estimator.add(ClockSample {
            sent: pong.sent,
            received: pong.received,
            vehicle_ms: pong.vehicle_ms,
        });
        self.estimate = self.estimator.estimate(pong.received);
        tracing::debug!(
            "ClockSync: rtt {} ms offset {} ms drift {:.1} ppm ({:?})",
            self.estimate.rtt_ms,
            self.estimate.offset_ms,
            self.estimate.drift_ppm,
            self.estimate.confidence
        );

        self.config.state_write().clock_offset_ms = match self.estimate.confidence {
            Confidence::None => None,
            _ => Some(self.estimate.offset_ms),
        };
        queue.push_back(CoreMsg::new(
            CoreEntity::ClockSync,
            CoreEntity::Adaptive,
            self.ts,
            CoreMsgInner::RttMeasured(RttMeasured {
                rtt_ms: self.estimate.rtt_ms,
                confidence: self.estimate.confidence,
            }),
        ));
    }
}

impl CoreEntityTrait for ClockSync {
    fn entity(&self) -> CoreEntity {
        CoreEntity::ClockSync
    }

    fn set_config(&mut self, config: SharedConfig) {
        self.config = config;
    }

    fn rx_prim(&mut self, queue: &mut MessageQueue, _ctx: &PairingContext, message: CoreMsg) {
        match message.msg {
            CoreMsgInner::ClockSyncPong(pong) => self.rx_pong(queue, pong),
            _ => {
                tracing::warn!("ClockSync: unexpected message {}", message.kind());
            }
        }
    }

    fn tick_start(&mut self, queue: &mut MessageQueue, _ctx: &PairingContext, ts: LoopTime) {
        self.ts = ts;
        let due = match self.last_ping {
            None => true,
            Some(last) => last.elapsed_at_least(ts, self.interval_ms),
        };
        if due {
            self.send_ping(queue, ts);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fpvlink_config::ControllerConfig;

    fn clocksync(mode: ClockSyncMode, ping_frequency: u8) -> (ClockSync, SharedConfig) {
        let mut cfg = ControllerConfig::default();
        cfg.clock_sync.mode = mode;
        cfg.clock_sync.ping_frequency = ping_frequency;
        let config = SharedConfig::from_config(cfg);
        (ClockSync::new(config.clone()), config)
    }

    fn pings(queue: &mut MessageQueue) -> Vec<ClockSyncPing> {
        std::iter::from_fn(|| queue.pop_front())
            .filter_map(|m| match m.msg {
                CoreMsgInner::ClockSyncPing(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_ping_cadence() {
        let (mut cs, _) = clocksync(ClockSyncMode::Basic, 4);
        let ctx = PairingContext::default();
        let mut queue = MessageQueue::new();
        for ms in (0..1000).step_by(10) {
            cs.tick_start(&mut queue, &ctx, LoopTime::from_ms(ms));
        }
        assert_eq!(pings(&mut queue).len(), 4);
    }

    #[test]
    fn test_pong_updates_offset_and_reports_rtt() {
        let (mut cs, config) = clocksync(ClockSyncMode::Basic, 1);
        let ctx = PairingContext::default();
        let mut queue = MessageQueue::new();
        cs.tick_start(&mut queue, &ctx, LoopTime::from_ms(1000));
        let ping = pings(&mut queue)[0];

        // Unknown sequence numbers are ignored
        let stray = ClockSyncPong { seq: ping.seq + 7, sent: ping.sent, vehicle_ms: 0, received: LoopTime::from_ms(1010) };
        cs.rx_prim(&mut queue, &ctx, CoreMsg::new(CoreEntity::RadioStack, CoreEntity::ClockSync, LoopTime::from_ms(1010), CoreMsgInner::ClockSyncPong(stray)));
        assert!(queue.is_empty());
        assert_eq!(cs.estimated_one_way_latency(), None);

        let pong = ClockSyncPong { seq: ping.seq, sent: ping.sent, vehicle_ms: 90_030, received: LoopTime::from_ms(1060) };
        cs.rx_prim(&mut queue, &ctx, CoreMsg::new(CoreEntity::RadioStack, CoreEntity::ClockSync, LoopTime::from_ms(1060), CoreMsgInner::ClockSyncPong(pong)));
        assert_eq!(cs.estimated_one_way_latency(), Some(30));
        assert_eq!(cs.clock_offset(), (89_000, Confidence::Low));
        assert_eq!(config.state_read().clock_offset_ms, Some(89_000));
        assert_eq!(cs.to_local(90_030), LoopTime::from_ms(1030));
        assert_eq!(cs.outstanding_pings(), 0);

        let msg = queue.pop_front().unwrap();
        assert_eq!(msg.dest, CoreEntity::Adaptive);
        assert!(matches!(msg.msg, CoreMsgInner::RttMeasured(RttMeasured { rtt_ms: 60, confidence: Confidence::Low })));
    }
}
