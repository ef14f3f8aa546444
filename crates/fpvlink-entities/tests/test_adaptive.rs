mod common;

use fpvlink_config::ControllerConfig;
use fpvlink_core::{CoreEntity, LoopTime, VideoTier, debug};
use fpvlink_entities::links::ChangeStatus;
use fpvlink_entities::video::{Adaptive, AdaptiveState, Pin};
use fpvlink_msgs::clocksync::ClockSyncPong;
use fpvlink_msgs::command::CommandId;
use fpvlink_msgs::links::LinkQualitySample;
use fpvlink_msgs::{CoreMsg, CoreMsgInner};

use common::{ComponentTest, default_test_config, test_vehicle};

const NOMINAL_KBPS: u32 = 8000;

fn adaptive_test(cfg: ControllerConfig) -> ComponentTest {
    let mut test = ComponentTest::new(cfg);
    test.populate_entities(vec![CoreEntity::Adaptive], vec![CoreEntity::Retransmit, CoreEntity::Vehicle, CoreEntity::Warnings]);
    test
}

fn config_with_strength(strength: u8) -> ControllerConfig {
    let mut cfg = default_test_config();
    cfg.adaptive.strength = strength;
    cfg
}

/// Submits one link quality sample and runs a tick
fn sample_tick(test: &mut ComponentTest, overloaded: bool) {
    let ts = test.router.time();
    let sample = LinkQualitySample {
        link: 0,
        stream: 0,
        ts,
        rssi_dbm: -60,
        loss_percent: 0,
        block_tx_time_us: if overloaded { 20_000 } else { 5_000 },
        block_budget_us: 16_000,
        ack_rtt_ms: None,
    };
    test.submit_message(CoreMsg::new(CoreEntity::RadioStack, CoreEntity::Adaptive, ts, CoreMsgInner::LinkQuality(sample)));
    test.run_stack(Some(1));
}

fn adaptive<R>(test: &mut ComponentTest, f: impl FnOnce(&Adaptive) -> R) -> R {
    test.router.with_entity::<Adaptive, _>(CoreEntity::Adaptive, |a, _, _| f(a)).unwrap()
}

/// Overloaded samples until the first bitrate reduction
fn samples_until_degraded(strength: u8) -> usize {
    let mut test = adaptive_test(config_with_strength(strength));
    for n in 1..=30 {
        sample_tick(&mut test, true);
        if adaptive(&mut test, |a| a.bitrate_kbps(0)) < Some(NOMINAL_KBPS) {
            return n;
        }
    }
    panic!("strength {} never degraded", strength);
}

#[test]
fn test_higher_strength_reacts_no_slower() {
    debug::setup_logging_verbose();
    let reactions: Vec<usize> = (1..=10).map(samples_until_degraded).collect();
    tracing::info!("samples until degraded: {:?}", reactions);
    assert!(reactions.windows(2).all(|w| w[1] <= w[0]), "{:?}", reactions);
    assert!(reactions[9] < reactions[0]);
    // Strength 10 confirms on the first sample and reduces on the next tick
    assert_eq!(reactions[9], 2);
}

#[test]
fn test_degrade_then_recover() {
    debug::setup_logging_verbose();
    let mut cfg = config_with_strength(10);
    cfg.adaptive.cooldown_ms = 100;
    cfg.adaptive.recover_good_samples = 3;
    cfg.adaptive.confirm_window_ms = 50;
    let mut test = adaptive_test(cfg);

    sample_tick(&mut test, true);
    assert_eq!(adaptive(&mut test, |a| a.state(0)), Some(AdaptiveState::Degrading));
    sample_tick(&mut test, false);
    assert_eq!(adaptive(&mut test, |a| a.state(0)), Some(AdaptiveState::Degraded));
    assert_eq!(adaptive(&mut test, |a| a.bitrate_kbps(0)), Some(NOMINAL_KBPS - 1000));

    // Good samples: cooldown ends at 110 ms, confirmation 50 ms later
    while test.router.time() < LoopTime::from_ms(120) {
        sample_tick(&mut test, false);
    }
    assert_eq!(adaptive(&mut test, |a| a.state(0)), Some(AdaptiveState::Recovering));
    assert_eq!(adaptive(&mut test, |a| a.bitrate_kbps(0)), Some(NOMINAL_KBPS - 1000));

    while test.router.time() < LoopTime::from_ms(180) {
        sample_tick(&mut test, false);
    }
    assert_eq!(adaptive(&mut test, |a| a.state(0)), Some(AdaptiveState::Nominal));
    assert_eq!(adaptive(&mut test, |a| a.bitrate_kbps(0)), Some(NOMINAL_KBPS));
    assert_eq!(adaptive(&mut test, |a| a.tier(0)), Some(VideoTier::High));
}

#[test]
fn test_overload_during_recovery_falls_back() {
    let mut cfg = config_with_strength(10);
    cfg.adaptive.cooldown_ms = 100;
    cfg.adaptive.recover_good_samples = 3;
    cfg.adaptive.confirm_window_ms = 500;
    let mut test = adaptive_test(cfg);

    sample_tick(&mut test, true);
    while test.router.time() < LoopTime::from_ms(150) {
        sample_tick(&mut test, false);
    }
    assert_eq!(adaptive(&mut test, |a| a.state(0)), Some(AdaptiveState::Recovering));

    sample_tick(&mut test, true);
    assert_eq!(adaptive(&mut test, |a| a.state(0)), Some(AdaptiveState::Degraded));
    assert_eq!(adaptive(&mut test, |a| a.bitrate_kbps(0)), Some(NOMINAL_KBPS - 1000));
}

#[test]
fn test_forced_tier_stays_pinned() {
    debug::setup_logging_verbose();
    let mut test = adaptive_test(config_with_strength(10));
    test.run_stack(Some(1));

    let status = test
        .router
        .with_entity::<Adaptive, _>(CoreEntity::Adaptive, |a, q, ctx| a.force_profile(q, ctx, 0, VideoTier::Low))
        .unwrap();
    assert_eq!(status, Ok(ChangeStatus::Applied));
    let pinned_kbps = adaptive(&mut test, |a| a.bitrate_kbps(0));
    assert!(pinned_kbps < Some(NOMINAL_KBPS));

    for i in 0..40 {
        sample_tick(&mut test, i % 2 == 0 || i > 20);
        assert_eq!(adaptive(&mut test, |a| a.pin(0)), Some(Pin::Tier(VideoTier::Low)));
        assert_eq!(adaptive(&mut test, |a| a.tier(0)), Some(VideoTier::Low));
        assert_eq!(adaptive(&mut test, |a| a.bitrate_kbps(0)), pinned_kbps);
        assert_eq!(adaptive(&mut test, |a| a.state(0)), Some(AdaptiveState::Nominal));
    }
    assert_eq!(test.config.state_read().active_tier, Some(VideoTier::Low));
    assert!(test.config.state_read().adaptive_pinned);

    let status = test
        .router
        .with_entity::<Adaptive, _>(CoreEntity::Adaptive, |a, q, ctx| a.release_to_auto(q, ctx, 0))
        .unwrap();
    assert_eq!(status, Ok(ChangeStatus::Applied));
    test.run_stack(Some(1));
    assert_eq!(adaptive(&mut test, |a| a.pin(0)), None);
    assert_eq!(adaptive(&mut test, |a| a.tier(0)), Some(VideoTier::High));
    assert_eq!(adaptive(&mut test, |a| a.bitrate_kbps(0)), Some(NOMINAL_KBPS));
    assert!(!test.config.state_read().adaptive_pinned);

    // Auto again: the next overload degrades
    sample_tick(&mut test, true);
    sample_tick(&mut test, true);
    assert!(adaptive(&mut test, |a| a.bitrate_kbps(0)) < Some(NOMINAL_KBPS));
}

#[test]
fn test_forced_tier_sent_to_vehicle() {
    let mut test = ComponentTest::new(default_test_config());
    test.populate_entities(
        vec![CoreEntity::Adaptive, CoreEntity::Vehicle],
        vec![CoreEntity::Retransmit, CoreEntity::Warnings, CoreEntity::RadioStack],
    );
    test.pair(test_vehicle());
    test.run_stack(Some(1));
    test.ack_sent_commands(true);

    let status = test
        .router
        .with_entity::<Adaptive, _>(CoreEntity::Adaptive, |a, q, ctx| a.force_profile(q, ctx, 0, VideoTier::Medium))
        .unwrap();
    assert_eq!(status, Ok(ChangeStatus::PendingConfirmation));
    test.deliver_all_messages();

    let sent = test.take_sent_commands();
    assert!(sent.iter().any(|c| c.id == CommandId::ManualSwitchToVideoLinkQualityMedium && c.param == 0));
}

#[test]
fn test_clock_sync_rtt_counts_as_overload() {
    debug::setup_logging_verbose();
    let mut test = ComponentTest::new(config_with_strength(10));
    test.populate_entities(
        vec![CoreEntity::ClockSync, CoreEntity::Adaptive],
        vec![CoreEntity::RadioStack, CoreEntity::Retransmit, CoreEntity::Warnings],
    );
    test.run_stack(Some(1));

    let ping = test
        .dump_sinks()
        .iter()
        .find_map(|m| match &m.msg {
            CoreMsgInner::ClockSyncPing(p) => Some(*p),
            _ => None,
        })
        .expect("no ping sent");
    let pong = ClockSyncPong {
        seq: ping.seq,
        sent: ping.sent,
        vehicle_ms: 50_000,
        received: ping.sent.add_ms(400),
    };
    let ts = test.router.time();
    test.submit_message(CoreMsg::new(CoreEntity::RadioStack, CoreEntity::ClockSync, ts, CoreMsgInner::ClockSyncPong(pong)));
    test.run_stack(Some(1));

    // Block timing is fine, the round trip is not
    sample_tick(&mut test, false);
    assert_eq!(adaptive(&mut test, |a| a.state(0)), Some(AdaptiveState::Degrading));
    sample_tick(&mut test, false);
    assert_eq!(adaptive(&mut test, |a| a.bitrate_kbps(0)), Some(NOMINAL_KBPS - 1000));
}
