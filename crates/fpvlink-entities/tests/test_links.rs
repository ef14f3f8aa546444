mod common;

use fpvlink_core::{CoreEntity, ErrorKind, Frequency, LinkDirection, LinkUsage, TxRxMode, debug};
use fpvlink_entities::links::{ChangeStatus, LinkManager};
use fpvlink_msgs::command::CommandId;
use fpvlink_msgs::notify::RouterNotification;
use fpvlink_entities::{MessageQueue, PairingContext};
use fpvlink_msgs::CoreMsgInner;

use common::{ComponentTest, default_test_config, test_vehicle};

fn link_test() -> ComponentTest {
    let mut test = ComponentTest::new(default_test_config());
    let components = vec![CoreEntity::LinkManager, CoreEntity::Vehicle, CoreEntity::Router, CoreEntity::Warnings];
    let sinks = vec![
        CoreEntity::RadioStack,
        CoreEntity::SikRadio,
        CoreEntity::Adaptive,
        CoreEntity::Retransmit,
    ];
    test.populate_entities(components, sinks);
    test
}

#[derive(Debug, Clone, Copy)]
enum Mutation {
    Frequency(u8, u32),
    Disable(u16),
    TxRx(u16, TxRxMode),
    Capabilities(u8, LinkUsage, LinkDirection),
    Unassign(u16),
}

impl Mutation {
    fn apply(&self, lm: &mut LinkManager, q: &mut MessageQueue, ctx: &PairingContext) -> Result<(), ErrorKind> {
        match *self {
            Mutation::Frequency(link, mhz) => lm.set_link_frequency(q, ctx, link, Frequency(mhz)).map(|_| ()),
            Mutation::Disable(index) => lm.set_interface_disabled(q, index, true),
            Mutation::TxRx(index, mode) => lm.set_interface_tx_rx_only(q, index, mode),
            Mutation::Capabilities(link, usage, dir) => lm.set_link_capabilities(q, ctx, link, usage, dir).map(|_| ()),
            Mutation::Unassign(index) => lm.assign_interface(q, index, None),
        }
    }
}

fn frequency_of(test: &mut ComponentTest, link: u8) -> Frequency {
    test.router
        .with_entity::<LinkManager, _>(CoreEntity::LinkManager, |lm, _, _| lm.link(link).map(|l| l.frequency))
        .flatten()
        .unwrap()
}

fn assert_topology_valid(test: &mut ComponentTest) {
    let violations = test
        .router
        .with_entity::<LinkManager, _>(CoreEntity::LinkManager, |lm, _, ctx| lm.validate_topology(ctx))
        .unwrap();
    assert!(violations.is_empty(), "violations: {:?}", violations);
}

#[test]
fn test_topology_valid_after_accepted_mutations() {
    debug::setup_logging_verbose();
    let mut test = link_test();
    test.pair(test_vehicle());
    test.run_stack(Some(1));
    assert_topology_valid(&mut test);

    let mutations = [
        Mutation::Frequency(0, 2412),
        // Interface 1 cannot do 2.4 GHz, interface 0 is the last receiver of link 0
        Mutation::Disable(0),
        Mutation::TxRx(0, TxRxMode::TxOnly),
        Mutation::Frequency(0, 5745),
        Mutation::TxRx(1, TxRxMode::TxOnly),
        Mutation::TxRx(0, TxRxMode::RxOnly),
        Mutation::Capabilities(0, LinkUsage::VideoOnly, LinkDirection::DownlinkOnly),
        Mutation::Capabilities(1, LinkUsage::VideoOnly, LinkDirection::UplinkOnly),
        Mutation::Unassign(2),
        Mutation::Frequency(1, 868),
        Mutation::Frequency(1, 5800),
        Mutation::Capabilities(0, LinkUsage::VideoAndData, LinkDirection::Bidirectional),
        // Only interface 0 does 2.4 GHz and it is RX-only: no uplink there
        Mutation::Frequency(0, 2412),
        Mutation::TxRx(0, TxRxMode::Both),
        Mutation::Frequency(0, 2412),
        Mutation::TxRx(0, TxRxMode::RxOnly),
    ];

    let mut accepted = 0;
    let mut rejected = 0;
    for mutation in mutations.iter() {
        let result = test
            .router
            .with_entity::<LinkManager, _>(CoreEntity::LinkManager, |lm, q, ctx| mutation.apply(lm, q, ctx))
            .unwrap();
        match result {
            Ok(()) => accepted += 1,
            Err(e) => {
                tracing::info!("rejected: {}", e);
                rejected += 1;
            }
        }
        test.deliver_all_messages();
        test.ack_sent_commands(true);
        test.run_stack(Some(1));
        assert_topology_valid(&mut test);
    }
    assert_eq!(accepted, 9);
    assert_eq!(rejected, 7);
    assert_eq!(test.config.state_read().topology_violations, 0);
}

fn run_mutation(test: &mut ComponentTest, mutation: Mutation) -> Result<(), ErrorKind> {
    test.router
        .with_entity::<LinkManager, _>(CoreEntity::LinkManager, |lm, q, ctx| mutation.apply(lm, q, ctx))
        .unwrap()
}

#[test]
fn test_frequency_rejected_when_band_cannot_serve_direction() {
    debug::setup_logging_verbose();
    let mut test = link_test();
    test.run_stack(Some(1));

    // Interface 1 keeps the 5.8 GHz uplink, interface 0 is the only 2.4 GHz card
    assert_eq!(run_mutation(&mut test, Mutation::TxRx(0, TxRxMode::RxOnly)), Ok(()));
    assert_eq!(run_mutation(&mut test, Mutation::Frequency(0, 2412)), Err(ErrorKind::UnsupportedBand));
    test.run_stack(Some(1));
    assert_eq!(frequency_of(&mut test, 0), Frequency(5800));
    assert_topology_valid(&mut test);

    // Downlink only needs a receiver, which interface 0 still is
    assert_eq!(run_mutation(&mut test, Mutation::Capabilities(0, LinkUsage::VideoOnly, LinkDirection::DownlinkOnly)), Ok(()));
    assert_eq!(run_mutation(&mut test, Mutation::Frequency(0, 2412)), Ok(()));
    test.run_stack(Some(1));
    assert_eq!(frequency_of(&mut test, 0), Frequency(2412));
    assert_topology_valid(&mut test);

    // Going back to bidirectional on 2.4 GHz would need a transmitter
    assert!(matches!(
        run_mutation(&mut test, Mutation::Capabilities(0, LinkUsage::VideoAndData, LinkDirection::Bidirectional)),
        Err(ErrorKind::InvalidCapabilityCombination(_))
    ));
}

#[test]
fn test_overrides_checked_against_pending_frequency() {
    debug::setup_logging_verbose();
    let mut test = link_test();
    test.pair(test_vehicle());
    test.run_stack(Some(1));

    assert_eq!(run_mutation(&mut test, Mutation::Frequency(0, 2412)), Ok(()));
    test.deliver_all_messages();

    // Fine at 5.8 GHz, but interface 0 is the only uplink once 2.4 GHz is acknowledged
    assert_eq!(run_mutation(&mut test, Mutation::TxRx(0, TxRxMode::RxOnly)), Err(ErrorKind::WouldOrphanLink(0)));
    assert_eq!(run_mutation(&mut test, Mutation::Disable(0)), Err(ErrorKind::WouldOrphanLink(0)));
    // Interface 1 does not matter at 2.4 GHz and interface 0 still receives at 5.8 GHz
    assert_eq!(run_mutation(&mut test, Mutation::TxRx(1, TxRxMode::TxOnly)), Ok(()));
    test.deliver_all_messages();
    assert_eq!(frequency_of(&mut test, 0), Frequency(5800));
    assert_topology_valid(&mut test);

    test.ack_sent_commands(true);
    test.run_stack(Some(1));
    assert_eq!(frequency_of(&mut test, 0), Frequency(2412));
    assert_topology_valid(&mut test);
}

#[test]
fn test_frequency_round_trip() {
    debug::setup_logging_verbose();
    let mut test = link_test();
    test.run_stack(Some(1));

    for f in [2412, 5745, 915, 3500, 5180, 433] {
        let before = frequency_of(&mut test, 0);
        let result = test
            .router
            .with_entity::<LinkManager, _>(CoreEntity::LinkManager, |lm, q, ctx| lm.set_link_frequency(q, ctx, 0, Frequency(f)))
            .unwrap();
        test.run_stack(Some(1));
        let after = frequency_of(&mut test, 0);
        match result {
            Ok(outcome) => {
                assert_eq!(outcome.status, ChangeStatus::Applied);
                assert_eq!(after, Frequency(f));
            }
            Err(e) => {
                assert_eq!(e, ErrorKind::UnsupportedBand);
                assert_eq!(after, before);
            }
        }
    }
    assert_eq!(frequency_of(&mut test, 0), Frequency(5180));
}

#[test]
fn test_paired_frequency_applies_on_ack_only() {
    debug::setup_logging_verbose();
    let mut test = link_test();
    test.pair(test_vehicle());
    test.run_stack(Some(1));
    test.dump_sinks();

    let result = test
        .router
        .with_entity::<LinkManager, _>(CoreEntity::LinkManager, |lm, q, ctx| lm.set_link_frequency(q, ctx, 1, Frequency(868)))
        .unwrap()
        .unwrap();
    assert_eq!(result.status, ChangeStatus::PendingConfirmation);
    test.deliver_all_messages();
    assert_eq!(frequency_of(&mut test, 1), Frequency(915));

    // Vehicle refuses: nothing changes
    let sent = test.ack_sent_commands(false);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].id, CommandId::SetRadioLinkFrequency);
    assert_eq!(sent[0].param, 868);
    assert_eq!(frequency_of(&mut test, 1), Frequency(915));

    // Second attempt is acknowledged
    test.router
        .with_entity::<LinkManager, _>(CoreEntity::LinkManager, |lm, q, ctx| lm.set_link_frequency(q, ctx, 1, Frequency(868)))
        .unwrap()
        .unwrap();
    test.deliver_all_messages();
    test.ack_sent_commands(true);
    assert_eq!(frequency_of(&mut test, 1), Frequency(868));
    test.run_stack(Some(1));

    // The SiK modem of link 1 is reconfigured
    let msgs = test.dump_sinks();
    let reinit = msgs
        .iter()
        .find_map(|m| match &m.msg {
            CoreMsgInner::SikReinitRequest(r) => Some(r.clone()),
            _ => None,
        })
        .expect("no SiK reinit request");
    assert_eq!(reinit.frequency, Frequency(868));
    assert_eq!(reinit.ports.len(), 1);
    assert_eq!(reinit.ports[0].port, "/dev/ttyUSB0");

    // Consumers got the new topology
    assert!(msgs.iter().any(|m| m.dest == CoreEntity::Adaptive && matches!(m.msg, CoreMsgInner::TopologyUpdate(_))));
    assert!(msgs.iter().any(|m| m.dest == CoreEntity::Retransmit && matches!(m.msg, CoreMsgInner::TopologyUpdate(_))));

    // The router process was told once per tick, not once per change
    let notifications = test.notifications.lock().unwrap().clone();
    assert!(notifications.iter().all(|n| *n == RouterNotification::ControllerSettingsChanged));
    assert!(!notifications.is_empty());
}

#[test]
fn test_same_class_command_in_progress() {
    let mut test = link_test();
    test.pair(test_vehicle());
    test.run_stack(Some(1));

    let first = test
        .router
        .with_entity::<LinkManager, _>(CoreEntity::LinkManager, |lm, q, ctx| lm.set_link_frequency(q, ctx, 0, Frequency(5745)))
        .unwrap();
    assert!(first.is_ok());
    let second = test
        .router
        .with_entity::<LinkManager, _>(CoreEntity::LinkManager, |lm, q, ctx| lm.set_link_frequency(q, ctx, 0, Frequency(5765)))
        .unwrap();
    assert_eq!(second, Err(ErrorKind::CommandInProgress));

    // Other links and other classes are not blocked
    let other_link = test
        .router
        .with_entity::<LinkManager, _>(CoreEntity::LinkManager, |lm, q, ctx| lm.set_link_frequency(q, ctx, 1, Frequency(868)))
        .unwrap();
    assert!(other_link.is_ok());
    let other_class = test
        .router
        .with_entity::<LinkManager, _>(CoreEntity::LinkManager, |lm, q, ctx| {
            lm.set_link_capabilities(q, ctx, 0, LinkUsage::VideoOnly, LinkDirection::Bidirectional)
        })
        .unwrap();
    assert_eq!(other_class, Ok(ChangeStatus::PendingConfirmation));
}

#[test]
fn test_router_notifications_coalesced() {
    let mut test = link_test();
    test.run_stack(Some(1));
    test.notifications.lock().unwrap().clear();

    test.router
        .with_entity::<LinkManager, _>(CoreEntity::LinkManager, |lm, q, ctx| {
            lm.set_link_frequency(q, ctx, 0, Frequency(5745)).unwrap();
            lm.set_link_frequency(q, ctx, 1, Frequency(868)).unwrap();
            lm.set_interface_tx_rx_only(q, 1, TxRxMode::RxOnly).unwrap();
        })
        .unwrap();
    test.run_stack(Some(1));
    assert_eq!(*test.notifications.lock().unwrap(), vec![RouterNotification::ControllerSettingsChanged]);

    // Quiet tick, nothing forwarded
    test.run_stack(Some(1));
    assert_eq!(test.notifications.lock().unwrap().len(), 1);
}
