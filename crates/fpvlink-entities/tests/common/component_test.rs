use std::sync::{Arc, Mutex};

use fpvlink_config::{CfgLink, ControllerConfig, ControllerState, SharedConfig};
use fpvlink_core::{
    CoreEntity, DataRate, FreqBand, Frequency, InterfaceKind, LinkDirection, LinkUsage, PhysicalRadioInterface, RadioModulation,
    RemoteRadioInterface,
};
use fpvlink_entities::clocksync::ClockSync;
use fpvlink_entities::links::{LinkManager, StaticScanner};
use fpvlink_entities::retransmit::RetransmitCoordinator;
use fpvlink_entities::router_notify::{NotificationSink, RouterNotifier};
use fpvlink_entities::vehicle::vehicle_link::{CommandChannel, VehicleLink};
use fpvlink_entities::video::Adaptive;
use fpvlink_entities::warnings::WarningBoard;
use fpvlink_entities::{CoreEntityTrait, MessageRouter, PairingContext, VehicleInfo};
use fpvlink_msgs::command::{CommandId, VehicleAck};
use fpvlink_msgs::notify::RouterNotification;
use fpvlink_msgs::{CoreMsg, CoreMsgInner};

use super::sink::Sink;

/// Creates a default config for testing. It can still be modified as needed
/// before passing it to the ComponentTest constructor.
/// Link 0 is a 5.8 GHz video + data link on WiFi interfaces 0 and 1,
/// link 1 a 915 MHz data link on SiK modem 2.
pub fn default_test_config() -> ControllerConfig {
    let mut cfg = ControllerConfig::default();
    cfg.controller.scan_interfaces = false;
    cfg.links = vec![
        CfgLink {
            id: 0,
            frequency: Frequency(5800),
            usage: LinkUsage::VideoAndData,
            direction: LinkDirection::Bidirectional,
            relay: false,
            use_lowest_datarate_for_data: false,
            modulation: RadioModulation {
                data_rate: DataRate::Mcs(0),
                ..Default::default()
            },
            interfaces: vec![0, 1],
        },
        CfgLink {
            id: 1,
            frequency: Frequency(915),
            usage: LinkUsage::DataOnly,
            direction: LinkDirection::Bidirectional,
            relay: false,
            use_lowest_datarate_for_data: false,
            modulation: RadioModulation {
                data_rate: DataRate::Legacy(6),
                ..Default::default()
            },
            interfaces: vec![2],
        },
    ];
    cfg.video.high.retransmission_window_ms = 100;
    cfg
}

pub fn test_interfaces() -> Vec<PhysicalRadioInterface> {
    vec![
        PhysicalRadioInterface::new(0, "00:c0:ca:00:00:01", InterfaceKind::Wifi, vec![FreqBand::Band2G4, FreqBand::Band5G8]),
        PhysicalRadioInterface::new(1, "00:c0:ca:00:00:02", InterfaceKind::Wifi, vec![FreqBand::Band5G8]),
        PhysicalRadioInterface::new(2, "/dev/ttyUSB0", InterfaceKind::Sik, vec![FreqBand::Sub1G]),
    ]
}

/// Vehicle with one dual band WiFi card on link 0 and a SiK modem on link 1
pub fn test_vehicle() -> VehicleInfo {
    VehicleInfo {
        name: "test-wing".to_string(),
        interfaces: vec![
            RemoteRadioInterface {
                index: 0,
                kind: InterfaceKind::Wifi,
                bands: vec![FreqBand::Band2G4, FreqBand::Band5G8],
                enabled: true,
                can_tx: true,
                can_rx: true,
                link: Some(0),
            },
            RemoteRadioInterface {
                index: 1,
                kind: InterfaceKind::Sik,
                bands: vec![FreqBand::Sub1G],
                enabled: true,
                can_tx: true,
                can_rx: true,
                link: Some(1),
            },
        ],
    }
}

/// A command as it went out on the vehicle command channel
#[derive(Debug, Clone)]
pub struct SentCommand {
    pub id: CommandId,
    pub param: i32,
    pub payload: Vec<u8>,
    pub wire_token: u32,
}

pub type SentCommands = Arc<Mutex<Vec<SentCommand>>>;

/// Command channel that accepts and records everything
pub struct RecordingChannel {
    sent: SentCommands,
}

impl CommandChannel for RecordingChannel {
    fn send_command(&mut self, id: CommandId, param: i32, payload: &[u8], wire_token: u32) -> bool {
        self.sent.lock().unwrap().push(SentCommand {
            id,
            param,
            payload: payload.to_vec(),
            wire_token,
        });
        true
    }
}

pub struct RecordingSink(pub Arc<Mutex<Vec<RouterNotification>>>);

impl NotificationSink for RecordingSink {
    fn notify(&mut self, notification: RouterNotification) {
        self.0.lock().unwrap().push(notification);
    }
}

/// Infrastructure for testing core entities
/// Quick setup of all components for end-to-end testing
/// Supports optional sinks for collecting messages for later inspection
pub struct ComponentTest {
    pub config: SharedConfig,
    pub router: MessageRouter,
    pub sinks: Vec<CoreEntity>,
    pub sent: SentCommands,
    pub notifications: Arc<Mutex<Vec<RouterNotification>>>,
}

impl ComponentTest {
    pub fn new(config: ControllerConfig) -> Self {
        let shared_config = SharedConfig::from_parts(config, ControllerState::default());
        let router = MessageRouter::new(shared_config.clone());
        Self {
            config: shared_config,
            router,
            sinks: vec![],
            sent: Arc::new(Mutex::new(vec![])),
            notifications: Arc::new(Mutex::new(vec![])),
        }
    }

    pub fn get_shared_config(&self) -> SharedConfig {
        self.config.clone()
    }

    pub fn pair(&mut self, vehicle: VehicleInfo) {
        let cfg = self.config.config();
        self.router
            .set_pairing(PairingContext::paired(vehicle, cfg.controller.limits, cfg.video.user));
    }

    pub fn unpair(&mut self) {
        let cfg = self.config.config();
        self.router
            .set_pairing(PairingContext::unpaired(cfg.controller.limits, cfg.video.user));
    }

    pub fn populate_entities(&mut self, components: Vec<CoreEntity>, sinks: Vec<CoreEntity>) {
        self.create_components(components);
        // Create sinks for message collection
        self.create_sinks(sinks);
    }

    fn create_components(&mut self, components: Vec<CoreEntity>) {
        for component in components.iter() {
            match component {
                CoreEntity::LinkManager => {
                    let lm = LinkManager::new(self.config.clone(), Box::new(StaticScanner(test_interfaces())));
                    self.register_entity(lm);
                }
                CoreEntity::Adaptive => {
                    let adaptive = Adaptive::new(self.config.clone());
                    self.register_entity(adaptive);
                }
                CoreEntity::Retransmit => {
                    let rc = RetransmitCoordinator::new(self.config.clone());
                    self.register_entity(rc);
                }
                CoreEntity::ClockSync => {
                    let cs = ClockSync::new(self.config.clone());
                    self.register_entity(cs);
                }
                CoreEntity::Vehicle => {
                    let channel = RecordingChannel { sent: self.sent.clone() };
                    let vehicle = VehicleLink::new(self.config.clone(), Box::new(channel));
                    self.register_entity(vehicle);
                }
                CoreEntity::Router => {
                    let notifier = RouterNotifier::new(Box::new(RecordingSink(self.notifications.clone())));
                    self.register_entity(notifier);
                }
                CoreEntity::Warnings => {
                    let board = WarningBoard::new(self.config.clone());
                    self.register_entity(board);
                }
                _ => {
                    panic!("Component not implemented: {:?}", component);
                }
            }
        }
    }

    fn create_sinks(&mut self, sinks: Vec<CoreEntity>) {
        for sink in sinks.iter() {
            assert!(!self.sinks.contains(sink), "Sink already exists: {:?}", sink);
            assert!(self.router.get_entity(*sink).is_none(), "Sink already registered as entity: {:?}", sink);

            self.sinks.push(*sink);
            self.router.register_entity(Box::new(Sink::new(*sink)));
        }
    }

    pub fn register_entity<T: 'static + CoreEntityTrait>(&mut self, entity: T) {
        self.router.register_entity(Box::new(entity));
    }

    pub fn run_stack(&mut self, num_ticks: Option<usize>) {
        self.router.run_stack(num_ticks, None);
    }

    pub fn submit_message(&mut self, message: CoreMsg) {
        self.router.submit_message(message);
    }

    pub fn deliver_all_messages(&mut self) {
        self.router.deliver_all_messages();
    }

    pub fn dump_sinks(&mut self) -> Vec<CoreMsg> {
        let mut msgs = vec![];
        for sink in self.sinks.iter() {
            if let Some(component) = self.router.get_entity(*sink) {
                if let Some(sink) = component.as_any_mut().downcast_mut::<Sink>() {
                    let mut sink_msgs = sink.take_msgqueue();
                    msgs.append(&mut sink_msgs);
                }
            }
        }
        msgs
    }

    pub fn take_sent_commands(&mut self) -> Vec<SentCommand> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    /// Answers every command sent so far, as the vehicle would over the air
    pub fn ack_sent_commands(&mut self, success: bool) -> Vec<SentCommand> {
        let sent = self.take_sent_commands();
        let ts = self.router.time();
        for cmd in &sent {
            self.submit_message(CoreMsg::new(
                CoreEntity::RadioStack,
                CoreEntity::Vehicle,
                ts,
                CoreMsgInner::VehicleAck(VehicleAck {
                    id: cmd.id,
                    token: cmd.wire_token,
                    success,
                }),
            ));
        }
        self.deliver_all_messages();
        sent
    }
}
