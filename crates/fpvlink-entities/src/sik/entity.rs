use std::io;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};

use fpvlink_config::SharedConfig;
use fpvlink_core::{CoreEntity, ErrorKind, LoopTime};
use fpvlink_msgs::links::ReopenInterfaces;
use fpvlink_msgs::notify::{UserWarning, WarningKind};
use fpvlink_msgs::{CoreMsg, CoreMsgInner};

use super::handshake::SikHandshake;
use super::worker::{SikCommand, SikEvent, SikWorker, SikWorkerState};
use crate::{CoreEntityTrait, MessageQueue, PairingContext};

/// Time given to the worker to finish a running handshake on shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// Control loop side of the SiK modem worker. Forwards reconfiguration
/// requests to the worker thread and turns its events into messages.
pub struct SikRadioEntity {
    config: SharedConfig,
    command_sender: Sender<SikCommand>,
    event_receiver: Receiver<SikEvent>,
    worker_state: SikWorkerState,
    worker_handle: Option<thread::JoinHandle<()>>,
    ts: LoopTime,
}

impl SikRadioEntity {
    pub fn new(config: SharedConfig, handshake: Box<dyn SikHandshake>) -> io::Result<Self> {
        let (event_sender, event_receiver) = unbounded::<SikEvent>();
        let (command_sender, command_receiver) = unbounded::<SikCommand>();

        let cfg = config.config().sik.clone();
        let handle = thread::Builder::new().name("sik-worker".to_string()).spawn(move || {
            let mut worker = SikWorker::new(cfg, handshake, command_receiver, event_sender);
            worker.run();
        })?;

        Ok(Self {
            config,
            command_sender,
            event_receiver,
            worker_state: SikWorkerState::Idle,
            worker_handle: Some(handle),
            ts: LoopTime::ZERO,
        })
    }

    /// Last state reported by the worker
    pub fn worker_state(&self) -> SikWorkerState {
        self.worker_state
    }

    fn send(&self, cmd: SikCommand) {
        if self.command_sender.send(cmd).is_err() {
            tracing::error!("SikRadioEntity: worker thread is gone");
        }
    }

    fn process_events(&mut self, queue: &mut MessageQueue) {
        while let Ok(event) = self.event_receiver.try_recv() {
            match event {
                SikEvent::StateChanged(state) => {
                    tracing::debug!("SikRadioEntity: worker {:?}", state);
                    self.worker_state = state;
                }
                SikEvent::Reopen(interfaces) => {
                    tracing::info!("SikRadioEntity: reopening interfaces {:?}", interfaces);
                    queue.push_back(CoreMsg::new(
                        CoreEntity::SikRadio,
                        CoreEntity::RadioStack,
                        self.ts,
                        CoreMsgInner::ReopenInterfaces(ReopenInterfaces { interfaces }),
                    ));
                }
                SikEvent::Failed { retries } => {
                    let err = ErrorKind::SikWorkerFailed { retries };
                    tracing::error!("SikRadioEntity: {}", err);
                    self.config.state_write().sik_failed = true;
                    queue.push_back(CoreMsg::new(
                        CoreEntity::SikRadio,
                        CoreEntity::Warnings,
                        self.ts,
                        CoreMsgInner::Warning(UserWarning::persistent(
                            WarningKind::SikWorkerFailed,
                            format!("{}, check the radio module", err),
                        )),
                    ));
                }
            }
        }
    }
}

impl CoreEntityTrait for SikRadioEntity {
    fn entity(&self) -> CoreEntity {
        CoreEntity::SikRadio
    }

    fn set_config(&mut self, config: SharedConfig) {
        self.config = config;
    }

    fn rx_prim(&mut self, _queue: &mut MessageQueue, _ctx: &PairingContext, message: CoreMsg) {
        match message.msg {
            CoreMsgInner::SikReinitRequest(req) => self.send(SikCommand::Reinit(req)),
            CoreMsgInner::SikHelperTool(helper) => self.send(SikCommand::HelperTool(helper)),
            _ => {
                tracing::warn!("SikRadioEntity: unexpected message {}", message.kind());
            }
        }
    }

    fn tick_start(&mut self, queue: &mut MessageQueue, _ctx: &PairingContext, ts: LoopTime) {
        self.ts = ts;
        self.process_events(queue);
    }
}

impl Drop for SikRadioEntity {
    fn drop(&mut self) {
        let _ = self.command_sender.send(SikCommand::Shutdown);
        if let Some(handle) = self.worker_handle.take() {
            let start = Instant::now();
            loop {
                if handle.is_finished() {
                    let _ = handle.join();
                    tracing::debug!("SikRadioEntity: worker thread joined");
                    break;
                }
                if start.elapsed() >= SHUTDOWN_TIMEOUT {
                    tracing::warn!("SikRadioEntity: worker thread did not finish in time, abandoning");
                    break;
                }
                thread::sleep(Duration::from_millis(20));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sik::{HandshakeError, SikRadioParams};
    use fpvlink_config::ControllerConfig;
    use fpvlink_core::Frequency;
    use fpvlink_msgs::sik::{SikPort, SikReinitRequest};

    struct DeadModem;

    impl SikHandshake for DeadModem {
        fn configure(&mut self, _port: &SikPort, _params: &SikRadioParams) -> Result<(), HandshakeError> {
            Err(HandshakeError::NoCommandMode)
        }
    }

    #[test]
    fn test_failure_raises_persistent_warning() {
        let mut cfg = ControllerConfig::default();
        cfg.sik.check_interval_ms = 5;
        cfg.sik.max_retries = 1;
        let config = SharedConfig::from_config(cfg);
        let mut entity = SikRadioEntity::new(config.clone(), Box::new(DeadModem)).unwrap();
        let ctx = PairingContext::default();
        let mut queue = MessageQueue::new();

        let req = SikReinitRequest {
            ports: vec![SikPort { interface: 2, port: "/dev/ttyUSB1".to_string() }],
            frequency: Frequency(915),
        };
        entity.rx_prim(&mut queue, &ctx, CoreMsg::new(CoreEntity::LinkManager, CoreEntity::SikRadio, LoopTime::ZERO, CoreMsgInner::SikReinitRequest(req)));

        let mut warning = None;
        for i in 0..400 {
            entity.tick_start(&mut queue, &ctx, LoopTime::from_ms(i * 10));
            if let Some(msg) = queue.pop_front() {
                warning = Some(msg);
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        let msg = warning.expect("no warning raised");
        assert!(matches!(&msg.msg, CoreMsgInner::Warning(w) if w.kind == WarningKind::SikWorkerFailed && w.persistent));
        assert_eq!(entity.worker_state(), SikWorkerState::Failed);
        assert!(config.state_read().sik_failed);
    }
}
