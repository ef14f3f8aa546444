use std::collections::HashMap;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use fpvlink_config::stack_config_sik::CfgSik;
use fpvlink_core::InterfaceIndex;
use fpvlink_msgs::sik::{SikHelperTool, SikReinitRequest};

use super::handshake::{SikHandshake, SikRadioParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SikWorkerState {
    Idle,
    /// Reconfiguration requested, waiting for the next check
    Pending,
    WorkerRunning,
    /// Handshake done, the radio stack must reopen the modems
    ReopenInterfaces,
    /// Gave up after too many handshake failures. Left only by a new request.
    Failed,
}

/// Requests from the control loop to the worker thread
#[derive(Debug)]
pub enum SikCommand {
    Reinit(SikReinitRequest),
    HelperTool(SikHelperTool),
    Shutdown,
}

/// Events from the worker thread to the control loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SikEvent {
    StateChanged(SikWorkerState),
    Reopen(Vec<InterfaceIndex>),
    Failed { retries: u32 },
}

/// All state of the reconfiguration worker. Owned by the worker thread; the
/// control loop only talks to it through [`SikCommand`] and [`SikEvent`].
#[derive(Debug)]
pub struct SikWorkerContext {
    cfg: CfgSik,
    state: SikWorkerState,
    retries: u32,
    request: Option<SikReinitRequest>,
    /// Interfaces an external helper is configuring, with its start time
    helpers: HashMap<InterfaceIndex, u64>,
    to_reopen: Vec<InterfaceIndex>,
}

impl SikWorkerContext {
    pub fn new(cfg: CfgSik) -> Self {
        Self {
            cfg,
            state: SikWorkerState::Idle,
            retries: 0,
            request: None,
            helpers: HashMap::new(),
            to_reopen: Vec::new(),
        }
    }

    pub fn state(&self) -> SikWorkerState {
        self.state
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    fn set_state(&mut self, state: SikWorkerState, events: &mut Vec<SikEvent>) {
        if self.state != state {
            tracing::debug!("SiK worker: {:?} -> {:?}", self.state, state);
            self.state = state;
            events.push(SikEvent::StateChanged(state));
        }
    }

    /// Applies a request. Returns false when the worker should stop.
    pub fn handle(&mut self, cmd: SikCommand, now_ms: u64, events: &mut Vec<SikEvent>) -> bool {
        match cmd {
            SikCommand::Reinit(req) => {
                tracing::info!("SiK worker: reinit of {} modem(s) to {} requested", req.ports.len(), req.frequency);
                // Latest request wins, a new one restarts the retry budget
                self.request = Some(req);
                self.retries = 0;
                self.set_state(SikWorkerState::Pending, events);
            }
            SikCommand::HelperTool(SikHelperTool { interface, running }) => {
                if running {
                    self.helpers.insert(interface, now_ms);
                } else {
                    self.helpers.remove(&interface);
                }
            }
            SikCommand::Shutdown => return false,
        }
        true
    }

    /// True while a helper tool works on one of the requested interfaces.
    /// Helpers running longer than the timeout are assumed dead and forgotten.
    fn blocked_by_helper(&mut self, now_ms: u64) -> bool {
        let timeout = self.cfg.helper_tool_timeout_ms;
        self.helpers.retain(|iface, started| {
            let alive = now_ms.saturating_sub(*started) < timeout;
            if !alive {
                tracing::warn!("SiK worker: helper tool on interface {} timed out", iface);
            }
            alive
        });
        let Some(req) = &self.request else {
            return false;
        };
        req.ports.iter().any(|p| self.helpers.contains_key(&p.interface))
    }

    /// One check of the worker. Runs the blocking handshake when a request is pending.
    pub fn step(&mut self, now_ms: u64, handshake: &mut dyn SikHandshake) -> Vec<SikEvent> {
        let mut events = Vec::new();
        match self.state {
            SikWorkerState::Idle | SikWorkerState::Failed | SikWorkerState::WorkerRunning => {}
            SikWorkerState::ReopenInterfaces => {
                events.push(SikEvent::Reopen(std::mem::take(&mut self.to_reopen)));
                self.set_state(SikWorkerState::Idle, &mut events);
            }
            SikWorkerState::Pending => {
                if self.blocked_by_helper(now_ms) {
                    return events;
                }
                let Some(req) = self.request.clone() else {
                    self.set_state(SikWorkerState::Idle, &mut events);
                    return events;
                };
                self.set_state(SikWorkerState::WorkerRunning, &mut events);

                let params = SikRadioParams::from_config(&self.cfg, req.frequency);
                let result = req.ports.iter().try_for_each(|port| handshake.configure(port, &params));
                match result {
                    Ok(()) => {
                        self.request = None;
                        self.retries = 0;
                        self.to_reopen = req.ports.iter().map(|p| p.interface).collect();
                        self.set_state(SikWorkerState::ReopenInterfaces, &mut events);
                    }
                    Err(e) => {
                        self.retries += 1;
                        tracing::warn!("SiK worker: handshake failed ({}), attempt {}", e, self.retries);
                        if self.retries > self.cfg.max_retries {
                            self.request = None;
                            self.set_state(SikWorkerState::Failed, &mut events);
                            events.push(SikEvent::Failed { retries: self.retries });
                        } else {
                            self.set_state(SikWorkerState::Pending, &mut events);
                        }
                    }
                }
            }
        }
        events
    }
}

/// Worker thread body
pub struct SikWorker {
    ctx: SikWorkerContext,
    handshake: Box<dyn SikHandshake>,
    commands: Receiver<SikCommand>,
    events: Sender<SikEvent>,
    started: Instant,
}

impl SikWorker {
    pub fn new(cfg: CfgSik, handshake: Box<dyn SikHandshake>, commands: Receiver<SikCommand>, events: Sender<SikEvent>) -> Self {
        Self {
            ctx: SikWorkerContext::new(cfg),
            handshake,
            commands,
            events,
            started: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn run(&mut self) {
        let interval = Duration::from_millis(self.ctx.cfg.check_interval_ms.max(1));
        tracing::info!("SikWorker started, check interval {:?}", interval);
        loop {
            let mut events = Vec::new();
            let keep_running = match self.commands.recv_timeout(interval) {
                Ok(cmd) => {
                    let mut keep = self.ctx.handle(cmd, self.now_ms(), &mut events);
                    while keep {
                        match self.commands.try_recv() {
                            Ok(cmd) => keep = self.ctx.handle(cmd, self.now_ms(), &mut events),
                            Err(_) => break,
                        }
                    }
                    keep
                }
                Err(RecvTimeoutError::Timeout) => true,
                Err(RecvTimeoutError::Disconnected) => false,
            };
            if !keep_running {
                tracing::info!("SikWorker stopping");
                return;
            }

            let now = self.now_ms();
            events.extend(self.ctx.step(now, &mut *self.handshake));
            for event in events {
                if self.events.send(event).is_err() {
                    return;
                }
            }
        }
    }
}
