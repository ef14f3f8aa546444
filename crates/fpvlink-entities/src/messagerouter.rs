use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use fpvlink_config::SharedConfig;
use fpvlink_core::{CoreEntity, LoopTime};
use fpvlink_msgs::CoreMsg;

use crate::{CoreEntityTrait, PairingContext};

#[derive(Default)]
pub enum MessagePrio {
    Immediate,
    #[default]
    Normal,
}

pub struct MessageQueue {
    messages: VecDeque<CoreMsg>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self { messages: VecDeque::new() }
    }

    pub fn push_back(&mut self, message: CoreMsg) {
        self.messages.push_back(message);
    }

    pub fn push_prio(&mut self, message: CoreMsg, prio: MessagePrio) {
        match prio {
            MessagePrio::Immediate => {
                self.messages.push_front(message);
            }
            MessagePrio::Normal => {
                self.messages.push_back(message);
            }
        }
    }

    pub fn pop_front(&mut self) -> Option<CoreMsg> {
        self.messages.pop_front()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MessageRouter {
    config: SharedConfig,
    entities: HashMap<CoreEntity, Box<dyn CoreEntityTrait>>,
    msg_queue: MessageQueue,

    /// Active pairing, read by every entity
    pairing: PairingContext,

    /// Current loop time, advanced by one tick period per tick
    ts: LoopTime,

    /// Sleep between ticks to follow wall clock time
    realtime: bool,
}

impl MessageRouter {
    pub fn new(config: SharedConfig) -> Self {
        let cfg = config.config();
        let pairing = PairingContext::unpaired(cfg.controller.limits, cfg.video.user);
        Self {
            entities: HashMap::new(),
            msg_queue: MessageQueue::new(),
            config,
            pairing,
            ts: LoopTime::default(),
            realtime: false,
        }
    }

    pub fn set_time(&mut self, ts: LoopTime) {
        self.ts = ts;
    }

    pub fn time(&self) -> LoopTime {
        self.ts
    }

    pub fn set_realtime(&mut self, realtime: bool) {
        self.realtime = realtime;
    }

    pub fn pairing(&self) -> &PairingContext {
        &self.pairing
    }

    /// Replace the active pairing. Entities see the new context from the next delivery on.
    pub fn set_pairing(&mut self, pairing: PairingContext) {
        tracing::info!(
            "set_pairing: vehicle {:?}",
            pairing.vehicle.as_ref().map(|v| v.name.as_str())
        );
        self.config.state_write().vehicle_paired = pairing.is_paired();
        self.pairing = pairing;
    }

    pub fn register_entity(&mut self, entity: Box<dyn CoreEntityTrait>) {
        let comp_type = entity.entity();
        tracing::debug!("register_entity {:?}", comp_type);
        self.entities.insert(comp_type, entity);
    }

    /// Returns a mut ref to a component of the requested type
    pub fn get_entity(&mut self, comp: CoreEntity) -> Option<&mut dyn CoreEntityTrait> {
        self.entities.get_mut(&comp).map(|entity| entity.as_mut())
    }

    /// Runs `f` on a concrete entity, with access to the message queue and pairing.
    /// This is how UI collaborators call entity operations between ticks.
    /// Returns None if the entity is not registered or not of type T.
    pub fn with_entity<T, R>(&mut self, comp: CoreEntity, f: impl FnOnce(&mut T, &mut MessageQueue, &PairingContext) -> R) -> Option<R>
    where
        T: CoreEntityTrait + 'static,
    {
        let entity: &mut dyn CoreEntityTrait = self.entities.get_mut(&comp)?.as_mut();
        let concrete = entity.as_any_mut().downcast_mut::<T>()?;
        Some(f(concrete, &mut self.msg_queue, &self.pairing))
    }

    pub fn submit_message(&mut self, message: CoreMsg) {
        tracing::debug!("submit_message {}: {:?} -> {:?}", message.kind(), message.get_source(), message.get_dest());
        self.msg_queue.push_back(message);
    }

    pub fn deliver_message(&mut self) {
        let message = self.msg_queue.pop_front();
        if let Some(message) = message {
            tracing::debug!("deliver_message: got {}: {:?} -> {:?}", message.kind(), message.get_source(), message.get_dest());

            let dest = *message.get_dest();
            if let Some(entity) = self.entities.get_mut(&dest) {
                entity.rx_prim(&mut self.msg_queue, &self.pairing, message);
            } else {
                tracing::warn!(
                    "deliver_message: entity {:?} not found for {}: {:?} -> {:?}",
                    dest,
                    message.kind(),
                    message.get_source(),
                    message.get_dest()
                );
            }
        }
    }

    pub fn deliver_all_messages(&mut self) {
        while !self.msg_queue.is_empty() {
            self.deliver_message();
        }
    }

    pub fn get_msgqueue_len(&self) -> usize {
        self.msg_queue.len()
    }

    pub fn tick_start(&mut self) {
        tracing::trace!("--- tick {} ----------------------------", self.ts);

        for entity in self.entities.values_mut() {
            entity.tick_start(&mut self.msg_queue, &self.pairing, self.ts);
        }
    }

    /// Executes all end-of-tick functions:
    /// - LinkManager publishes topology changes first, so consumers see them this tick
    /// - then all other entities flush their work
    pub fn tick_end(&mut self) {
        let target = CoreEntity::LinkManager;
        if let Some(entity) = self.entities.get_mut(&target) {
            entity.tick_end(&mut self.msg_queue, &self.pairing, self.ts);
        }
        self.deliver_all_messages();

        for entity in self.entities.values_mut() {
            if entity.entity() == CoreEntity::LinkManager {
                continue;
            }
            entity.tick_end(&mut self.msg_queue, &self.pairing, self.ts);
        }
        self.deliver_all_messages();

        self.ts = self.ts.add_ms(self.config.config().tick_ms as i64);
    }

    /// Runs the full stack either forever or for a specified number of ticks.
    /// Stops early when `running` is cleared.
    pub fn run_stack(&mut self, num_ticks: Option<usize>, running: Option<Arc<AtomicBool>>) {
        let tick_period = Duration::from_millis(self.config.config().tick_ms);
        let mut next_deadline = Instant::now();
        let mut ticks: usize = 0;

        loop {
            if let Some(ref running) = running {
                if !running.load(Ordering::SeqCst) {
                    tracing::info!("run_stack: stop requested after {} ticks", ticks);
                    break;
                }
            }

            self.tick_start();

            while self.get_msgqueue_len() > 0 {
                self.deliver_all_messages();
            }

            self.tick_end();

            ticks += 1;
            if let Some(num_ticks) = num_ticks {
                if ticks >= num_ticks {
                    break;
                }
            }

            if self.realtime {
                next_deadline += tick_period;
                let now = Instant::now();
                if next_deadline > now {
                    std::thread::sleep(next_deadline - now);
                } else {
                    // Running late, don't try to catch up
                    next_deadline = now;
                }
            }
        }
    }
}
