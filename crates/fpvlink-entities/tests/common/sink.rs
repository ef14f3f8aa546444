use fpvlink_core::CoreEntity;
use fpvlink_entities::{CoreEntityTrait, MessageQueue, PairingContext};
use fpvlink_msgs::CoreMsg;

/// Stands in for an entity in tests
/// Collects all received CoreMsg messages for later inspection
pub struct Sink {
    component: CoreEntity,
    msgqueue: Vec<CoreMsg>,
}

impl Sink {
    pub fn new(component: CoreEntity) -> Self {
        Self {
            component,
            msgqueue: vec![],
        }
    }

    pub fn take_msgqueue(&mut self) -> Vec<CoreMsg> {
        std::mem::take(&mut self.msgqueue)
    }
}

impl CoreEntityTrait for Sink {
    fn entity(&self) -> CoreEntity {
        self.component
    }

    fn rx_prim(&mut self, _queue: &mut MessageQueue, _ctx: &PairingContext, message: CoreMsg) {
        tracing::debug!("rx_prim: {} {:?} -> {:?}", message.kind(), message.src, message.dest);
        self.msgqueue.push(message);
    }
}
