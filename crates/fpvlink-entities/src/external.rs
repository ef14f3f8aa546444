//! Placeholder for collaborators outside the core (radio stack, video pipeline)
//! when the binary runs without them attached.

use fpvlink_core::CoreEntity;
use fpvlink_msgs::CoreMsg;

use crate::{CoreEntityTrait, MessageQueue, PairingContext};

pub struct DetachedCollaborator {
    entity: CoreEntity,
    dropped: u64,
}

impl DetachedCollaborator {
    pub fn new(entity: CoreEntity) -> Self {
        Self { entity, dropped: 0 }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }
}

impl CoreEntityTrait for DetachedCollaborator {
    fn entity(&self) -> CoreEntity {
        self.entity
    }

    fn rx_prim(&mut self, _queue: &mut MessageQueue, _ctx: &PairingContext, message: CoreMsg) {
        tracing::trace!("{:?}: dropping {} from {:?}", self.entity, message.kind(), message.src);
        self.dropped += 1;
    }
}
