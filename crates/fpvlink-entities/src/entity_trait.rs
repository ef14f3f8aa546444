use as_any::AsAny;
use fpvlink_config::SharedConfig;
use fpvlink_core::{CoreEntity, LoopTime};
use fpvlink_msgs::CoreMsg;

use crate::{MessageQueue, PairingContext};

/// Trait for entities of the ground control loop
/// Used by MessageRouter for passing messages between entities
pub trait CoreEntityTrait: Send + AsAny {
    /// Returns the entity type identifier
    fn entity(&self) -> CoreEntity;

    /// Handle incoming message
    fn rx_prim(&mut self, queue: &mut MessageQueue, ctx: &PairingContext, message: CoreMsg);

    /// Update configuration (optional)
    #[allow(dead_code)]
    fn set_config(&mut self, _config: SharedConfig) {}

    /// Called at the start of each control loop tick
    fn tick_start(&mut self, _queue: &mut MessageQueue, _ctx: &PairingContext, _ts: LoopTime) {}

    /// Called at the end of each control loop tick
    fn tick_end(&mut self, _queue: &mut MessageQueue, _ctx: &PairingContext, _ts: LoopTime) -> bool {
        false
    }
}
