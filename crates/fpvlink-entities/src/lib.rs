pub mod clocksync;
pub mod entity_trait;
pub mod external;
pub mod fec;
pub mod links;
pub mod messagerouter;
pub mod pairing;
pub mod retransmit;
pub mod router_notify;
pub mod sik;
pub mod vehicle;
pub mod video;
pub mod warnings;

// Re-export commonly used items from router
pub use entity_trait::CoreEntityTrait;
pub use messagerouter::{MessagePrio, MessageQueue, MessageRouter};
pub use pairing::{PairingContext, VehicleInfo};
