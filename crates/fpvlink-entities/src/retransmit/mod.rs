pub mod coordinator;

pub use coordinator::{RetransmitCoordinator, RetransmitStats};
