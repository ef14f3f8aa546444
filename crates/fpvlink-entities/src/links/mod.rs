pub mod link_manager;
pub mod subcomp;
pub mod topology;

pub use link_manager::{ChangeStatus, FrequencyOutcome, LinkManager, PendingLinkChange};
pub use subcomp::interface_registry::InterfaceRegistry;
pub use subcomp::scanner::{InterfaceScanner, StaticScanner, SysfsScanner};
pub use topology::{TopologyViolation, ViolationKind};
