//! Message vocabulary exchanged between the entities of the ground control loop

pub mod clocksync;
pub mod command;
pub mod coremsg;
pub mod links;
pub mod notify;
pub mod sik;
pub mod video;

pub use coremsg::{CoreMsg, CoreMsgInner};
