//! Adapter towards the vehicle command channel and pending-command bookkeeping

pub mod command_tracker;
pub mod vehicle_link;
