//! Core utilities for the fpvlink ground station
//!
//! This crate provides fundamental types and utilities used across the link stack:
//! - LoopTime for control loop timing
//! - Radio types (bands, frequencies, data rates, modulation flags)
//! - Interface, link and video profile data model
//! - Entity identifiers used for message routing
//! - The error taxonomy shared by all core operations
//! - Logging setup and debug macros

pub mod core_entities;
pub mod debug;
pub mod direction;
pub mod error;
pub mod interface;
pub mod link;
pub mod loop_time;
pub mod radio;
pub mod setting;
pub mod video;

// Re-export commonly used items
pub use core_entities::CoreEntity;
pub use direction::Direction;
pub use error::ErrorKind;
pub use interface::*;
pub use link::*;
pub use loop_time::LoopTime;
pub use radio::*;
pub use setting::{DisplayValue, SettingValue};
pub use video::*;

pub const STACK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Stable small integer identifying a logical radio link
pub type LinkId = u8;

/// Hardware index of a physical radio interface, as assigned at enumeration
pub type InterfaceIndex = u16;

/// Identifier of a video stream. Stream 0 is the primary camera.
pub type StreamId = u8;

/// Sequence number of an FEC block within a stream
pub type BlockSeq = u32;
