//! Ground station configuration management
//!
//! This crate provides configuration loading and parsing:
//! - TOML configuration file parsing
//! - Controller configuration structures and shared runtime state
//! - SiK modem specific configuration

pub mod stack_config;
pub mod stack_config_sik;
pub mod toml_config;

pub use stack_config::*;
pub use toml_config::*;
