use fpvlink_core::{Frequency, InterfaceIndex};

/// A SiK modem and the serial port it is attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SikPort {
    pub interface: InterfaceIndex,
    pub port: String,
}

/// Request a reconfiguration of SiK modems to a new frequency
#[derive(Debug, Clone)]
pub struct SikReinitRequest {
    pub ports: Vec<SikPort>,
    pub frequency: Frequency,
}

/// An external helper process started or finished configuring an interface
#[derive(Debug, Clone, Copy)]
pub struct SikHelperTool {
    pub interface: InterfaceIndex,
    pub running: bool,
}
