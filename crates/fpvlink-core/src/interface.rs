use serde::{Deserialize, Serialize};

use crate::{FreqBand, InterfaceIndex, LinkId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterfaceKind {
    Wifi,
    /// Serial-attached SiK telemetry modem
    Sik,
}

/// User restriction of an interface to one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TxRxMode {
    #[default]
    Both,
    TxOnly,
    RxOnly,
}

/// What the hardware itself can do, before user overrides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwCaps {
    pub can_tx: bool,
    pub can_rx: bool,
}

impl HwCaps {
    pub const FULL: HwCaps = HwCaps { can_tx: true, can_rx: true };
}

/// User overrides, persisted by the external settings store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterfaceOverrides {
    pub disabled: bool,
    pub mode: TxRxMode,
    /// 0 = auto, lower non-zero rank is preferred
    pub preferred_tx: u8,
    pub internal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalRadioInterface {
    pub index: InterfaceIndex,
    /// MAC address for WiFi cards, serial number or port name for SiK modems
    pub hw_id: String,
    pub usb_path: Option<String>,
    pub kind: InterfaceKind,
    pub bands: Vec<FreqBand>,
    pub hw: HwCaps,
    pub overrides: InterfaceOverrides,
    pub link: Option<LinkId>,
}

impl PhysicalRadioInterface {
    pub fn new(index: InterfaceIndex, hw_id: impl Into<String>, kind: InterfaceKind, bands: Vec<FreqBand>) -> Self {
        Self {
            index,
            hw_id: hw_id.into(),
            usb_path: None,
            kind,
            bands,
            hw: HwCaps::FULL,
            overrides: InterfaceOverrides::default(),
            link: None,
        }
    }

    pub fn enabled(&self) -> bool {
        !self.overrides.disabled
    }

    pub fn supports_band(&self, band: FreqBand) -> bool {
        self.bands.contains(&band)
    }

    /// Able to transmit, taking the TX/RX-only override into account
    pub fn effective_tx(&self) -> bool {
        self.enabled() && self.hw.can_tx && self.overrides.mode != TxRxMode::RxOnly
    }

    /// Able to receive, taking the TX/RX-only override into account
    pub fn effective_rx(&self) -> bool {
        self.enabled() && self.hw.can_rx && self.overrides.mode != TxRxMode::TxOnly
    }
}

/// Interface description as reported by the vehicle at pairing time.
/// The vehicle applies its own overrides before reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRadioInterface {
    pub index: InterfaceIndex,
    pub kind: InterfaceKind,
    pub bands: Vec<FreqBand>,
    pub enabled: bool,
    pub can_tx: bool,
    pub can_rx: bool,
    pub link: Option<LinkId>,
}
