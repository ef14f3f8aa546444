use fpvlink_core::{Frequency, InterfaceIndex, LinkId, LogicalRadioLink, LoopTime, PhysicalRadioInterface, RadioModulation, StreamId};

/// Which interface the radio stack should transmit on for a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxCardSelection {
    /// No fixed preference, the radio stack chooses per packet
    Auto,
    Fixed(InterfaceIndex),
}

/// Apply a link's radio parameters to the local (controller-side) interfaces
#[derive(Debug, Clone)]
pub struct LocalRadioApply {
    pub link: LinkId,
    pub interfaces: Vec<InterfaceIndex>,
    pub frequency: Frequency,
    pub modulation: RadioModulation,
    pub tx_card: TxCardSelection,
}

#[derive(Debug, Clone)]
pub enum InterfaceHotplug {
    Added(PhysicalRadioInterface),
    Removed(InterfaceIndex),
}

/// Interfaces the radio stack must close and reopen after reconfiguration
#[derive(Debug, Clone)]
pub struct ReopenInterfaces {
    pub interfaces: Vec<InterfaceIndex>,
}

/// Last applied link topology, published after every accepted change
#[derive(Debug, Clone, Default)]
pub struct TopologySnapshot {
    pub links: Vec<LogicalRadioLink>,
    /// Lowest-id usable link carrying video downlink
    pub video_link: Option<LinkId>,
    pub preferred_uplink: Option<LinkId>,
}

impl TopologySnapshot {
    pub fn link(&self, id: LinkId) -> Option<&LogicalRadioLink> {
        self.links.iter().find(|l| l.id == id)
    }
}

/// One link quality measurement as reported by the radio stack
#[derive(Debug, Clone, Copy)]
pub struct LinkQualitySample {
    pub link: LinkId,
    pub stream: StreamId,
    /// Clock-sync adjusted measurement time
    pub ts: LoopTime,
    pub rssi_dbm: i8,
    pub loss_percent: u8,
    /// Time the vehicle needed to transmit the last video block
    pub block_tx_time_us: u32,
    /// Time available per block at the current frame rate
    pub block_budget_us: u32,
    /// Command acknowledgment round trip, when one completed recently
    pub ack_rtt_ms: Option<u32>,
}
