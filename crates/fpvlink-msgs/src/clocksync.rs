use fpvlink_core::LoopTime;

#[derive(Debug, Clone, Copy)]
pub struct ClockSyncPing {
    pub seq: u32,
    pub sent: LoopTime,
}

/// Vehicle answer to a ping, stamped with the vehicle clock
#[derive(Debug, Clone, Copy)]
pub struct ClockSyncPong {
    pub seq: u32,
    pub sent: LoopTime,
    pub vehicle_ms: u64,
    pub received: LoopTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Confidence {
    None,
    Low,
    High,
}

#[derive(Debug, Clone, Copy)]
pub struct RttMeasured {
    pub rtt_ms: u32,
    pub confidence: Confidence,
}
