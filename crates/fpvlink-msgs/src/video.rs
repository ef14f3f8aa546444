use fpvlink_core::{BlockSeq, DupPercent, PackedFec, StreamId, VideoTier};

/// A single packet of an FEC block as received from the radio stack.
/// Indices below `data_count` are data packets, the rest are EC shares.
#[derive(Debug, Clone)]
pub struct FecPacket {
    pub stream: StreamId,
    pub seq: BlockSeq,
    pub index: u16,
    pub data_count: u16,
    pub ec_count: u16,
    pub payload: Vec<u8>,
}

impl FecPacket {
    pub fn is_data(&self) -> bool {
        self.index < self.data_count
    }
}

/// Ask the vehicle to resend specific data packets of a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetransmissionRequest {
    pub stream: StreamId,
    pub seq: BlockSeq,
    pub missing: Vec<u16>,
    /// How much the vehicle should duplicate its response
    pub dup_percent: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    Recovered,
    /// Block expired before it could be reconstructed
    Gap,
}

/// A finished block handed to the video pipeline
#[derive(Debug, Clone)]
pub struct VideoBlockOut {
    pub stream: StreamId,
    pub seq: BlockSeq,
    pub status: BlockStatus,
    /// Data packets in order, `None` where lost
    pub packets: Vec<Option<Vec<u8>>>,
}

/// Parameters of the tier the adaptive controller currently runs
#[derive(Debug, Clone, Copy)]
pub struct ActiveProfile {
    pub stream: StreamId,
    pub tier: VideoTier,
    pub fec: PackedFec,
    pub retransmission_window_ms: u32,
    pub retransmission_dup: DupPercent,
    pub transmission_dup: DupPercent,
}
