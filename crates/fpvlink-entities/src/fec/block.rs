use fpvlink_core::{BlockSeq, LoopTime};

use super::codec::{ErasureCode, FecError};
use super::{frame_shard, unframe_shard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FecBlockState {
    Open,
    Recovered,
    Abandoned,
}

/// Receive state of one FEC block.
/// Data packets are stored as received. EC shares cover data shards framed as
/// `[u16 BE length][payload][zero padding]` up to the EC share length.
#[derive(Debug)]
pub struct FecBlock {
    pub seq: BlockSeq,
    pub data_count: u16,
    pub ec_count: u16,
    pub created: LoopTime,
    state: FecBlockState,
    slots: Vec<Option<Vec<u8>>>,
    /// Last retransmission request per data slot
    last_request: Vec<Option<LoopTime>>,
    /// Highest slot index seen so far
    highest_index: Option<u16>,
}

impl FecBlock {
    pub fn new(seq: BlockSeq, data_count: u16, ec_count: u16, created: LoopTime) -> Self {
        let total = data_count as usize + ec_count as usize;
        Self {
            seq,
            data_count,
            ec_count,
            created,
            state: FecBlockState::Open,
            slots: vec![None; total],
            last_request: vec![None; data_count as usize],
            highest_index: None,
        }
    }

    pub fn state(&self) -> FecBlockState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == FecBlockState::Open
    }

    /// Stores a packet. Returns false for duplicates, out of range indices
    /// and packets arriving after the block was finished.
    pub fn insert(&mut self, index: u16, payload: Vec<u8>) -> bool {
        if !self.is_open() {
            return false;
        }
        let Some(slot) = self.slots.get_mut(index as usize) else {
            return false;
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(payload);
        self.highest_index = Some(self.highest_index.map_or(index, |h| h.max(index)));
        true
    }

    pub fn received(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn data_received(&self) -> usize {
        self.slots[..self.data_count as usize].iter().filter(|s| s.is_some()).count()
    }

    /// True once the last slot of the block arrived
    pub fn saw_last_index(&self) -> bool {
        self.highest_index.is_some_and(|h| h as usize + 1 == self.slots.len())
    }

    /// Share of the slots up to the highest index seen that did not arrive.
    /// Later slots may only be EC shares that were never needed.
    pub fn loss_up_to_highest(&self) -> f32 {
        let Some(h) = self.highest_index else {
            return 0.0;
        };
        let span = h as usize + 1;
        let missing = self.slots[..span].iter().filter(|s| s.is_none()).count();
        missing as f32 / span as f32
    }

    /// Share of all slots of the block that did not arrive
    pub fn loss_total(&self) -> f32 {
        if self.slots.is_empty() {
            return 0.0;
        }
        1.0 - self.received() as f32 / self.slots.len() as f32
    }

    pub fn missing_data(&self) -> Vec<u16> {
        (0..self.data_count).filter(|&i| self.slots[i as usize].is_none()).collect()
    }

    /// Number of data slots that must be resent before FEC can finish the block
    pub fn shares_short(&self) -> usize {
        (self.data_count as usize).saturating_sub(self.received())
    }

    pub fn can_recover(&self) -> bool {
        self.is_open() && self.shares_short() == 0
    }

    pub fn last_request(&self, index: u16) -> Option<LoopTime> {
        self.last_request.get(index as usize).copied().flatten()
    }

    pub fn mark_requested(&mut self, index: u16, ts: LoopTime) {
        if let Some(r) = self.last_request.get_mut(index as usize) {
            *r = Some(ts);
        }
    }

    /// Recovers missing data packets if enough shares arrived.
    /// Returns Ok(true) exactly once, on the transition to Recovered.
    pub fn try_recover(&mut self, codec: &dyn ErasureCode) -> Result<bool, FecError> {
        if !self.can_recover() {
            return Ok(false);
        }

        let data_count = self.data_count as usize;
        if self.data_received() < data_count {
            let shard_len = self.slots[data_count..]
                .iter()
                .flatten()
                .map(Vec::len)
                .next()
                .ok_or(FecError::NotEnoughShards { have: self.data_received(), need: data_count })?;

            let mut shards: Vec<Option<Vec<u8>>> = Vec::with_capacity(self.slots.len());
            for (i, slot) in self.slots.iter().enumerate() {
                shards.push(match slot {
                    Some(p) if i < data_count => Some(frame_shard(p, shard_len)?),
                    Some(p) => Some(p.clone()),
                    None => None,
                });
            }
            codec.reconstruct(&mut shards, data_count)?;

            for i in 0..data_count {
                if self.slots[i].is_none() {
                    let shard = shards[i].as_deref().ok_or(FecError::SingularMatrix)?;
                    self.slots[i] = Some(unframe_shard(shard)?.to_vec());
                }
            }
        }

        self.state = FecBlockState::Recovered;
        Ok(true)
    }

    pub fn abandon(&mut self) {
        if self.is_open() {
            self.state = FecBlockState::Abandoned;
        }
    }

    /// Data packets in order, `None` where lost
    pub fn data_packets(&self) -> Vec<Option<Vec<u8>>> {
        self.slots[..self.data_count as usize].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::super::{CauchyReedSolomon, encode_block};
    use super::*;

    fn payloads() -> Vec<Vec<u8>> {
        (0..8u8).map(|i| vec![i; 100 + i as usize * 3]).collect()
    }

    #[test]
    fn test_recovery_happens_once() {
        let codec = CauchyReedSolomon::new();
        let packets = encode_block(&codec, 0, 7, &payloads(), 4).unwrap();
        let mut block = FecBlock::new(7, 8, 4, LoopTime::ZERO);

        for p in packets.iter().filter(|p| p.index != 2 && p.index != 5) {
            block.insert(p.index, p.payload.clone());
        }
        assert!(block.can_recover());
        assert_eq!(block.try_recover(&codec), Ok(true));
        assert_eq!(block.try_recover(&codec), Ok(false));
        assert_eq!(block.state(), FecBlockState::Recovered);

        let out = block.data_packets();
        for (i, p) in payloads().into_iter().enumerate() {
            assert_eq!(out[i].as_ref(), Some(&p));
        }
        assert!(!block.insert(2, vec![1]));
    }

    #[test]
    fn test_loss_ignores_unneeded_shares() {
        let codec = CauchyReedSolomon::new();
        let packets = encode_block(&codec, 0, 3, &payloads(), 4).unwrap();
        let mut block = FecBlock::new(3, 8, 4, LoopTime::ZERO);
        for p in &packets[..8] {
            block.insert(p.index, p.payload.clone());
        }
        assert_eq!(block.loss_up_to_highest(), 0.0);
        assert_eq!(block.try_recover(&codec), Ok(true));

        // Two lost data packets, covered by the first two EC shares
        let mut block = FecBlock::new(4, 8, 4, LoopTime::ZERO);
        for p in packets.iter().filter(|p| p.index != 1 && p.index != 6 && p.index < 10) {
            block.insert(p.index, p.payload.clone());
        }
        assert_eq!(block.loss_up_to_highest(), 0.2);
        assert!(!block.saw_last_index());
    }

    #[test]
    fn test_oversized_geometry_does_not_overflow() {
        let mut block = FecBlock::new(0, u16::MAX, 1, LoopTime::ZERO);
        assert!(block.insert(u16::MAX, vec![0]));
        assert!(block.saw_last_index());
        assert_eq!(block.shares_short(), u16::MAX as usize - 1);
    }

    #[test]
    fn test_not_enough_shares() {
        let codec = CauchyReedSolomon::new();
        let packets = encode_block(&codec, 0, 1, &payloads(), 4).unwrap();
        let mut block = FecBlock::new(1, 8, 4, LoopTime::ZERO);
        for p in packets.iter().filter(|p| ![0u16, 1, 2, 3, 4].contains(&p.index)) {
            block.insert(p.index, p.payload.clone());
        }
        assert_eq!(block.shares_short(), 1);
        assert_eq!(block.missing_data(), vec![0, 1, 2, 3, 4]);
        assert_eq!(block.try_recover(&codec), Ok(false));
        assert!(block.saw_last_index());

        assert!((block.loss_total() - 5.0 / 12.0).abs() < 1e-6);
        block.abandon();
        assert_eq!(block.state(), FecBlockState::Abandoned);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut block = FecBlock::new(1, 2, 1, LoopTime::ZERO);
        assert!(block.insert(0, vec![1, 2]));
        assert!(!block.insert(0, vec![1, 2]));
        assert!(!block.insert(9, vec![1]));
        assert_eq!(block.received(), 1);
    }
}
