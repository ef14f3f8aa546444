pub mod block;
pub mod codec;
pub mod gf256;

pub use block::{FecBlock, FecBlockState};
pub use codec::{CauchyReedSolomon, ErasureCode, FecError};

use fpvlink_core::{BlockSeq, StreamId};
use fpvlink_msgs::video::FecPacket;

const LEN_PREFIX: usize = 2;

/// Frames a data packet into a shard of `shard_len` bytes
pub fn frame_shard(payload: &[u8], shard_len: usize) -> Result<Vec<u8>, FecError> {
    if payload.len() + LEN_PREFIX > shard_len || payload.len() > u16::MAX as usize {
        return Err(FecError::ShardLengthMismatch);
    }
    let mut shard = Vec::with_capacity(shard_len);
    shard.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    shard.extend_from_slice(payload);
    shard.resize(shard_len, 0);
    Ok(shard)
}

/// Returns the data packet carried in a framed shard
pub fn unframe_shard(shard: &[u8]) -> Result<&[u8], FecError> {
    if shard.len() < LEN_PREFIX {
        return Err(FecError::ShardLengthMismatch);
    }
    let len = u16::from_be_bytes([shard[0], shard[1]]) as usize;
    shard.get(LEN_PREFIX..LEN_PREFIX + len).ok_or(FecError::ShardLengthMismatch)
}

/// Builds the packets of one FEC block the way the vehicle sends them.
/// Data packets go out unframed, EC shares cover the framed data shards.
pub fn encode_block(
    codec: &dyn ErasureCode,
    stream: StreamId,
    seq: BlockSeq,
    payloads: &[Vec<u8>],
    ec_count: u16,
) -> Result<Vec<FecPacket>, FecError> {
    let shard_len = payloads.iter().map(Vec::len).max().unwrap_or(0) + LEN_PREFIX;
    let framed = payloads
        .iter()
        .map(|p| frame_shard(p, shard_len))
        .collect::<Result<Vec<_>, _>>()?;
    let refs: Vec<&[u8]> = framed.iter().map(Vec::as_slice).collect();
    let ec = codec.encode(&refs, ec_count as usize)?;

    let data_count = payloads.len() as u16;
    let data = payloads.iter().cloned();
    Ok(data
        .chain(ec)
        .enumerate()
        .map(|(i, payload)| FecPacket {
            stream,
            seq,
            index: i as u16,
            data_count,
            ec_count,
            payload,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framing() {
        let shard = frame_shard(&[9, 8, 7], 8).unwrap();
        assert_eq!(shard, vec![0, 3, 9, 8, 7, 0, 0, 0]);
        assert_eq!(unframe_shard(&shard).unwrap(), &[9, 8, 7]);
        assert!(frame_shard(&[1; 7], 8).is_err());
        assert!(unframe_shard(&[0, 9, 1]).is_err());
    }
}
