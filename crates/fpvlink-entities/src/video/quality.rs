use std::collections::VecDeque;

use fpvlink_core::LoopTime;
use fpvlink_msgs::links::LinkQualitySample;

/// Link quality samples of the last `window_ms` milliseconds
#[derive(Debug)]
pub struct QualityWindow {
    window_ms: u64,
    samples: VecDeque<LinkQualitySample>,
}

impl QualityWindow {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            samples: VecDeque::new(),
        }
    }

    pub fn push(&mut self, sample: LinkQualitySample) {
        let now = sample.ts;
        self.samples.push_back(sample);
        self.age_out(now);
    }

    /// Drops samples older than the window
    pub fn age_out(&mut self, now: LoopTime) {
        while let Some(front) = self.samples.front() {
            if front.ts.elapsed_at_least(now, self.window_ms + 1) {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&LinkQualitySample> {
        self.samples.back()
    }

    /// Average loss rate in percent, 0 without samples
    pub fn avg_loss_percent(&self) -> u8 {
        if self.samples.is_empty() {
            return 0;
        }
        let sum: u32 = self.samples.iter().map(|s| s.loss_percent as u32).sum();
        (sum / self.samples.len() as u32) as u8
    }

    pub fn avg_rssi_dbm(&self) -> Option<i8> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: i32 = self.samples.iter().map(|s| s.rssi_dbm as i32).sum();
        Some((sum / self.samples.len() as i32) as i8)
    }

    /// Most recent ack round trip in the window
    pub fn last_ack_rtt_ms(&self) -> Option<u32> {
        self.samples.iter().rev().find_map(|s| s.ack_rtt_ms)
    }
}
