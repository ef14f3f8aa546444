use std::collections::VecDeque;

use fpvlink_config::ClockSyncMode;
use fpvlink_core::LoopTime;
use fpvlink_msgs::clocksync::Confidence;

/// Samples needed before the regression is trusted
const ADVANCED_MIN_SAMPLES: usize = 8;

/// One completed ping exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSample {
    pub sent: LoopTime,
    pub received: LoopTime,
    /// Vehicle clock when it answered
    pub vehicle_ms: u64,
}

impl ClockSample {
    pub fn rtt_ms(&self) -> u64 {
        self.sent.age(self.received)
    }

    /// Local time the vehicle most likely answered, assuming a symmetric path
    pub fn local_midpoint_ms(&self) -> f64 {
        self.sent.ms as f64 + self.rtt_ms() as f64 / 2.0
    }

    /// Vehicle clock minus local clock
    pub fn offset_ms(&self) -> f64 {
        self.vehicle_ms as f64 - self.local_midpoint_ms()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockEstimate {
    pub offset_ms: i64,
    pub one_way_ms: u32,
    pub rtt_ms: u32,
    /// Vehicle clock drift relative to the local clock, Advanced mode only
    pub drift_ppm: f64,
    pub confidence: Confidence,
}

impl ClockEstimate {
    pub const NONE: ClockEstimate = ClockEstimate {
        offset_ms: 0,
        one_way_ms: 0,
        rtt_ms: 0,
        drift_ppm: 0.0,
        confidence: Confidence::None,
    };
}

/// Estimates vehicle clock offset and link latency from ping exchanges.
/// All modes take the same samples, they differ in how much they trust them.
#[derive(Debug)]
pub struct ClockEstimator {
    mode: ClockSyncMode,
    capacity: usize,
    samples: VecDeque<ClockSample>,
}

impl ClockEstimator {
    pub fn new(mode: ClockSyncMode, capacity: usize) -> Self {
        Self {
            mode,
            capacity: capacity.max(2),
            samples: VecDeque::new(),
        }
    }

    pub fn mode(&self) -> ClockSyncMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn add(&mut self, sample: ClockSample) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn estimate(&self, now: LoopTime) -> ClockEstimate {
        let Some(latest) = self.samples.back() else {
            return ClockEstimate::NONE;
        };
        let rtt_ms = latest.rtt_ms().min(u32::MAX as u64) as u32;

        match self.mode {
            ClockSyncMode::None => ClockEstimate {
                rtt_ms,
                one_way_ms: rtt_ms / 2,
                ..ClockEstimate::NONE
            },
            ClockSyncMode::Basic => ClockEstimate {
                offset_ms: latest.offset_ms().round() as i64,
                one_way_ms: rtt_ms / 2,
                rtt_ms,
                drift_ppm: 0.0,
                confidence: Confidence::Low,
            },
            ClockSyncMode::Advanced => self.regression(now, rtt_ms),
        }
    }

    /// Least squares fit of offset over local time, using only the samples
    /// with a round trip at or below the median
    fn regression(&self, now: LoopTime, rtt_ms: u32) -> ClockEstimate {
        let mut rtts: Vec<u64> = self.samples.iter().map(ClockSample::rtt_ms).collect();
        rtts.sort_unstable();
        let median = rtts[rtts.len() / 2];
        let subset: Vec<&ClockSample> = self.samples.iter().filter(|s| s.rtt_ms() <= median).collect();

        let n = subset.len() as f64;
        let mean_x = subset.iter().map(|s| s.local_midpoint_ms()).sum::<f64>() / n;
        let mean_y = subset.iter().map(|s| s.offset_ms()).sum::<f64>() / n;
        let mut sxx = 0.0;
        let mut sxy = 0.0;
        for s in &subset {
            let dx = s.local_midpoint_ms() - mean_x;
            sxx += dx * dx;
            sxy += dx * (s.offset_ms() - mean_y);
        }
        let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
        let offset = mean_y + slope * (now.ms as f64 - mean_x);

        let min_rtt = subset.iter().map(|s| s.rtt_ms()).min().unwrap_or(rtt_ms as u64);
        let confidence = if self.samples.len() >= ADVANCED_MIN_SAMPLES {
            Confidence::High
        } else {
            Confidence::Low
        };
        ClockEstimate {
            offset_ms: offset.round() as i64,
            one_way_ms: (min_rtt / 2).min(u32::MAX as u64) as u32,
            rtt_ms,
            drift_ppm: slope * 1e6,
            confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(sent: u64, rtt: u64, offset: i64) -> ClockSample {
        let mid = sent + rtt / 2;
        ClockSample {
            sent: LoopTime::from_ms(sent),
            received: LoopTime::from_ms(sent + rtt),
            vehicle_ms: (mid as i64 + offset) as u64,
        }
    }

    #[test]
    fn test_modes_share_interface() {
        for (mode, confidence, offset) in [
            (ClockSyncMode::None, Confidence::None, 0),
            (ClockSyncMode::Basic, Confidence::Low, 5000),
        ] {
            let mut e = ClockEstimator::new(mode, 16);
            assert_eq!(e.estimate(LoopTime::ZERO).confidence, Confidence::None);
            e.add(sample(1000, 40, 5000));
            let est = e.estimate(LoopTime::from_ms(1040));
            assert_eq!(est.confidence, confidence);
            assert_eq!(est.offset_ms, offset);
            assert_eq!(est.one_way_ms, 20);
        }
    }

    #[test]
    fn test_advanced_filters_slow_samples_and_tracks_drift() {
        let mut e = ClockEstimator::new(ClockSyncMode::Advanced, 32);
        // Vehicle clock runs 100 ppm fast, every third exchange is delayed
        for i in 0..12u64 {
            let sent = 1000 + i * 1000;
            let drift = (sent as f64 * 100e-6).round() as i64;
            let mut s = sample(sent, 10, 2000 + drift);
            if i % 3 == 0 {
                // Queued on the return path
                s.received = LoopTime::from_ms(sent + 30);
            }
            e.add(s);
        }
        let est = e.estimate(LoopTime::from_ms(12_000));
        assert_eq!(est.confidence, Confidence::High);
        assert_eq!(est.one_way_ms, 5);
        assert!((est.offset_ms - 2001).abs() <= 1, "offset {}", est.offset_ms);
        assert!(est.drift_ppm > 50.0 && est.drift_ppm < 150.0, "drift {}", est.drift_ppm);
    }
}
