use core::fmt;
use std::time::Duration;

/// Control loop time in milliseconds since the stack was started.
/// All core entities receive the current LoopTime on every tick and message,
/// which keeps timing decisions deterministic and testable.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LoopTime {
    pub ms: u64,
}

impl LoopTime {
    pub const ZERO: LoopTime = LoopTime { ms: 0 };

    pub fn from_ms(ms: u64) -> LoopTime {
        LoopTime { ms }
    }

    /// Add a number of milliseconds. Negative values saturate at zero.
    pub fn add_ms(self, ms: i64) -> LoopTime {
        let t = self.ms as i64 + ms;
        LoopTime { ms: t.max(0) as u64 }
    }

    pub fn add(self, d: Duration) -> LoopTime {
        LoopTime { ms: self.ms + d.as_millis() as u64 }
    }

    /// Difference between two LoopTimes in milliseconds
    pub fn diff(self, b: Self) -> i64 {
        self.ms as i64 - b.ms as i64
    }

    /// Age of this LoopTime compared to now. Never negative.
    #[inline(always)]
    pub fn age(self, now: LoopTime) -> u64 {
        now.ms.saturating_sub(self.ms)
    }

    /// True when at least `ms` milliseconds passed between self and now
    #[inline(always)]
    pub fn elapsed_at_least(self, now: LoopTime, ms: u64) -> bool {
        self.age(now) >= ms
    }
}

impl fmt::Display for LoopTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.ms / 1000, self.ms % 1000)
    }
}

impl fmt::Debug for LoopTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_diff() {
        let initial_time = LoopTime::from_ms(1000);

        let mut time = initial_time;
        let increment = 37;
        for _ in 0..1000 {
            let time2 = time.add_ms(increment);
            assert_eq!(time2.diff(time), increment);
            assert_eq!(time.diff(time2), -increment);
            time = time2;
        }
        for _ in 0..1000 {
            time = time.add_ms(-increment);
        }
        assert_eq!(time, initial_time);
    }

    #[test]
    fn test_age_saturates() {
        let t = LoopTime::from_ms(500);
        assert_eq!(t.age(LoopTime::from_ms(400)), 0);
        assert_eq!(t.age(LoopTime::from_ms(900)), 400);
        assert_eq!(LoopTime::ZERO.add_ms(-10), LoopTime::ZERO);
        assert!(t.elapsed_at_least(LoopTime::from_ms(1500), 1000));
        assert_eq!(format!("{}", LoopTime::from_ms(12_034)), "12.034");
    }
}
