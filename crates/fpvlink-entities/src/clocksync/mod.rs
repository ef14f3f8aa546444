pub mod clocksync;
pub mod estimator;

pub use clocksync::ClockSync;
pub use estimator::{ClockEstimate, ClockEstimator, ClockSample};
