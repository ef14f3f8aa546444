pub mod adaptive;
pub mod profile_store;
pub mod quality;

pub use adaptive::{Adaptive, AdaptiveState, Pin};
pub use profile_store::VideoProfileStore;
pub use quality::QualityWindow;
