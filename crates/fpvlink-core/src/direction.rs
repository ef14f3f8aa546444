/// Direction(s) in which a logical link carries traffic.
/// Downlink is vehicle -> controller, uplink is controller -> vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum Direction {
    None,
    /// Uplink only
    Ul,
    /// Downlink only
    Dl,
    /// Bidirectional
    Both,
}

impl Direction {
    #[inline]
    pub fn includes_ul(&self) -> bool {
        matches!(self, Direction::Ul | Direction::Both)
    }

    #[inline]
    pub fn includes_dl(&self) -> bool {
        matches!(self, Direction::Dl | Direction::Both)
    }

    pub fn from_flags(dl: bool, ul: bool) -> Self {
        match (dl, ul) {
            (true, true) => Direction::Both,
            (true, false) => Direction::Dl,
            (false, true) => Direction::Ul,
            (false, false) => Direction::None,
        }
    }
}
