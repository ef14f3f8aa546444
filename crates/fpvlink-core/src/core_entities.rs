/// Entities taking part in the ground control loop.
/// Entities above the line are implemented in the core, the others are
/// external collaborators that only ever receive messages.
#[derive(PartialEq, Eq, Hash, Clone, Debug, Copy)]
pub enum CoreEntity {
    /// Logical link topology, owns the interface registry
    LinkManager,
    /// Video bitrate / data rate adaptation
    Adaptive,
    /// FEC block recovery and retransmission requests
    Retransmit,
    /// Ping / clock sync exchange with the vehicle
    ClockSync,
    /// Serial (SiK) modem reconfiguration
    SikRadio,
    /// Command channel adapter towards the vehicle
    Vehicle,
    /// Local control channel towards the router process
    Router,
    /// User-visible warnings and alerts
    Warnings,

    // ----------------------------------------------------------------

    /// Physical-layer radio stack (driver, packet TX/RX)
    RadioStack,
    /// Video decoding pipeline consuming recovered blocks
    VideoPipeline,
}
