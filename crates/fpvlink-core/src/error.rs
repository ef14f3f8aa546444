use thiserror::Error;

use crate::{InterfaceIndex, LinkId};

/// Error taxonomy shared by all core operations.
/// Validation errors are returned synchronously and never applied.
/// Transport-level kinds (BlockUnrecoverable, LinkTopologyInconsistent,
/// SikWorkerFailed) are reported as warnings and do not halt the loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error("no enabled interface supports the requested band")]
    UnsupportedBand,
    #[error("change would leave link {0} without a usable interface")]
    WouldOrphanLink(LinkId),
    #[error("a command of the same class is still pending")]
    CommandInProgress,
    #[error("invalid capability combination: {0}")]
    InvalidCapabilityCombination(&'static str),
    #[error("SiK reconfiguration failed after {retries} retries")]
    SikWorkerFailed { retries: u32 },
    #[error("FEC block {seq} could not be recovered")]
    BlockUnrecoverable { seq: u32 },
    #[error("link topology inconsistent: {0}")]
    LinkTopologyInconsistent(String),

    #[error("invalid parameter {field}: {reason}")]
    InvalidParameter { field: &'static str, reason: &'static str },
    #[error("unknown link {0}")]
    UnknownLink(LinkId),
    #[error("unknown interface {0}")]
    UnknownInterface(InterfaceIndex),
    #[error("no vehicle paired")]
    NoVehicle,
}
