pub mod entity;
pub mod handshake;
pub mod worker;

pub use entity::SikRadioEntity;
pub use handshake::{HandshakeError, SerialAtHandshake, SikHandshake, SikRadioParams};
pub use worker::{SikCommand, SikEvent, SikWorker, SikWorkerContext, SikWorkerState};
