//! The playback engine: a state machine over a `Transport`, owned by a
//! dedicated thread and driven through `EngineHandle`.

mod machine;
mod handle;
mod rodio_backend;
mod thread;
mod transport;
mod types;

pub use machine::Engine;
pub use handle::EngineHandle;
pub use rodio_backend::RodioTransport;
pub use transport::{Transport, TransportError};
pub use types::{Checkpoint, EngineCmd, EngineEvent, EngineState, EngineStatus, ReconcileOutcome, StatusHandle};

#[cfg(test)]
pub(crate) mod testing;
