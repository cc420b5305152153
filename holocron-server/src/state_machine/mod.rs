//! Runtime half of the lifecycle state machine.
//!
//! The pure transition logic lives in `holocron_core::state_machine`. This
//! module adds what needs I/O: persistence, the effect interpreter, and the
//! locked store that ties them together.

pub use holocron_core::state_machine::*;

pub mod interpreter;
pub mod repository;
pub mod store;

pub use store::{LifecycleStore, ProcessOutcome};
