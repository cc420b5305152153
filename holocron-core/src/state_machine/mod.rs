//! Lifecycle state machine for nominations and reviews.
//!
//! The design separates:
//! - **Records**: what the engine knows (`Nomination`, `Review`)
//! - **Events**: what happened (`Event`)
//! - **Effects**: what to do about it (`Effect`)
//! - **Transition**: `(Option<Record>, Event) -> Result<(Record, Vec<Effect>)>`
//!
//! The server's interpreter runs the effects and feeds result events back.

pub mod effect;
pub mod event;
pub mod state;
pub mod transition;

pub use effect::*;
pub use event::*;
pub use state::*;
pub use transition::*;
