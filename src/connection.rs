//! Connection state machine
//!
//! Pure transitions over the socket lifecycle. The runtime owns the actual
//! transport and feeds its callbacks back in as events.

pub mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;
pub mod transport;

#[cfg(test)]
mod proptests;

pub use effect::ConnEffect;
pub use event::ConnEvent;
pub use state::{ConnContext, ConnPhase, ConnState, ConnectionState};
pub use transition::{transition, TransitionError, TransitionResult};
