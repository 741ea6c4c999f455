//! Supervisor for the Ensemble messaging runtime.
//!
//! A [`Play`] owns a cohort of actors and runs them as one unit: actors
//! are wired to the bus in declaration order on start, each drains its
//! stream through its handler sequentially, any handler failure brings
//! the cohort down fail-fast, and stopping releases every acquired scope
//! and surfaces the aggregate of collected errors. Lifecycle transitions
//! are observable through [`PlayInstrumentation`].

mod error;
mod instrument;
mod play;
mod waiter;

pub use error::{ActorError, PlayError};
pub use instrument::{DefaultInstrumentation, PlayInstrumentation, TracingInstrumentation};
pub use play::{Play, PlayState};
pub use waiter::Waiter;
