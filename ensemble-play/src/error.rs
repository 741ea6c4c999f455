//! Supervisor error types.

use std::error::Error;
use std::fmt;

use ensemble_core::error::{BoxError, BusError};

/// A handler error attributed to the actor that raised it.
#[derive(Debug)]
pub struct ActorError {
    /// Name of the event (or queue) the failing actor was bound to.
    pub actor: String,
    pub source: BoxError,
}

impl fmt::Display for ActorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor '{}' failed: {}", self.actor, self.source)
    }
}

impl Error for ActorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Errors surfaced by a [`Play`](crate::Play).
#[derive(Debug)]
pub enum PlayError {
    /// The play was already started; actors can no longer be added.
    AlreadyStarted,
    /// The bus failed while wiring or releasing actors.
    Bus(BusError),
    /// One or more actors failed; fail-fast guarantees at most one error
    /// is the first cause, the rest having been cancelled.
    Cohort(Vec<ActorError>),
}

impl fmt::Display for PlayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayError::AlreadyStarted => {
                write!(f, "Cannot extend play after it is started")
            }
            PlayError::Bus(err) => write!(f, "Bus error: {err}"),
            PlayError::Cohort(errors) => {
                let noun = if errors.len() == 1 { "error" } else { "errors" };
                write!(f, "{} {noun} raised: [", errors.len())?;
                for (idx, err) in errors.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{err}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl Error for PlayError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PlayError::Bus(err) => Some(err),
            PlayError::Cohort(errors) => errors.first().map(|err| err as _),
            PlayError::AlreadyStarted => None,
        }
    }
}
