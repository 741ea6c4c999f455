//! Observable lifecycle hooks of a play.
//!
//! Hooks are called synchronously from within the runtime; implementations
//! must not block. Instrumentation is per-play, passed in as a
//! collaborator, never process-wide.

use std::error::Error;

use tracing::{error, info, warn};

use ensemble_core::actor::ActorInfo;

use crate::error::ActorError;

/// Lifecycle callbacks of a play and its actors. Every method defaults to
/// a no-op, so implementations override only what they observe.
pub trait PlayInstrumentation: Send + Sync {
    fn actor_starting(&self, _actor: &ActorInfo) {}

    fn actor_started(&self, _actor: &ActorInfo) {}

    fn actor_cancelled(&self, _actor: &ActorInfo) {}

    fn event_processing_failed(
        &self,
        _actor: &ActorInfo,
        _subject: &str,
        _error: &(dyn Error + 'static),
    ) {
    }

    fn event_processed(&self, _actor: &ActorInfo, _subject: &str) {}

    fn play_starting(&self) {}

    fn play_started(&self) {}

    fn play_stopping(&self) {}

    fn play_failed(&self, _errors: &[ActorError]) {}

    fn play_stopped(&self) {}
}

/// The default hook object: observes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultInstrumentation;

impl PlayInstrumentation for DefaultInstrumentation {}

/// Instrumentation that logs lifecycle transitions through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingInstrumentation;

impl PlayInstrumentation for TracingInstrumentation {
    fn actor_started(&self, actor: &ActorInfo) {
        info!(actor = %actor, "started actor");
    }

    fn actor_cancelled(&self, actor: &ActorInfo) {
        warn!(actor = %actor, "cancelled actor");
    }

    fn event_processing_failed(
        &self,
        actor: &ActorInfo,
        subject: &str,
        error: &(dyn Error + 'static),
    ) {
        error!(actor = %actor, subject, error = %error, "actor failed to process event");
    }

    fn event_processed(&self, actor: &ActorInfo, subject: &str) {
        info!(actor = %actor, subject, "processed event");
    }

    fn play_starting(&self) {
        info!("starting all actors");
    }

    fn play_started(&self) {
        info!("started all actors");
    }

    fn play_stopping(&self) {
        warn!("stopping all actors");
    }

    fn play_failed(&self, errors: &[ActorError]) {
        error!(count = errors.len(), "stopped all actors due to errors");
    }

    fn play_stopped(&self) {
        warn!("stopped all actors");
    }
}
