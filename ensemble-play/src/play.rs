//! The play supervisor.
//!
//! A play runs a cohort of actors as a single unit. Starting wires each
//! actor to the bus in declaration order and spawns one task per actor;
//! the cohort then lives until any actor fails (fail-fast: every other
//! task is cancelled at its next suspension point) or until `stop` is
//! called. Stopping cancels the shared token, joins the tasks in reverse
//! acquisition order under an optional bound, releases every stream scope,
//! and surfaces collected handler errors as one aggregate.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use ensemble_core::actor::{Actor, ActorInfo, Drain, DrainOutcome};
use ensemble_core::bus::EventBus;

use crate::error::{ActorError, PlayError};
use crate::instrument::{DefaultInstrumentation, PlayInstrumentation};

/// Lifecycle states of a [`Play`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    New,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

/// A cohort of actors with coordinated lifecycle.
///
/// Inert until started; started once; stops once; not restartable. With a
/// cohort `queue`, subscribers and responders join that queue group, so
/// each event is handled by one cohort member; consumers carry their own
/// queue and ignore the option.
pub struct Play {
    bus: EventBus,
    actors: Vec<Actor>,
    queue: Option<String>,
    instrumentation: Arc<dyn PlayInstrumentation>,
    auto_connect: bool,
    state: PlayState,
    cancel: CancellationToken,
    running: Vec<RunningActor>,
}

impl Play {
    pub fn new(bus: EventBus, actors: Vec<Actor>) -> Self {
        Self {
            bus,
            actors,
            queue: None,
            instrumentation: Arc::new(DefaultInstrumentation),
            auto_connect: false,
            state: PlayState::New,
            cancel: CancellationToken::new(),
            running: Vec::new(),
        }
    }

    /// Default queue-group name for cohort members.
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Replace the default no-op instrumentation.
    pub fn with_instrumentation(mut self, instrumentation: Arc<dyn PlayInstrumentation>) -> Self {
        self.instrumentation = instrumentation;
        self
    }

    /// Also connect the bus on start and close it after teardown.
    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    pub fn state(&self) -> PlayState {
        self.state
    }

    /// Return `true` once the play has been started.
    pub fn started(&self) -> bool {
        self.state != PlayState::New
    }

    /// Return `true` once every actor task has finished.
    pub fn done(&self) -> bool {
        !self.running.is_empty() && self.running.iter().all(RunningActor::is_finished)
    }

    /// Append actors; only allowed before `start`.
    pub fn extend(
        &mut self,
        actors: impl IntoIterator<Item = Actor>,
    ) -> Result<(), PlayError> {
        if self.started() {
            return Err(PlayError::AlreadyStarted);
        }
        self.actors.extend(actors);
        Ok(())
    }

    /// Cancel every actor task without waiting; `stop` still joins them.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wire every actor to the bus and spawn its task.
    ///
    /// Idempotent once past `New`. With `auto_connect`, the bus is
    /// connected before any actor is wired.
    pub async fn start(&mut self) -> Result<(), PlayError> {
        if self.state != PlayState::New {
            return Ok(());
        }
        self.state = PlayState::Starting;
        self.instrumentation.play_starting();
        if self.auto_connect {
            if let Err(err) = self.bus.connect().await {
                self.state = PlayState::Failed;
                return Err(PlayError::Bus(err));
            }
        }
        for actor in &self.actors {
            self.instrumentation.actor_starting(actor.info());
            let drain = match actor.attach(&self.bus, self.queue.as_deref()).await {
                Ok(drain) => drain,
                Err(err) => {
                    self.cancel.cancel();
                    self.state = PlayState::Failed;
                    return Err(PlayError::Bus(err));
                }
            };
            let info = actor.info().clone();
            let handle = tokio::spawn(run_actor(
                drain,
                info.clone(),
                self.cancel.clone(),
                self.instrumentation.clone(),
            ));
            self.running.push(RunningActor {
                info,
                slot: TaskSlot::Running(handle),
            });
            self.instrumentation.actor_started(actor.info());
        }
        self.state = PlayState::Running;
        self.instrumentation.play_started();
        Ok(())
    }

    /// Wait until every actor task has finished, or until `timeout`.
    pub async fn wait(&mut self, timeout: Option<Duration>) {
        let deadline = timeout.map(|limit| Instant::now() + limit);
        for actor in self.running.iter_mut() {
            actor.join(deadline).await;
        }
    }

    /// Stop the cohort.
    ///
    /// Cancels every actor task, joins them in reverse acquisition order
    /// under the optional bound (scopes release as tasks drop their
    /// streams), and raises the collected handler errors as an aggregate.
    /// A task that outlives the bound is aborted.
    pub async fn stop(&mut self, timeout: Option<Duration>) -> Result<(), PlayError> {
        match self.state {
            PlayState::New | PlayState::Stopping | PlayState::Stopped | PlayState::Failed => {
                return Ok(());
            }
            PlayState::Starting | PlayState::Running => {}
        }
        self.state = PlayState::Stopping;
        self.instrumentation.play_stopping();
        self.cancel.cancel();
        let deadline = timeout.map(|limit| Instant::now() + limit);
        for actor in self.running.iter_mut().rev() {
            if !actor.join(deadline).await {
                warn!(actor = %actor.info, "actor did not stop in time, aborting");
                actor.abort();
                actor.join(None).await;
            }
        }
        let errors: Vec<ActorError> = self
            .running
            .iter_mut()
            .filter_map(RunningActor::take_error)
            .collect();
        let close_result = if self.auto_connect {
            self.bus.close().await
        } else {
            Ok(())
        };
        if errors.is_empty() {
            match close_result {
                Ok(()) => {
                    self.state = PlayState::Stopped;
                    self.instrumentation.play_stopped();
                    Ok(())
                }
                Err(err) => {
                    self.state = PlayState::Failed;
                    Err(PlayError::Bus(err))
                }
            }
        } else {
            if let Err(err) = close_result {
                warn!(error = %err, "closing the bus failed during teardown");
            }
            self.state = PlayState::Failed;
            self.instrumentation.play_failed(&errors);
            Err(PlayError::Cohort(errors))
        }
    }
}

impl std::fmt::Debug for Play {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Play")
            .field("state", &self.state)
            .field("actors", &self.actors.len())
            .field("queue", &self.queue)
            .finish()
    }
}

enum TaskSlot {
    Running(JoinHandle<Option<ActorError>>),
    Finished(Option<ActorError>),
}

struct RunningActor {
    info: ActorInfo,
    slot: TaskSlot,
}

impl RunningActor {
    fn is_finished(&self) -> bool {
        match &self.slot {
            TaskSlot::Running(handle) => handle.is_finished(),
            TaskSlot::Finished(_) => true,
        }
    }

    fn abort(&self) {
        if let TaskSlot::Running(handle) = &self.slot {
            handle.abort();
        }
    }

    /// Join the task, recording its outcome. Returns `false` when the
    /// deadline expired first.
    async fn join(&mut self, deadline: Option<Instant>) -> bool {
        let TaskSlot::Running(handle) = &mut self.slot else {
            return true;
        };
        let result = match deadline {
            Some(at) => match tokio::time::timeout_at(at, &mut *handle).await {
                Ok(result) => result,
                Err(_) => return false,
            },
            None => handle.await,
        };
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(join_err) if join_err.is_cancelled() => None,
            Err(join_err) => Some(ActorError {
                actor: self.info.name.clone(),
                source: Box::new(join_err),
            }),
        };
        self.slot = TaskSlot::Finished(outcome);
        true
    }

    fn take_error(&mut self) -> Option<ActorError> {
        match &mut self.slot {
            TaskSlot::Finished(outcome) => outcome.take(),
            TaskSlot::Running(_) => None,
        }
    }
}

/// Drain one actor's stream until the scope closes, the cohort is
/// cancelled, or the handler fails. A handler failure cancels the cohort
/// and exits with the error; cancellation is not a failure.
async fn run_actor(
    mut drain: Box<dyn Drain>,
    info: ActorInfo,
    cancel: CancellationToken,
    instrumentation: Arc<dyn PlayInstrumentation>,
) -> Option<ActorError> {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                instrumentation.actor_cancelled(&info);
                return None;
            }
            outcome = drain.step() => match outcome {
                None => return None,
                Some(DrainOutcome::Processed { subject }) => {
                    instrumentation.event_processed(&info, &subject);
                }
                Some(DrainOutcome::Failed { subject, error }) => {
                    instrumentation.event_processing_failed(&info, &subject, error.as_ref());
                    cancel.cancel();
                    return Some(ActorError {
                        actor: info.name.clone(),
                        source: error,
                    });
                }
            }
        }
    }
}
