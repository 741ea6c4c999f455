//! Actors: one event source paired with one handler.
//!
//! A [`Subscriber`](ActorKind::Subscriber) handles messages, a
//! [`Responder`](ActorKind::Responder) answers requests, and a
//! [`Consumer`](ActorKind::Consumer) works jobs from a pull queue. The
//! concrete schema types are erased at construction; a supervisor attaches
//! an actor to a bus and drives the resulting [`Drain`] one envelope at a
//! time, which keeps a single handler invocation in flight per actor.
//!
//! Handlers receive their envelope behind an `Arc` and return a boxed
//! error on failure. A responder's `Ok` value is the reply payload; the
//! runtime sends it exactly once, and sends nothing when the handler
//! fails. Consumer handlers own acknowledgement entirely.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::future::BoxFuture;

use crate::bus::EventBus;
use crate::envelope::{Job, Message, Request};
use crate::error::{BoxError, BusError};
use crate::event::{Event, Schema, Scope, Service};
use crate::queue::EventQueue;

/// The delivery mode an actor is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorKind {
    Subscriber,
    Responder,
    Consumer,
}

impl fmt::Display for ActorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorKind::Subscriber => write!(f, "subscriber"),
            ActorKind::Responder => write!(f, "responder"),
            ActorKind::Consumer => write!(f, "consumer"),
        }
    }
}

/// Identity of an actor, used by instrumentation.
#[derive(Debug, Clone)]
pub struct ActorInfo {
    /// The name of the event (or queue) the actor is bound to.
    pub name: String,
    pub kind: ActorKind,
}

impl fmt::Display for ActorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind, self.name)
    }
}

/// Outcome of processing one delivered envelope.
pub enum DrainOutcome {
    Processed { subject: String },
    Failed { subject: String, error: BoxError },
}

/// An attached actor: a stream scope plus the handler draining it.
///
/// `step` receives the next envelope and runs the handler to completion,
/// returning `None` once the stream scope is closed.
#[async_trait]
pub trait Drain: Send {
    async fn step(&mut self) -> Option<DrainOutcome>;
}

#[async_trait]
trait Wiring: Send + Sync {
    async fn attach(
        &self,
        bus: &EventBus,
        queue: Option<&str>,
    ) -> Result<Box<dyn Drain>, BusError>;
}

/// A handler bound to one event spec or one queue.
pub struct Actor {
    info: ActorInfo,
    wiring: Box<dyn Wiring>,
}

impl Actor {
    /// Bind a message handler to an event.
    pub fn subscriber<S, T, M, F, Fut>(event: Event<S, T, M>, handler: F) -> Self
    where
        S: Scope,
        T: Schema,
        M: Schema,
        F: Fn(Arc<Message<S, T, M>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let info = ActorInfo {
            name: event.name().to_string(),
            kind: ActorKind::Subscriber,
        };
        let handler: MessageHandler<S, T, M> = Arc::new(move |msg| Box::pin(handler(msg)));
        Self {
            info,
            wiring: Box::new(SubscriberWiring { event, handler }),
        }
    }

    /// Bind a request handler to a service; the handler's `Ok` value is
    /// sent back as the reply.
    pub fn responder<S, T, R, M, F, Fut>(event: Service<S, T, R, M>, handler: F) -> Self
    where
        S: Scope,
        T: Schema,
        R: Schema,
        M: Schema,
        F: Fn(Arc<Request<S, T, R, M>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
    {
        let info = ActorInfo {
            name: event.name().to_string(),
            kind: ActorKind::Responder,
        };
        let handler: RequestHandler<S, T, R, M> = Arc::new(move |req| Box::pin(handler(req)));
        Self {
            info,
            wiring: Box::new(ResponderWiring { event, handler }),
        }
    }

    /// Bind a job handler to a pull queue.
    pub fn consumer<S, T, M, F, Fut>(queue: EventQueue<S, T, M>, handler: F) -> Self
    where
        S: Scope,
        T: Schema,
        M: Schema,
        F: Fn(Arc<Job<S, T, M>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let info = ActorInfo {
            name: queue.name().to_string(),
            kind: ActorKind::Consumer,
        };
        let handler: JobHandler<S, T, M> = Arc::new(move |job| Box::pin(handler(job)));
        Self {
            info,
            wiring: Box::new(ConsumerWiring { queue, handler }),
        }
    }

    pub fn info(&self) -> &ActorInfo {
        &self.info
    }

    /// Acquire this actor's stream scope on the bus.
    ///
    /// Subscribers and responders join `queue` as their queue group when
    /// one is given; consumers carry their queue in the descriptor and
    /// ignore the argument.
    pub async fn attach(
        &self,
        bus: &EventBus,
        queue: Option<&str>,
    ) -> Result<Box<dyn Drain>, BusError> {
        let queue = match self.info.kind {
            ActorKind::Consumer => None,
            _ => queue,
        };
        self.wiring.attach(bus, queue).await
    }
}

impl fmt::Debug for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor")
            .field("name", &self.info.name)
            .field("kind", &self.info.kind)
            .finish()
    }
}

type MessageHandler<S, T, M> =
    Arc<dyn Fn(Arc<Message<S, T, M>>) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;
type RequestHandler<S, T, R, M> =
    Arc<dyn Fn(Arc<Request<S, T, R, M>>) -> BoxFuture<'static, Result<R, BoxError>> + Send + Sync>;
type JobHandler<S, T, M> =
    Arc<dyn Fn(Arc<Job<S, T, M>>) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

struct SubscriberWiring<S, T, M> {
    event: Event<S, T, M>,
    handler: MessageHandler<S, T, M>,
}

#[async_trait]
impl<S: Scope, T: Schema, M: Schema> Wiring for SubscriberWiring<S, T, M> {
    async fn attach(
        &self,
        bus: &EventBus,
        queue: Option<&str>,
    ) -> Result<Box<dyn Drain>, BusError> {
        let sub = bus.subscribe(&self.event, queue).await?;
        Ok(Box::new(SubscriberDrain {
            sub,
            handler: self.handler.clone(),
        }))
    }
}

struct SubscriberDrain<S, T, M> {
    sub: crate::bus::Subscription<S, T, M>,
    handler: MessageHandler<S, T, M>,
}

#[async_trait]
impl<S: Scope, T: Schema, M: Schema> Drain for SubscriberDrain<S, T, M> {
    async fn step(&mut self) -> Option<DrainOutcome> {
        let msg = self.sub.next().await?;
        let subject = msg.subject().to_string();
        match (self.handler)(Arc::new(msg)).await {
            Ok(()) => Some(DrainOutcome::Processed { subject }),
            Err(error) => Some(DrainOutcome::Failed { subject, error }),
        }
    }
}

struct ResponderWiring<S, T, R, M> {
    event: Service<S, T, R, M>,
    handler: RequestHandler<S, T, R, M>,
}

#[async_trait]
impl<S: Scope, T: Schema, R: Schema, M: Schema> Wiring for ResponderWiring<S, T, R, M> {
    async fn attach(
        &self,
        bus: &EventBus,
        queue: Option<&str>,
    ) -> Result<Box<dyn Drain>, BusError> {
        let requests = bus.serve(&self.event, queue).await?;
        Ok(Box::new(ResponderDrain {
            requests,
            handler: self.handler.clone(),
        }))
    }
}

struct ResponderDrain<S, T, R, M> {
    requests: crate::bus::Requests<S, T, R, M>,
    handler: RequestHandler<S, T, R, M>,
}

#[async_trait]
impl<S: Scope, T: Schema, R: Schema, M: Schema> Drain for ResponderDrain<S, T, R, M> {
    async fn step(&mut self) -> Option<DrainOutcome> {
        let request = Arc::new(self.requests.next().await?);
        let subject = request.subject().to_string();
        match (self.handler)(request.clone()).await {
            Ok(reply) => match request.reply(&reply).await {
                Ok(()) => Some(DrainOutcome::Processed { subject }),
                Err(error) => Some(DrainOutcome::Failed {
                    subject,
                    error: Box::new(error),
                }),
            },
            // A failed handler sends no reply; the requester observes a
            // timeout.
            Err(error) => Some(DrainOutcome::Failed { subject, error }),
        }
    }
}

struct ConsumerWiring<S, T, M> {
    queue: EventQueue<S, T, M>,
    handler: JobHandler<S, T, M>,
}

#[async_trait]
impl<S: Scope, T: Schema, M: Schema> Wiring for ConsumerWiring<S, T, M> {
    async fn attach(
        &self,
        bus: &EventBus,
        _queue: Option<&str>,
    ) -> Result<Box<dyn Drain>, BusError> {
        let jobs = bus.pull(&self.queue).await?;
        Ok(Box::new(ConsumerDrain {
            jobs,
            handler: self.handler.clone(),
        }))
    }
}

struct ConsumerDrain<S, T, M> {
    jobs: crate::bus::Jobs<S, T, M>,
    handler: JobHandler<S, T, M>,
}

#[async_trait]
impl<S: Scope, T: Schema, M: Schema> Drain for ConsumerDrain<S, T, M> {
    async fn step(&mut self) -> Option<DrainOutcome> {
        let job = self.jobs.next().await?;
        let subject = job.subject().to_string();
        match (self.handler)(Arc::new(job)).await {
            Ok(()) => Some(DrainOutcome::Processed { subject }),
            Err(error) => Some(DrainOutcome::Failed { subject, error }),
        }
    }
}
