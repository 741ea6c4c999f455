//! The typed event bus.
//!
//! [`EventBus`] wraps a transport driver and a codec and exposes the five
//! bus operations over typed event specs: publish, request, subscribe,
//! serve, and pull. Producers publish into the bus; subscribers iterate
//! scoped streams out of it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::codec::{headers_from_metadata, Codec, JsonCodec};
use crate::driver::{BusDriver, JobHooks, RawSubscription};
use crate::envelope::{Job, Message, Request};
use crate::error::BusError;
use crate::event::{Event, EventSpec, Schema, Scope, Service};
use crate::queue::EventQueue;

/// A typed bus over a transport driver.
///
/// Cheap to clone; clones share the driver connection and codec.
#[derive(Clone)]
pub struct EventBus {
    driver: Arc<dyn BusDriver>,
    codec: Arc<dyn Codec>,
}

impl EventBus {
    /// Wrap a driver with the default JSON codec.
    pub fn new(driver: Arc<dyn BusDriver>) -> Self {
        Self::with_codec(driver, Arc::new(JsonCodec))
    }

    /// Wrap a driver with a custom codec.
    pub fn with_codec(driver: Arc<dyn BusDriver>, codec: Arc<dyn Codec>) -> Self {
        Self { driver, codec }
    }

    /// Establish the transport connection.
    pub async fn connect(&self) -> Result<(), BusError> {
        self.driver.connect().await
    }

    /// Drain and close the transport connection.
    pub async fn close(&self) -> Result<(), BusError> {
        self.driver.close().await
    }

    /// Publish a fully-specified event instance.
    ///
    /// Completes when the transport has accepted the message; a `timeout`
    /// additionally bounds a flush.
    pub async fn publish<S: Scope, T: Schema, M: Schema, R: Schema>(
        &self,
        event: &EventSpec<S, T, M, R>,
        scope: &S,
        payload: &T,
        metadata: &M,
        timeout: Option<Duration>,
    ) -> Result<(), BusError> {
        let subject = event.get_subject(scope)?;
        let headers = headers_from_metadata(metadata)?;
        let payload = self.codec.encode(payload)?;
        self.driver
            .publish(&subject, &headers, payload, timeout)
            .await
    }

    /// Publish a request and wait for its decoded reply.
    ///
    /// `timeout` bounds the total round trip; without one the wait is
    /// unbounded on the in-process transport, while wire transports apply
    /// their configured default.
    pub async fn request<S: Scope, T: Schema, R: Schema, M: Schema>(
        &self,
        event: &Service<S, T, R, M>,
        scope: &S,
        payload: &T,
        metadata: &M,
        timeout: Option<Duration>,
    ) -> Result<R, BusError> {
        let subject = event.get_subject(scope)?;
        let headers = headers_from_metadata(metadata)?;
        let payload = self.codec.encode(payload)?;
        let reply = self
            .driver
            .request(&subject, &headers, payload, timeout)
            .await?;
        self.codec
            .decode(&reply.payload)
            .map_err(BusError::Codec)
    }

    /// Open a scoped stream of messages matching the event's filter.
    ///
    /// With a `queue` group name, each matching message is delivered to
    /// exactly one member of the group; without one, every subscriber
    /// receives its own copy.
    pub async fn subscribe<S: Scope, T: Schema, M: Schema>(
        &self,
        event: &Event<S, T, M>,
        queue: Option<&str>,
    ) -> Result<Subscription<S, T, M>, BusError> {
        let raw = self
            .driver
            .subscribe(event.filter_subject(), queue)
            .await?;
        Ok(Subscription {
            raw,
            spec: event.clone(),
            codec: self.codec.clone(),
        })
    }

    /// Open a scoped stream of requests to answer.
    pub async fn serve<S: Scope, T: Schema, R: Schema, M: Schema>(
        &self,
        event: &Service<S, T, R, M>,
        queue: Option<&str>,
    ) -> Result<Requests<S, T, R, M>, BusError> {
        let raw = self
            .driver
            .subscribe(event.filter_subject(), queue)
            .await?;
        Ok(Requests {
            raw,
            spec: event.clone(),
            codec: self.codec.clone(),
            driver: self.driver.clone(),
        })
    }

    /// Open a scoped stream of jobs from a declared queue.
    pub async fn pull<S: Scope, T: Schema, M: Schema>(
        &self,
        queue: &EventQueue<S, T, M>,
    ) -> Result<Jobs<S, T, M>, BusError> {
        if queue.filters().is_empty() {
            return Err(BusError::Unsupported("queue without filter events"));
        }
        let raw = self.driver.pull(&queue.descriptor()).await?;
        Ok(Jobs {
            raw,
            filters: queue.filters().to_vec(),
            codec: self.codec.clone(),
        })
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

/// A scoped stream of [`Message`]s.
pub struct Subscription<S, T, M = ()> {
    raw: RawSubscription,
    spec: Event<S, T, M>,
    codec: Arc<dyn Codec>,
}

impl<S: Scope, T: Schema, M: Schema> Subscription<S, T, M> {
    /// The filter this subscription was opened on.
    pub fn filter(&self) -> &str {
        self.spec.filter_subject()
    }

    /// The next delivered message, or `None` once the scope is closed.
    pub async fn next(&mut self) -> Option<Message<S, T, M>> {
        let raw = self.raw.next().await?;
        Some(Message::from_raw(&raw, self.spec.clone(), self.codec.clone()))
    }

    /// Release the subscription deterministically.
    pub async fn unsubscribe(self) -> Result<(), BusError> {
        self.raw.close().await
    }
}

/// A scoped stream of [`Request`]s.
pub struct Requests<S, T, R, M = ()> {
    raw: RawSubscription,
    spec: Service<S, T, R, M>,
    codec: Arc<dyn Codec>,
    driver: Arc<dyn BusDriver>,
}

impl<S: Scope, T: Schema, R: Schema, M: Schema> Requests<S, T, R, M> {
    pub fn filter(&self) -> &str {
        self.spec.filter_subject()
    }

    pub async fn next(&mut self) -> Option<Request<S, T, R, M>> {
        let raw = self.raw.next().await?;
        Some(Request::from_raw(
            &raw,
            self.spec.clone(),
            self.codec.clone(),
            self.driver.clone(),
        ))
    }

    pub async fn unsubscribe(self) -> Result<(), BusError> {
        self.raw.close().await
    }
}

/// A scoped stream of [`Job`]s.
pub struct Jobs<S, T, M = ()> {
    raw: RawSubscription,
    filters: Vec<Event<S, T, M>>,
    codec: Arc<dyn Codec>,
}

impl<S: Scope, T: Schema, M: Schema> Jobs<S, T, M> {
    pub async fn next(&mut self) -> Option<Job<S, T, M>> {
        let raw = self.raw.next().await?;
        let spec = self
            .filters
            .iter()
            .find(|event| event.match_subject(&raw.subject).unwrap_or(false))
            .unwrap_or(&self.filters[0])
            .clone();
        let hooks = raw
            .hooks
            .clone()
            .unwrap_or_else(|| Arc::new(DetachedHooks));
        Some(Job::from_raw(&raw, spec, self.codec.clone(), hooks))
    }

    pub async fn unsubscribe(self) -> Result<(), BusError> {
        self.raw.close().await
    }
}

/// Hooks of a message that did not come from a pull delivery.
struct DetachedHooks;

#[async_trait]
impl JobHooks for DetachedHooks {
    async fn ack(&self) -> Result<(), BusError> {
        Err(BusError::Unsupported("not a pull delivery"))
    }

    async fn nack(&self, _delay: Option<Duration>) -> Result<(), BusError> {
        Err(BusError::Unsupported("not a pull delivery"))
    }

    async fn term(&self) -> Result<(), BusError> {
        Err(BusError::Unsupported("not a pull delivery"))
    }
}
