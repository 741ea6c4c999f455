//! The transport seam.
//!
//! Transports implement [`BusDriver`] over dynamically-typed envelopes;
//! the typed API in [`bus`](crate::bus) wraps a driver and restores typing
//! at the handler edge. Two drivers ship in sibling crates: the in-process
//! one and the NATS one.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::future::BoxFuture;
use futures_core::stream::BoxStream;

use crate::error::BusError;
use crate::queue::QueueDescriptor;

/// A delivered message before decoding.
#[derive(Clone)]
pub struct RawMessage {
    /// The concrete subject the message was received on.
    pub subject: String,
    /// Transport headers, a string-keyed, string-valued map.
    pub headers: HashMap<String, String>,
    /// The payload bytes.
    pub payload: Bytes,
    /// Subject to publish a reply on, when the publisher expects one.
    pub reply: Option<String>,
    /// Acknowledgement hooks, present on pull deliveries.
    pub hooks: Option<std::sync::Arc<dyn JobHooks>>,
}

impl RawMessage {
    pub fn new(subject: impl Into<String>, payload: Bytes) -> Self {
        Self {
            subject: subject.into(),
            headers: HashMap::new(),
            payload,
            reply: None,
            hooks: None,
        }
    }
}

impl std::fmt::Debug for RawMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawMessage")
            .field("subject", &self.subject)
            .field("payload_len", &self.payload.len())
            .field("reply", &self.reply)
            .finish()
    }
}

/// Acknowledgement operations of a pull delivery.
#[async_trait]
pub trait JobHooks: Send + Sync {
    /// Acknowledge the message; it will not be redelivered.
    async fn ack(&self) -> Result<(), BusError>;
    /// Reject the message; it is redelivered after `delay` (immediately
    /// when none is given).
    async fn nack(&self, delay: Option<Duration>) -> Result<(), BusError>;
    /// Terminate the message; it is dropped and never redelivered.
    async fn term(&self) -> Result<(), BusError>;
}

type Closer = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), BusError>> + Send>;

/// A scoped stream of raw messages.
///
/// The transport releases the underlying resources when the subscription
/// is dropped; [`close`](RawSubscription::close) releases them
/// deterministically.
pub struct RawSubscription {
    stream: BoxStream<'static, RawMessage>,
    closer: Option<Closer>,
}

impl std::fmt::Debug for RawSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawSubscription")
            .field("closer", &self.closer.is_some())
            .finish()
    }
}

impl RawSubscription {
    pub fn new(stream: BoxStream<'static, RawMessage>) -> Self {
        Self {
            stream,
            closer: None,
        }
    }

    pub fn with_closer(stream: BoxStream<'static, RawMessage>, closer: Closer) -> Self {
        Self {
            stream,
            closer: Some(closer),
        }
    }

    /// The next delivered message, or `None` once the scope is closed.
    pub async fn next(&mut self) -> Option<RawMessage> {
        futures_util::StreamExt::next(&mut self.stream).await
    }

    /// Release the subscription explicitly.
    pub async fn close(mut self) -> Result<(), BusError> {
        match self.closer.take() {
            Some(closer) => closer().await,
            None => Ok(()),
        }
    }
}

/// Raw transport operations, implemented per backing.
#[async_trait]
pub trait BusDriver: Send + Sync {
    /// Establish the transport connection. In-process transports no-op.
    async fn connect(&self) -> Result<(), BusError>;

    /// Drain and close the transport connection.
    async fn close(&self) -> Result<(), BusError>;

    /// Publish a message, flushing when `flush_timeout` is given.
    async fn publish(
        &self,
        subject: &str,
        headers: &HashMap<String, String>,
        payload: Bytes,
        flush_timeout: Option<Duration>,
    ) -> Result<(), BusError>;

    /// Publish a request and wait for its single reply.
    async fn request(
        &self,
        subject: &str,
        headers: &HashMap<String, String>,
        payload: Bytes,
        timeout: Option<Duration>,
    ) -> Result<RawMessage, BusError>;

    /// Open a subscription on a filter, optionally inside a queue group.
    async fn subscribe(
        &self,
        filter: &str,
        queue_group: Option<&str>,
    ) -> Result<RawSubscription, BusError>;

    /// Open a pull subscription on a declared queue. Delivered messages
    /// carry acknowledgement hooks.
    async fn pull(&self, queue: &QueueDescriptor) -> Result<RawSubscription, BusError>;
}
