//! Delivered event envelopes.
//!
//! An envelope pairs a raw transport message with the spec it was
//! subscribed under. Scope, payload, and metadata decode lazily on first
//! access; a decoding failure surfaces as a [`DecodeError`] at the access
//! site rather than at delivery.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;

use crate::codec::Codec;
use crate::driver::{BusDriver, JobHooks, RawMessage};
use crate::error::{BusError, DecodeError};
use crate::event::{EventSpec, NoReply, Schema, Scope};

struct EnvelopeParts<S, T, M, R> {
    subject: String,
    headers: HashMap<String, String>,
    payload: Bytes,
    spec: EventSpec<S, T, M, R>,
    codec: Arc<dyn Codec>,
    scope: OnceLock<Result<S, DecodeError>>,
    data: OnceLock<Result<T, DecodeError>>,
    metadata: OnceLock<Result<M, DecodeError>>,
}

impl<S: Scope, T: Schema, M: Schema, R: Schema> EnvelopeParts<S, T, M, R> {
    fn new(raw: &RawMessage, spec: EventSpec<S, T, M, R>, codec: Arc<dyn Codec>) -> Self {
        Self {
            subject: raw.subject.clone(),
            headers: raw.headers.clone(),
            payload: raw.payload.clone(),
            spec,
            codec,
            scope: OnceLock::new(),
            data: OnceLock::new(),
            metadata: OnceLock::new(),
        }
    }

    fn scope(&self) -> Result<&S, DecodeError> {
        self.scope
            .get_or_init(|| self.spec.extract_scope(&self.subject))
            .as_ref()
            .map_err(Clone::clone)
    }

    fn data(&self) -> Result<&T, DecodeError> {
        self.data
            .get_or_init(|| {
                self.codec
                    .decode(&self.payload)
                    .map_err(|err| DecodeError::Payload {
                        reason: err.to_string(),
                    })
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    fn metadata(&self) -> Result<&M, DecodeError> {
        self.metadata
            .get_or_init(|| self.decode_metadata())
            .as_ref()
            .map_err(Clone::clone)
    }

    fn decode_metadata(&self) -> Result<M, DecodeError> {
        let map = self
            .headers
            .iter()
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect();
        match self.codec.parse_obj(Value::Object(map)) {
            Ok(metadata) => Ok(metadata),
            Err(err) => {
                // A spec without a metadata schema sees no headers at all.
                if self.headers.is_empty() {
                    if let Ok(metadata) = self.codec.parse_obj(Value::Null) {
                        return Ok(metadata);
                    }
                }
                Err(DecodeError::Headers {
                    reason: err.to_string(),
                })
            }
        }
    }
}

/// A delivered event without a reply.
pub struct Message<S, T, M = ()> {
    parts: EnvelopeParts<S, T, M, NoReply>,
}

impl<S: Scope, T: Schema, M: Schema> Message<S, T, M> {
    pub(crate) fn from_raw(
        raw: &RawMessage,
        spec: EventSpec<S, T, M, NoReply>,
        codec: Arc<dyn Codec>,
    ) -> Self {
        Self {
            parts: EnvelopeParts::new(raw, spec, codec),
        }
    }

    /// The concrete subject the message was received on.
    pub fn subject(&self) -> &str {
        &self.parts.subject
    }

    /// The typed attributes extracted from the subject.
    pub fn scope(&self) -> Result<&S, DecodeError> {
        self.parts.scope()
    }

    /// The decoded payload.
    pub fn data(&self) -> Result<&T, DecodeError> {
        self.parts.data()
    }

    /// The decoded headers.
    pub fn metadata(&self) -> Result<&M, DecodeError> {
        self.parts.metadata()
    }

    /// The spec the subscription was opened with.
    pub fn spec(&self) -> &EventSpec<S, T, M, NoReply> {
        &self.parts.spec
    }
}

impl<S, T, M> fmt::Debug for Message<S, T, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("subject", &self.parts.subject)
            .finish()
    }
}

/// A delivered event that must be replied to.
pub struct Request<S, T, R, M = ()> {
    parts: EnvelopeParts<S, T, M, R>,
    driver: Arc<dyn BusDriver>,
    reply_to: Option<String>,
    replied: AtomicBool,
}

impl<S: Scope, T: Schema, R: Schema, M: Schema> Request<S, T, R, M> {
    pub(crate) fn from_raw(
        raw: &RawMessage,
        spec: EventSpec<S, T, M, R>,
        codec: Arc<dyn Codec>,
        driver: Arc<dyn BusDriver>,
    ) -> Self {
        Self {
            parts: EnvelopeParts::new(raw, spec, codec),
            driver,
            reply_to: raw.reply.clone(),
            replied: AtomicBool::new(false),
        }
    }

    pub fn subject(&self) -> &str {
        &self.parts.subject
    }

    pub fn scope(&self) -> Result<&S, DecodeError> {
        self.parts.scope()
    }

    pub fn data(&self) -> Result<&T, DecodeError> {
        self.parts.data()
    }

    pub fn metadata(&self) -> Result<&M, DecodeError> {
        self.parts.metadata()
    }

    pub fn spec(&self) -> &EventSpec<S, T, M, R> {
        &self.parts.spec
    }

    /// Publish the reply on the requester's transient reply subject.
    ///
    /// At most one reply may be sent per request; a second call returns
    /// [`BusError::AlreadyReplied`]. A request without a reply subject is
    /// silently ignored.
    pub async fn reply(&self, payload: &R) -> Result<(), BusError> {
        let Some(reply_to) = &self.reply_to else {
            return Ok(());
        };
        if self.replied.swap(true, Ordering::SeqCst) {
            return Err(BusError::AlreadyReplied);
        }
        let bytes = self.parts.codec.encode(payload)?;
        self.driver
            .publish(reply_to, &HashMap::new(), bytes, None)
            .await
    }
}

impl<S, T, R, M> fmt::Debug for Request<S, T, R, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("subject", &self.parts.subject)
            .field("reply_to", &self.reply_to)
            .finish()
    }
}

/// A delivered event that must be acknowledged.
///
/// Acknowledgement is the handler's responsibility; the runtime never acks
/// on its behalf, so handlers decide retry semantics.
pub struct Job<S, T, M = ()> {
    parts: EnvelopeParts<S, T, M, NoReply>,
    hooks: Arc<dyn JobHooks>,
}

impl<S: Scope, T: Schema, M: Schema> Job<S, T, M> {
    pub(crate) fn from_raw(
        raw: &RawMessage,
        spec: EventSpec<S, T, M, NoReply>,
        codec: Arc<dyn Codec>,
        hooks: Arc<dyn JobHooks>,
    ) -> Self {
        Self {
            parts: EnvelopeParts::new(raw, spec, codec),
            hooks,
        }
    }

    pub fn subject(&self) -> &str {
        &self.parts.subject
    }

    pub fn scope(&self) -> Result<&S, DecodeError> {
        self.parts.scope()
    }

    pub fn data(&self) -> Result<&T, DecodeError> {
        self.parts.data()
    }

    pub fn metadata(&self) -> Result<&M, DecodeError> {
        self.parts.metadata()
    }

    pub fn spec(&self) -> &EventSpec<S, T, M, NoReply> {
        &self.parts.spec
    }

    /// Acknowledge the job; it will not be redelivered.
    pub async fn ack(&self) -> Result<(), BusError> {
        self.hooks.ack().await
    }

    /// Reject the job; it is redelivered after `delay`.
    pub async fn nack(&self, delay: Option<Duration>) -> Result<(), BusError> {
        self.hooks.nack(delay).await
    }

    /// Drop the job permanently.
    pub async fn term(&self) -> Result<(), BusError> {
        self.hooks.term().await
    }
}

impl<S, T, M> fmt::Debug for Job<S, T, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("subject", &self.parts.subject)
            .finish()
    }
}
