//! Core of the Ensemble messaging runtime.
//!
//! Events are declared as typed specifications over a subject-addressed
//! namespace; a bus delivers them between producers and handlers in three
//! interaction modes: publish/subscribe, request/reply, and
//! pull-queue/acknowledge. This crate holds the transport-independent
//! pieces — subject syntax, event specs, codecs, envelopes, the bus
//! facade, the transport driver seam, and actor definitions. Concrete
//! transports live in `ensemble-memory` and `ensemble-nats`; the Play
//! supervisor lives in `ensemble-play`.

pub mod actor;
pub mod bus;
pub mod codec;
pub mod driver;
pub mod envelope;
pub mod error;
pub mod event;
pub mod queue;
pub mod subject;
pub mod syntax;

pub use actor::{Actor, ActorInfo, ActorKind, Drain, DrainOutcome};
pub use bus::{EventBus, Jobs, Requests, Subscription};
pub use codec::{Codec, JsonCodec};
pub use driver::{BusDriver, JobHooks, RawMessage, RawSubscription};
pub use envelope::{Job, Message, Request};
pub use error::{BoxError, BusError, CodecError, DecodeError, SubjectError};
pub use event::{
    Event, EventSpec, NoReply, Schema, Scope, Service, StaticEvent, StaticService,
};
pub use queue::{EventQueue, EventStream, QueueDescriptor, QueuePolicy};
pub use subject::filter_match;
pub use syntax::FilterSyntax;
