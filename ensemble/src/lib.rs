//! Ensemble — an event-driven messaging runtime.
//!
//! Typed events are declared over a subject-addressed namespace and
//! delivered between producers and handlers in three interaction modes:
//! publish/subscribe, request/reply, and pull-queue/acknowledge. A
//! [`Play`](ensemble_play::Play) runs a cohort of long-lived handlers as
//! one unit with coordinated startup, cancellation, and fail-fast failure
//! propagation.
//!
//! This facade crate re-exports the sub-crates behind feature flags.
//! Import everything you need with:
//!
//! ```ignore
//! use ensemble::prelude::*;
//! ```
//!
//! # Feature flags
//!
//! | Feature  | Default | Crate             |
//! |----------|---------|-------------------|
//! | `memory` | **yes** | `ensemble-memory` |
//! | `play`   | **yes** | `ensemble-play`   |
//! | `nats`   | no      | `ensemble-nats`   |
//! | `full`   | no      | All of the above  |
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ensemble::prelude::*;
//!
//! let bus = EventBus::new(Arc::new(MemoryBus::new()));
//! let event: StaticEvent<u64> = EventSpec::new("tick", "clock.tick")?;
//!
//! let counter = Actor::subscriber(event.clone(), |msg: Arc<Message<(), u64>>| async move {
//!     println!("tick {}", msg.data()?);
//!     Ok(())
//! });
//!
//! let mut play = Play::new(bus.clone(), vec![counter]);
//! play.start().await?;
//! bus.publish(&event, &(), &1, &(), None).await?;
//! play.stop(None).await?;
//! ```

pub use ensemble_core;

// Re-export everything from the core at the top level for convenience.
pub use ensemble_core::*;

#[cfg(feature = "memory")]
pub use ensemble_memory;

#[cfg(feature = "nats")]
pub use ensemble_nats;

#[cfg(feature = "play")]
pub use ensemble_play;

pub mod prelude {
    //! Re-exports of the most commonly used types.

    pub use ensemble_core::{
        Actor, BoxError, BusError, Codec, Event, EventBus, EventQueue, EventSpec, EventStream,
        FilterSyntax, JsonCodec, NoReply, QueuePolicy, Schema, Scope, Service, StaticEvent,
        StaticService,
    };
    pub use ensemble_core::envelope::{Job, Message, Request};

    #[cfg(feature = "memory")]
    pub use ensemble_memory::MemoryBus;

    #[cfg(feature = "nats")]
    pub use ensemble_nats::{NatsBus, NatsConfig};

    #[cfg(feature = "play")]
    pub use ensemble_play::{
        Play, PlayError, PlayInstrumentation, PlayState, TracingInstrumentation, Waiter,
    };
}
