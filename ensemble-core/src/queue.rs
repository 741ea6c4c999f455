//! Streams and pull queues.
//!
//! A stream is a named source of retained events. A queue is a stateful
//! view of a stream: it tracks which messages were delivered and
//! acknowledged, redelivers unacknowledged ones, and bounds how many may be
//! outstanding. Queues are declared by the caller and materialized in the
//! transport on first pull.

use std::time::Duration;

use crate::event::{Event, Schema, Scope};

/// The point in the stream a queue starts receiving messages from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueuePolicy {
    /// Deliver every message retained by the stream.
    #[default]
    All,
    /// Deliver starting with the last retained message.
    Last,
    /// Deliver only messages published after the queue was created.
    New,
}

/// A named source of retained events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventStream {
    name: String,
    subjects: Vec<String>,
}

impl EventStream {
    pub fn new(name: impl Into<String>, subjects: Vec<String>) -> Self {
        Self {
            name: name.into(),
            subjects,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subject filters whose matching messages the stream retains.
    pub fn subjects(&self) -> &[String] {
        &self.subjects
    }
}

/// Default duration the transport waits for an ack before redelivering.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(30);

/// Default maximum number of outstanding unacknowledged messages.
pub const DEFAULT_MAX_PENDING: usize = 64;

/// Default idle duration after which the transport may clean the queue up.
pub const DEFAULT_INACTIVE_THRESHOLD: Duration = Duration::from_secs(3600);

/// A typed view of a stream for pull/acknowledge delivery.
///
/// `filters` restricts the queue to a subset of the stream's events and
/// types the jobs it yields; at least one filter event is required.
#[derive(Debug, Clone)]
pub struct EventQueue<S, T, M = ()> {
    name: String,
    stream: EventStream,
    filters: Vec<Event<S, T, M>>,
    max_pending: usize,
    max_wait: Duration,
    inactive_threshold: Duration,
    policy: QueuePolicy,
}

impl<S: Scope, T: Schema, M: Schema> EventQueue<S, T, M> {
    pub fn new(
        name: impl Into<String>,
        stream: EventStream,
        filters: Vec<Event<S, T, M>>,
    ) -> Self {
        Self {
            name: name.into(),
            stream,
            filters,
            max_pending: DEFAULT_MAX_PENDING,
            max_wait: DEFAULT_MAX_WAIT,
            inactive_threshold: DEFAULT_INACTIVE_THRESHOLD,
            policy: QueuePolicy::default(),
        }
    }

    /// Bound the number of outstanding unacknowledged messages; delivery is
    /// suspended once the bound is reached.
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    /// How long the transport waits for an ack before redelivering.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// How long the queue may sit idle before the transport cleans it up.
    pub fn with_inactive_threshold(mut self, inactive_threshold: Duration) -> Self {
        self.inactive_threshold = inactive_threshold;
        self
    }

    pub fn with_policy(mut self, policy: QueuePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stream(&self) -> &EventStream {
        &self.stream
    }

    pub fn filters(&self) -> &[Event<S, T, M>] {
        &self.filters
    }

    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }

    /// The type-erased form handed to transport drivers.
    pub fn descriptor(&self) -> QueueDescriptor {
        QueueDescriptor {
            name: self.name.clone(),
            stream_name: self.stream.name().to_string(),
            stream_subjects: self.stream.subjects().to_vec(),
            filter_subjects: self
                .filters
                .iter()
                .map(|event| event.filter_subject().to_string())
                .collect(),
            max_pending: self.max_pending,
            max_wait: self.max_wait,
            inactive_threshold: self.inactive_threshold,
            policy: self.policy,
        }
    }
}

/// Type-erased queue declaration consumed by transport drivers.
#[derive(Debug, Clone)]
pub struct QueueDescriptor {
    pub name: String,
    pub stream_name: String,
    pub stream_subjects: Vec<String>,
    pub filter_subjects: Vec<String>,
    pub max_pending: usize,
    pub max_wait: Duration,
    pub inactive_threshold: Duration,
    pub policy: QueuePolicy,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventSpec;

    #[test]
    fn test_descriptor_carries_filter_subjects() {
        let event: Event<(), u64> = EventSpec::new("job", "jobs.encode").unwrap();
        let stream = EventStream::new("jobs", vec!["jobs.>".to_string()]);
        let queue = EventQueue::new("encoder", stream, vec![event])
            .with_max_pending(8)
            .with_policy(QueuePolicy::New);
        let descriptor = queue.descriptor();
        assert_eq!(descriptor.stream_name, "jobs");
        assert_eq!(descriptor.filter_subjects, vec!["jobs.encode".to_string()]);
        assert_eq!(descriptor.max_pending, 8);
        assert_eq!(descriptor.policy, QueuePolicy::New);
    }
}
