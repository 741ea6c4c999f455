//! In-process transport for the Ensemble messaging runtime.
//!
//! The driver keeps a list of subscription records, each a bounded inbox
//! behind a filter and an optional queue-group name. Publishing walks the
//! records: every matching non-grouped record gets a copy; within a queue
//! group the first record whose inbox accepts the message wins and the
//! rest of the group is skipped. A full inbox drops that delivery — the
//! group is not marked satisfied, so another member may still take it.
//! Dropped deliveries are logged and counted, never fatal.
//!
//! Requests publish with a transient reply subject and wait for exactly
//! one message on it. Pull queues are backed by an in-process stream
//! engine with at-least-once delivery (see [`queue`]).

mod queue;

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;
use uuid::Uuid;

use ensemble_core::driver::{BusDriver, RawMessage, RawSubscription};
use ensemble_core::error::{BusError, SubjectError};
use ensemble_core::queue::QueueDescriptor;
use ensemble_core::subject::filter_match;
use ensemble_core::syntax::FilterSyntax;

use queue::StreamHandle;

/// Default capacity of a subscription inbox.
pub const DEFAULT_INBOX_CAPACITY: usize = 1024;

/// Prefix of the transient subjects generated for request replies.
const REPLY_PREFIX: &str = "_REPLY";

/// In-process event bus driver.
pub struct MemoryBus {
    state: Arc<Mutex<BusState>>,
    syntax: FilterSyntax,
    capacity: usize,
    dropped: AtomicU64,
}

struct BusState {
    next_id: u64,
    records: Vec<SubRecord>,
    streams: HashMap<String, StreamHandle>,
}

struct SubRecord {
    id: u64,
    filter: String,
    queue: Option<String>,
    tx: mpsc::Sender<RawMessage>,
}

impl MemoryBus {
    /// Create a driver with the default inbox capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_INBOX_CAPACITY)
    }

    /// Create a driver with a custom inbox capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState {
                next_id: 0,
                records: Vec::new(),
                streams: HashMap::new(),
            })),
            syntax: FilterSyntax::default(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Use a custom filter syntax. The syntax is fixed per bus instance.
    pub fn with_syntax(mut self, syntax: FilterSyntax) -> Self {
        self.syntax = syntax;
        self
    }

    /// Number of deliveries dropped because an inbox was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Walk subscription records and stream buffers with one message.
    fn deliver(&self, msg: &RawMessage) {
        let state = self.lock();
        let mut satisfied: HashSet<&str> = HashSet::new();
        let mut starved_groups: HashSet<&str> = HashSet::new();
        for record in &state.records {
            if let Some(group) = &record.queue {
                if satisfied.contains(group.as_str()) {
                    continue;
                }
            }
            let matched =
                filter_match(&record.filter, &msg.subject, &self.syntax).unwrap_or(false);
            if !matched {
                continue;
            }
            match record.tx.try_send(msg.clone()) {
                Ok(()) => {
                    if let Some(group) = &record.queue {
                        satisfied.insert(group.as_str());
                        starved_groups.remove(group.as_str());
                    }
                }
                Err(mpsc::error::TrySendError::Full(_)) => match &record.queue {
                    // The group stays eligible; another member may still
                    // take the message.
                    Some(group) => {
                        starved_groups.insert(group.as_str());
                    }
                    None => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            subject = %msg.subject,
                            filter = %record.filter,
                            "inbox full, delivery dropped"
                        );
                    }
                },
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        for group in starved_groups {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                subject = %msg.subject,
                group,
                "every inbox of the group is full, delivery dropped"
            );
        }
        for handle in state.streams.values() {
            let retained = handle
                .subjects()
                .iter()
                .any(|filter| filter_match(filter, &msg.subject, &self.syntax).unwrap_or(false));
            if retained {
                handle.append(msg.clone());
            }
        }
    }

    fn add_record(
        &self,
        filter: &str,
        queue_group: Option<&str>,
    ) -> Result<RawSubscription, BusError> {
        if filter.is_empty() {
            return Err(BusError::Render(SubjectError::EmptyFilter));
        }
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = {
            let mut state = self.lock();
            state.next_id += 1;
            let id = state.next_id;
            state.records.push(SubRecord {
                id,
                filter: filter.to_string(),
                queue: queue_group.map(str::to_string),
                tx,
            });
            id
        };
        let stream = GuardedReceiver {
            rx: ReceiverStream::new(rx),
            _guard: RecordGuard {
                state: self.state.clone(),
                id,
            },
        };
        Ok(RawSubscription::new(Box::pin(stream)))
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusDriver for MemoryBus {
    async fn connect(&self) -> Result<(), BusError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), BusError> {
        Ok(())
    }

    async fn publish(
        &self,
        subject: &str,
        headers: &HashMap<String, String>,
        payload: Bytes,
        _flush_timeout: Option<Duration>,
    ) -> Result<(), BusError> {
        if subject.is_empty() {
            return Err(BusError::Render(SubjectError::EmptySubject));
        }
        let mut msg = RawMessage::new(subject, payload);
        msg.headers = headers.clone();
        self.deliver(&msg);
        Ok(())
    }

    async fn request(
        &self,
        subject: &str,
        headers: &HashMap<String, String>,
        payload: Bytes,
        timeout: Option<Duration>,
    ) -> Result<RawMessage, BusError> {
        let reply_subject = format!("{REPLY_PREFIX}.{}", Uuid::new_v4().simple());
        let mut sub = self.add_record(&reply_subject, None)?;
        let mut msg = RawMessage::new(subject, payload);
        msg.headers = headers.clone();
        msg.reply = Some(reply_subject);
        self.deliver(&msg);
        let reply = match timeout {
            Some(limit) => tokio::time::timeout(limit, sub.next())
                .await
                .map_err(|_| BusError::Timeout)?,
            None => sub.next().await,
        };
        reply.ok_or(BusError::NoReply)
    }

    async fn subscribe(
        &self,
        filter: &str,
        queue_group: Option<&str>,
    ) -> Result<RawSubscription, BusError> {
        self.add_record(filter, queue_group)
    }

    async fn pull(&self, queue: &QueueDescriptor) -> Result<RawSubscription, BusError> {
        let (inner, notify) = {
            let mut state = self.lock();
            let handle = state
                .streams
                .entry(queue.stream_name.clone())
                .or_insert_with(|| StreamHandle::new(queue.stream_subjects.clone()));
            handle.parts()
        };
        queue::register(&inner, queue, self.syntax.clone());
        Ok(queue::subscription(inner, notify, queue.name.clone()))
    }
}

/// Removes the subscription record when the stream is dropped.
struct RecordGuard {
    state: Arc<Mutex<BusState>>,
    id: u64,
}

impl Drop for RecordGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
        state.records.retain(|record| record.id != self.id);
    }
}

struct GuardedReceiver {
    rx: ReceiverStream<RawMessage>,
    _guard: RecordGuard,
}

impl Stream for GuardedReceiver {
    type Item = RawMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}
