//! In-process stream and pull-queue engine.
//!
//! A stream retains every published message matching its subjects from the
//! moment it is materialized. A queue is a stateful view over one stream:
//! it walks the retained messages with a cursor positioned by the delivery
//! policy, keeps at most `max_pending` deliveries outstanding, redelivers
//! unacknowledged messages after `max_wait`, and honors `nack(delay)` and
//! `term`. Several pullers of one queue share its state, so each message
//! is worked by exactly one of them.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;

use ensemble_core::driver::{JobHooks, RawMessage, RawSubscription};
use ensemble_core::error::BusError;
use ensemble_core::queue::{QueueDescriptor, QueuePolicy};
use ensemble_core::subject::filter_match;
use ensemble_core::syntax::FilterSyntax;

/// One materialized stream: retained messages plus its queues.
pub(crate) struct StreamHandle {
    subjects: Vec<String>,
    inner: Arc<Mutex<StreamInner>>,
    notify: Arc<Notify>,
}

pub(crate) struct StreamInner {
    messages: Vec<RawMessage>,
    queues: HashMap<String, QueueState>,
}

impl StreamHandle {
    pub(crate) fn new(subjects: Vec<String>) -> Self {
        Self {
            subjects,
            inner: Arc::new(Mutex::new(StreamInner {
                messages: Vec::new(),
                queues: HashMap::new(),
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    pub(crate) fn subjects(&self) -> &[String] {
        &self.subjects
    }

    /// Retain one message and wake waiting pullers.
    pub(crate) fn append(&self, msg: RawMessage) {
        lock(&self.inner).messages.push(msg);
        self.notify.notify_waiters();
    }

    pub(crate) fn parts(&self) -> (Arc<Mutex<StreamInner>>, Arc<Notify>) {
        (self.inner.clone(), self.notify.clone())
    }
}

struct QueueState {
    cursor: usize,
    pending: HashMap<usize, Instant>,
    filters: Vec<String>,
    syntax: FilterSyntax,
    max_pending: usize,
    max_wait: Duration,
}

impl QueueState {
    fn new(queue: &QueueDescriptor, retained: usize, syntax: FilterSyntax) -> Self {
        let cursor = match queue.policy {
            QueuePolicy::All => 0,
            QueuePolicy::New => retained,
            QueuePolicy::Last => retained.saturating_sub(1),
        };
        let max_pending = if queue.max_pending == 0 {
            usize::MAX
        } else {
            queue.max_pending
        };
        Self {
            cursor,
            pending: HashMap::new(),
            filters: queue.filter_subjects.clone(),
            syntax,
            max_pending,
            max_wait: queue.max_wait,
        }
    }

    fn matches(&self, subject: &str) -> bool {
        self.filters
            .iter()
            .any(|filter| filter_match(filter, subject, &self.syntax).unwrap_or(false))
    }

    /// Pick the next deliverable message: overdue redeliveries first, then
    /// fresh messages while the pending window has room.
    fn try_next(&mut self, now: Instant, messages: &[RawMessage]) -> Option<(usize, RawMessage)> {
        let overdue = self
            .pending
            .iter()
            .filter(|(_, redeliver_at)| **redeliver_at <= now)
            .map(|(seq, _)| *seq)
            .min();
        if let Some(seq) = overdue {
            self.pending.insert(seq, now + self.max_wait);
            return Some((seq, messages[seq].clone()));
        }
        if self.pending.len() >= self.max_pending {
            return None;
        }
        while self.cursor < messages.len() {
            let seq = self.cursor;
            self.cursor += 1;
            if !self.matches(&messages[seq].subject) {
                continue;
            }
            self.pending.insert(seq, now + self.max_wait);
            return Some((seq, messages[seq].clone()));
        }
        None
    }

    /// Earliest instant at which a pending delivery becomes overdue.
    fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().copied()
    }
}

fn lock(inner: &Arc<Mutex<StreamInner>>) -> MutexGuard<'_, StreamInner> {
    inner.lock().unwrap_or_else(|err| err.into_inner())
}

/// Materialize the queue on its stream if this is the first pull.
pub(crate) fn register(
    inner: &Arc<Mutex<StreamInner>>,
    queue: &QueueDescriptor,
    syntax: FilterSyntax,
) {
    let mut guard = lock(inner);
    let retained = guard.messages.len();
    guard
        .queues
        .entry(queue.name.clone())
        .or_insert_with(|| QueueState::new(queue, retained, syntax));
}

/// Build the scoped job stream for one puller of the queue.
pub(crate) fn subscription(
    inner: Arc<Mutex<StreamInner>>,
    notify: Arc<Notify>,
    queue_name: String,
) -> RawSubscription {
    let (tx, rx) = mpsc::channel(1);
    let task = tokio::spawn(run_queue(inner, notify, queue_name, tx));
    let stream = QueueReceiver {
        rx: ReceiverStream::new(rx),
        task,
    };
    RawSubscription::new(Box::pin(stream))
}

/// Deliver jobs to one puller until it goes away.
async fn run_queue(
    inner: Arc<Mutex<StreamInner>>,
    notify: Arc<Notify>,
    queue_name: String,
    tx: mpsc::Sender<RawMessage>,
) {
    loop {
        let notified = notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        let (job, deadline) = {
            let mut guard = lock(&inner);
            let StreamInner { messages, queues } = &mut *guard;
            let Some(state) = queues.get_mut(&queue_name) else {
                return;
            };
            let job = state.try_next(Instant::now(), messages);
            (job, state.next_deadline())
        };
        match job {
            Some((seq, mut msg)) => {
                msg.hooks = Some(Arc::new(MemoryJobHooks {
                    inner: inner.clone(),
                    notify: notify.clone(),
                    queue: queue_name.clone(),
                    seq,
                }));
                if tx.send(msg).await.is_err() {
                    return;
                }
            }
            None => match deadline {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            },
        }
    }
}

struct QueueReceiver {
    rx: ReceiverStream<RawMessage>,
    task: JoinHandle<()>,
}

impl Stream for QueueReceiver {
    type Item = RawMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}

impl Drop for QueueReceiver {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct MemoryJobHooks {
    inner: Arc<Mutex<StreamInner>>,
    notify: Arc<Notify>,
    queue: String,
    seq: usize,
}

impl MemoryJobHooks {
    fn with_state(&self, apply: impl FnOnce(&mut QueueState)) {
        let mut guard = lock(&self.inner);
        if let Some(state) = guard.queues.get_mut(&self.queue) {
            apply(state);
        }
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl JobHooks for MemoryJobHooks {
    async fn ack(&self) -> Result<(), BusError> {
        self.with_state(|state| {
            state.pending.remove(&self.seq);
        });
        Ok(())
    }

    async fn nack(&self, delay: Option<Duration>) -> Result<(), BusError> {
        self.with_state(|state| {
            if state.pending.contains_key(&self.seq) {
                let redeliver_at = Instant::now() + delay.unwrap_or(Duration::ZERO);
                state.pending.insert(self.seq, redeliver_at);
            }
        });
        Ok(())
    }

    async fn term(&self) -> Result<(), BusError> {
        self.with_state(|state| {
            state.pending.remove(&self.seq);
        });
        Ok(())
    }
}
