//! NATS transport for the Ensemble messaging runtime.
//!
//! A thin adapter over the `async-nats` client: publish sends encoded
//! payload bytes (with an optional bounded flush), subscribe and serve
//! open core NATS subscriptions on the spec's filter with the queue-group
//! string, and request uses the client's inbox-reply machinery with a
//! finite default timeout from [`NatsConfig`]. Pull queues map onto
//! JetStream: the queue's stream is created on first pull and jobs are
//! delivered through a durable pull consumer whose ack hooks translate to
//! `ack`, `nak(delay)`, and `term`.

mod config;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::{self, consumer};
use async_nats::{Client, HeaderMap, RequestErrorKind};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use ensemble_core::driver::{BusDriver, JobHooks, RawMessage, RawSubscription};
use ensemble_core::error::BusError;
use ensemble_core::queue::{QueueDescriptor, QueuePolicy};

pub use config::NatsConfig;

/// NATS event bus driver.
pub struct NatsBus {
    config: NatsConfig,
    client: OnceCell<Client>,
}

impl NatsBus {
    /// Create a driver that dials `config.url` on connect.
    pub fn new(config: NatsConfig) -> Self {
        Self {
            config,
            client: OnceCell::new(),
        }
    }

    /// Wrap an already-connected client.
    pub fn with_client(client: Client) -> Self {
        Self {
            config: NatsConfig::default(),
            client: OnceCell::new_with(Some(client)),
        }
    }

    fn client(&self) -> Result<&Client, BusError> {
        self.client.get().ok_or(BusError::NotConnected)
    }
}

#[async_trait]
impl BusDriver for NatsBus {
    async fn connect(&self) -> Result<(), BusError> {
        self.client
            .get_or_try_init(|| async {
                debug!(url = %self.config.url, "connecting to NATS");
                async_nats::connect(&self.config.url).await
            })
            .await
            .map_err(BusError::transport)?;
        Ok(())
    }

    async fn close(&self) -> Result<(), BusError> {
        if let Some(client) = self.client.get() {
            client.drain().await.map_err(BusError::transport)?;
        }
        Ok(())
    }

    async fn publish(
        &self,
        subject: &str,
        headers: &HashMap<String, String>,
        payload: Bytes,
        flush_timeout: Option<Duration>,
    ) -> Result<(), BusError> {
        let client = self.client()?;
        if headers.is_empty() {
            client
                .publish(subject.to_string(), payload)
                .await
                .map_err(BusError::transport)?;
        } else {
            client
                .publish_with_headers(subject.to_string(), header_map(headers), payload)
                .await
                .map_err(BusError::transport)?;
        }
        if let Some(limit) = flush_timeout {
            tokio::time::timeout(limit, client.flush())
                .await
                .map_err(|_| BusError::Timeout)?
                .map_err(BusError::transport)?;
        }
        Ok(())
    }

    async fn request(
        &self,
        subject: &str,
        headers: &HashMap<String, String>,
        payload: Bytes,
        timeout: Option<Duration>,
    ) -> Result<RawMessage, BusError> {
        let client = self.client()?;
        let limit = timeout.unwrap_or(self.config.request_timeout);
        let response = tokio::time::timeout(
            limit,
            client.request_with_headers(subject.to_string(), header_map(headers), payload),
        )
        .await
        .map_err(|_| BusError::Timeout)?
        .map_err(|err| match err.kind() {
            RequestErrorKind::TimedOut => BusError::Timeout,
            RequestErrorKind::NoResponders => BusError::NoReply,
            RequestErrorKind::Other => BusError::transport(err),
        })?;
        Ok(raw_from_message(response))
    }

    async fn subscribe(
        &self,
        filter: &str,
        queue_group: Option<&str>,
    ) -> Result<RawSubscription, BusError> {
        let client = self.client()?;
        let subscriber = match queue_group {
            Some(group) => client
                .queue_subscribe(filter.to_string(), group.to_string())
                .await,
            None => client.subscribe(filter.to_string()).await,
        }
        .map_err(BusError::transport)?;
        // Dropping the subscriber removes interest on the server.
        let stream = subscriber.map(raw_from_message);
        Ok(RawSubscription::new(Box::pin(stream)))
    }

    async fn pull(&self, queue: &QueueDescriptor) -> Result<RawSubscription, BusError> {
        let client = self.client()?.clone();
        let context = jetstream::new(client);
        let stream = context
            .get_or_create_stream(jetstream::stream::Config {
                name: queue.stream_name.clone(),
                subjects: queue.stream_subjects.iter().cloned().map(Into::into).collect(),
                ..Default::default()
            })
            .await
            .map_err(BusError::transport)?;
        let consumer = stream
            .get_or_create_consumer(
                &queue.name,
                consumer::pull::Config {
                    durable_name: Some(queue.name.clone()),
                    deliver_policy: deliver_policy(queue.policy),
                    ack_policy: consumer::AckPolicy::Explicit,
                    ack_wait: queue.max_wait,
                    max_ack_pending: max_ack_pending(queue.max_pending),
                    inactive_threshold: queue.inactive_threshold,
                    filter_subjects: queue.filter_subjects.clone(),
                    ..Default::default()
                },
            )
            .await
            .map_err(BusError::transport)?;
        let messages = consumer.messages().await.map_err(BusError::transport)?;
        let stream = messages.filter_map(|delivery| async move {
            match delivery {
                Ok(msg) => Some(raw_from_jetstream(msg)),
                Err(err) => {
                    warn!(error = %err, "JetStream delivery failed");
                    None
                }
            }
        });
        Ok(RawSubscription::new(Box::pin(stream)))
    }
}

fn header_map(headers: &HashMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.insert(name.as_str(), value.as_str());
    }
    map
}

fn headers_from(map: Option<&HeaderMap>) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    if let Some(map) = map {
        for (name, values) in map.iter() {
            if let Some(value) = values.first() {
                headers.insert(name.to_string(), value.to_string());
            }
        }
    }
    headers
}

fn raw_from_message(msg: async_nats::Message) -> RawMessage {
    let mut raw = RawMessage::new(msg.subject.to_string(), msg.payload.clone());
    raw.headers = headers_from(msg.headers.as_ref());
    raw.reply = msg.reply.as_ref().map(|subject| subject.to_string());
    raw
}

fn raw_from_jetstream(msg: jetstream::Message) -> RawMessage {
    let mut raw = RawMessage::new(msg.subject.to_string(), msg.payload.clone());
    raw.headers = headers_from(msg.headers.as_ref());
    raw.hooks = Some(Arc::new(JetStreamHooks { msg }));
    raw
}

fn deliver_policy(policy: QueuePolicy) -> consumer::DeliverPolicy {
    match policy {
        QueuePolicy::All => consumer::DeliverPolicy::All,
        QueuePolicy::Last => consumer::DeliverPolicy::Last,
        QueuePolicy::New => consumer::DeliverPolicy::New,
    }
}

fn max_ack_pending(max_pending: usize) -> i64 {
    if max_pending == 0 {
        -1
    } else {
        max_pending as i64
    }
}

struct JetStreamHooks {
    msg: jetstream::Message,
}

#[async_trait]
impl JobHooks for JetStreamHooks {
    async fn ack(&self) -> Result<(), BusError> {
        self.msg
            .ack()
            .await
            .map_err(|err| BusError::Transport(err.to_string().into()))
    }

    async fn nack(&self, delay: Option<Duration>) -> Result<(), BusError> {
        self.msg
            .ack_with(jetstream::AckKind::Nak(delay))
            .await
            .map_err(|err| BusError::Transport(err.to_string().into()))
    }

    async fn term(&self) -> Result<(), BusError> {
        self.msg
            .ack_with(jetstream::AckKind::Term)
            .await
            .map_err(|err| BusError::Transport(err.to_string().into()))
    }
}
