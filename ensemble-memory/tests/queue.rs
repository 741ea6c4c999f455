use std::sync::Arc;
use std::time::Duration;

use ensemble_core::{
    Event, EventBus, EventQueue, EventSpec, EventStream, QueuePolicy, StaticEvent,
};
use ensemble_memory::MemoryBus;

fn bus() -> EventBus {
    EventBus::new(Arc::new(MemoryBus::new()))
}

fn encode_event() -> StaticEvent<u64> {
    EventSpec::new("encode", "jobs.encode").unwrap()
}

fn jobs_stream() -> EventStream {
    EventStream::new("jobs", vec!["jobs.>".to_string()])
}

fn queue(name: &str) -> EventQueue<(), u64> {
    EventQueue::new(name, jobs_stream(), vec![encode_event()])
}

#[tokio::test]
async fn test_pull_and_ack() {
    let bus = bus();
    let event = encode_event();
    let mut jobs = bus.pull(&queue("workers")).await.unwrap();

    bus.publish(&event, &(), &1u64, &(), None).await.unwrap();
    let job = jobs.next().await.unwrap();
    assert_eq!(job.subject(), "jobs.encode");
    assert_eq!(job.data().unwrap(), &1);
    job.ack().await.unwrap();

    bus.publish(&event, &(), &2u64, &(), None).await.unwrap();
    let job = jobs.next().await.unwrap();
    assert_eq!(job.data().unwrap(), &2);
    job.ack().await.unwrap();
}

#[tokio::test]
async fn test_unacked_job_is_redelivered() {
    let bus = bus();
    let event = encode_event();
    let queue = queue("workers").with_max_wait(Duration::from_millis(100));
    let mut jobs = bus.pull(&queue).await.unwrap();

    bus.publish(&event, &(), &7u64, &(), None).await.unwrap();
    let first = jobs.next().await.unwrap();
    assert_eq!(first.data().unwrap(), &7);
    drop(first);

    let again = tokio::time::timeout(Duration::from_millis(500), jobs.next())
        .await
        .expect("redelivery after max_wait")
        .unwrap();
    assert_eq!(again.data().unwrap(), &7);
    again.ack().await.unwrap();
}

#[tokio::test]
async fn test_nack_schedules_redelivery() {
    let bus = bus();
    let event = encode_event();
    let queue = queue("workers").with_max_wait(Duration::from_secs(60));
    let mut jobs = bus.pull(&queue).await.unwrap();

    bus.publish(&event, &(), &7u64, &(), None).await.unwrap();
    let job = jobs.next().await.unwrap();
    job.nack(Some(Duration::from_millis(50))).await.unwrap();

    let again = tokio::time::timeout(Duration::from_millis(500), jobs.next())
        .await
        .expect("redelivery after nack delay")
        .unwrap();
    assert_eq!(again.data().unwrap(), &7);
    again.ack().await.unwrap();
}

#[tokio::test]
async fn test_terminated_job_is_never_redelivered() {
    let bus = bus();
    let event = encode_event();
    let queue = queue("workers").with_max_wait(Duration::from_millis(50));
    let mut jobs = bus.pull(&queue).await.unwrap();

    bus.publish(&event, &(), &1u64, &(), None).await.unwrap();
    let job = jobs.next().await.unwrap();
    job.term().await.unwrap();

    bus.publish(&event, &(), &2u64, &(), None).await.unwrap();
    let next = jobs.next().await.unwrap();
    assert_eq!(next.data().unwrap(), &2);
    next.ack().await.unwrap();

    let idle = tokio::time::timeout(Duration::from_millis(200), jobs.next()).await;
    assert!(idle.is_err());
}

#[tokio::test]
async fn test_max_pending_suspends_delivery() {
    let bus = bus();
    let event = encode_event();
    let queue = queue("workers")
        .with_max_pending(1)
        .with_max_wait(Duration::from_secs(60));
    let mut jobs = bus.pull(&queue).await.unwrap();

    bus.publish(&event, &(), &1u64, &(), None).await.unwrap();
    bus.publish(&event, &(), &2u64, &(), None).await.unwrap();

    let first = jobs.next().await.unwrap();
    assert_eq!(first.data().unwrap(), &1);

    let suspended = tokio::time::timeout(Duration::from_millis(100), jobs.next()).await;
    assert!(suspended.is_err());

    first.ack().await.unwrap();
    let second = jobs.next().await.unwrap();
    assert_eq!(second.data().unwrap(), &2);
    second.ack().await.unwrap();
}

#[tokio::test]
async fn test_queue_filters_subset_of_stream() {
    let bus = bus();
    let encode = encode_event();
    let publish: StaticEvent<u64> = EventSpec::new("publish", "jobs.publish").unwrap();
    let mut jobs = bus.pull(&queue("workers")).await.unwrap();

    // Both retained by the stream, only one matches the queue's filters.
    bus.publish(&publish, &(), &1u64, &(), None).await.unwrap();
    bus.publish(&encode, &(), &2u64, &(), None).await.unwrap();

    let job = jobs.next().await.unwrap();
    assert_eq!(job.subject(), "jobs.encode");
    job.ack().await.unwrap();
}

#[tokio::test]
async fn test_delivery_policies() {
    let bus = bus();
    let event = encode_event();

    // Materialize the stream, then retain two messages.
    let mut all = bus.pull(&queue("history")).await.unwrap();
    bus.publish(&event, &(), &1u64, &(), None).await.unwrap();
    bus.publish(&event, &(), &2u64, &(), None).await.unwrap();

    assert_eq!(all.next().await.unwrap().data().unwrap(), &1);

    let mut last = bus
        .pull(&queue("last").with_policy(QueuePolicy::Last))
        .await
        .unwrap();
    assert_eq!(last.next().await.unwrap().data().unwrap(), &2);

    let mut fresh = bus
        .pull(&queue("fresh").with_policy(QueuePolicy::New))
        .await
        .unwrap();
    let idle = tokio::time::timeout(Duration::from_millis(100), fresh.next()).await;
    assert!(idle.is_err());

    bus.publish(&event, &(), &3u64, &(), None).await.unwrap();
    assert_eq!(fresh.next().await.unwrap().data().unwrap(), &3);
}

#[tokio::test]
async fn test_shared_queue_delivers_each_job_once() {
    let bus = bus();
    let event = encode_event();
    let shared = queue("workers").with_max_wait(Duration::from_secs(60));
    let mut left = bus.pull(&shared).await.unwrap();
    let mut right = bus.pull(&shared).await.unwrap();

    bus.publish(&event, &(), &7u64, &(), None).await.unwrap();

    let mut received = 0;
    if let Ok(Some(job)) = tokio::time::timeout(Duration::from_millis(100), left.next()).await {
        job.ack().await.unwrap();
        received += 1;
    }
    if let Ok(Some(job)) = tokio::time::timeout(Duration::from_millis(100), right.next()).await {
        job.ack().await.unwrap();
        received += 1;
    }
    assert_eq!(received, 1);
}

#[tokio::test]
async fn test_typed_pull_requires_filters() {
    let bus = bus();
    let empty: EventQueue<(), u64> = EventQueue::new("workers", jobs_stream(), vec![]);
    assert!(bus.pull(&empty).await.is_err());
}
