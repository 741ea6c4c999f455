use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ensemble_core::actor::{Actor, ActorInfo};
use ensemble_core::envelope::{Job, Message, Request};
use ensemble_core::error::{BoxError, BusError};
use ensemble_core::{
    EventBus, EventQueue, EventSpec, EventStream, StaticEvent, StaticService,
};
use ensemble_memory::MemoryBus;
use ensemble_play::{
    Play, PlayError, PlayInstrumentation, PlayState, TracingInstrumentation, Waiter,
};

fn bus() -> EventBus {
    EventBus::new(Arc::new(MemoryBus::new()))
}

fn tick_event() -> StaticEvent<u64> {
    EventSpec::new("tick", "clock.tick").unwrap()
}

#[derive(Clone, Default)]
struct Recorder {
    started: Arc<AtomicUsize>,
    cancelled: Arc<AtomicUsize>,
    processed: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
    play_failed: Arc<AtomicUsize>,
    play_stopped: Arc<AtomicUsize>,
}

impl PlayInstrumentation for Recorder {
    fn actor_started(&self, _actor: &ActorInfo) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn actor_cancelled(&self, _actor: &ActorInfo) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
    }

    fn event_processed(&self, _actor: &ActorInfo, _subject: &str) {
        self.processed.fetch_add(1, Ordering::SeqCst);
    }

    fn event_processing_failed(
        &self,
        _actor: &ActorInfo,
        _subject: &str,
        _error: &(dyn std::error::Error + 'static),
    ) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn play_failed(&self, _errors: &[ensemble_play::ActorError]) {
        self.play_failed.fetch_add(1, Ordering::SeqCst);
    }

    fn play_stopped(&self) {
        self.play_stopped.fetch_add(1, Ordering::SeqCst);
    }
}

fn counting_subscriber(event: StaticEvent<u64>, counter: Arc<AtomicUsize>) -> Actor {
    Actor::subscriber(event, move |_msg: Arc<Message<(), u64>>| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), BoxError>(())
        }
    })
}

// ─── Lifecycle ───

#[tokio::test]
async fn test_subscriber_play_processes_events() {
    let bus = bus();
    let event = tick_event();
    let counter = Arc::new(AtomicUsize::new(0));
    let recorder = Recorder::default();

    let mut play = Play::new(bus.clone(), vec![counting_subscriber(event.clone(), counter.clone())])
        .with_instrumentation(Arc::new(recorder.clone()));
    play.start().await.unwrap();
    assert_eq!(play.state(), PlayState::Running);

    bus.publish(&event, &(), &1u64, &(), None).await.unwrap();
    bus.publish(&event, &(), &2u64, &(), None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 2);

    play.stop(None).await.unwrap();
    assert_eq!(play.state(), PlayState::Stopped);
    assert_eq!(recorder.started.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.processed.load(Ordering::SeqCst), 2);
    assert_eq!(recorder.play_stopped.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let bus = bus();
    let counter = Arc::new(AtomicUsize::new(0));
    let mut play = Play::new(bus, vec![counting_subscriber(tick_event(), counter)]);
    play.start().await.unwrap();
    play.start().await.unwrap();
    assert_eq!(play.state(), PlayState::Running);
    play.stop(None).await.unwrap();
}

#[tokio::test]
async fn test_stop_before_start_is_noop() {
    let bus = bus();
    let mut play = Play::new(bus, vec![]);
    play.stop(None).await.unwrap();
    assert_eq!(play.state(), PlayState::New);
    assert!(!play.started());
}

#[tokio::test]
async fn test_extend_after_start_fails() {
    let bus = bus();
    let counter = Arc::new(AtomicUsize::new(0));
    let mut play = Play::new(bus, vec![]);
    play.extend(vec![counting_subscriber(tick_event(), counter.clone())])
        .unwrap();
    play.start().await.unwrap();

    let err = play
        .extend(vec![counting_subscriber(tick_event(), counter)])
        .unwrap_err();
    assert!(matches!(err, PlayError::AlreadyStarted));
    play.stop(None).await.unwrap();
}

#[tokio::test]
async fn test_clean_shutdown_releases_scopes() {
    let bus = bus();
    let event = tick_event();
    let counter = Arc::new(AtomicUsize::new(0));

    let mut play = Play::new(bus.clone(), vec![counting_subscriber(event.clone(), counter.clone())]);
    play.start().await.unwrap();
    play.stop(None).await.unwrap();

    // The subscription scope is gone: publishing reaches no handler.
    bus.publish(&event, &(), &1u64, &(), None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

// ─── Request / reply ───

#[tokio::test]
async fn test_responder_play_answers_requests() {
    let bus = bus();
    let service: StaticService<u64, u64> = EventSpec::new("cmd", "t").unwrap();

    let responder = Actor::responder(service.clone(), |req: Arc<Request<(), u64, u64>>| async move {
        let payload = *req.data()?;
        Ok::<u64, BoxError>(payload + 10)
    });

    let mut play = Play::new(bus.clone(), vec![responder]);
    play.start().await.unwrap();

    let reply = bus
        .request(&service, &(), &12u64, &(), Some(Duration::from_millis(500)))
        .await
        .unwrap();
    assert_eq!(reply, 22);

    play.stop(None).await.unwrap();
}

#[tokio::test]
async fn test_failing_responder_sends_no_reply() {
    let bus = bus();
    let service: StaticService<u64, u64> = EventSpec::new("cmd", "t").unwrap();

    let responder = Actor::responder(service.clone(), |_req: Arc<Request<(), u64, u64>>| async move {
        Err::<u64, BoxError>("refused".into())
    });

    let mut play = Play::new(bus.clone(), vec![responder]);
    play.start().await.unwrap();

    let err = bus
        .request(&service, &(), &1u64, &(), Some(Duration::from_millis(100)))
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::Timeout));

    let err = play.stop(None).await.unwrap_err();
    assert!(matches!(err, PlayError::Cohort(_)));
}

// ─── Fail-fast ───

#[tokio::test]
async fn test_failing_actor_brings_cohort_down() {
    let bus = bus();
    let event = tick_event();
    let counter = Arc::new(AtomicUsize::new(0));
    let recorder = Recorder::default();

    let failing = Actor::subscriber(event.clone(), |_msg: Arc<Message<(), u64>>| async move {
        Err::<(), BoxError>("boom".into())
    });
    let healthy = counting_subscriber(event.clone(), counter.clone());

    let mut play = Play::new(bus.clone(), vec![failing, healthy])
        .with_instrumentation(Arc::new(recorder.clone()));
    play.start().await.unwrap();

    bus.publish(&event, &(), &1u64, &(), None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(play.done());

    let err = play.stop(None).await.unwrap_err();
    match err {
        PlayError::Cohort(errors) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].actor, "tick");
            assert!(errors[0].source.to_string().contains("boom"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(play.state(), PlayState::Failed);
    // The healthy actor was cancelled, not failed.
    assert_eq!(recorder.cancelled.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.failed.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.play_failed.load(Ordering::SeqCst), 1);
}

// ─── Queue groups ───

#[tokio::test]
async fn test_cohort_queue_group_delivers_once() {
    let bus = bus();
    let event = tick_event();
    let counter = Arc::new(AtomicUsize::new(0));

    let mut play = Play::new(
        bus.clone(),
        vec![
            counting_subscriber(event.clone(), counter.clone()),
            counting_subscriber(event.clone(), counter.clone()),
        ],
    )
    .with_queue("cohort");
    play.start().await.unwrap();

    bus.publish(&event, &(), &1u64, &(), None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    play.stop(None).await.unwrap();
}

// ─── Consumers ───

#[tokio::test]
async fn test_consumer_play_works_jobs() {
    let bus = bus();
    let event: StaticEvent<u64> = EventSpec::new("encode", "jobs.encode").unwrap();
    let stream = EventStream::new("jobs", vec!["jobs.>".to_string()]);
    let queue = EventQueue::new("workers", stream, vec![event.clone()]);
    let counter = Arc::new(AtomicUsize::new(0));

    let consumer = {
        let counter = counter.clone();
        Actor::consumer(queue, move |job: Arc<Job<(), u64>>| {
            let counter = counter.clone();
            async move {
                job.ack().await?;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), BoxError>(())
            }
        })
    };

    // The cohort queue group must not affect consumers.
    let mut play = Play::new(bus.clone(), vec![consumer]).with_queue("cohort");
    play.start().await.unwrap();

    bus.publish(&event, &(), &7u64, &(), None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    play.stop(None).await.unwrap();
}

#[tokio::test]
async fn test_tracing_instrumentation_does_not_disturb_the_play() {
    let bus = bus();
    let event = tick_event();
    let counter = Arc::new(AtomicUsize::new(0));

    let mut play = Play::new(bus.clone(), vec![counting_subscriber(event.clone(), counter.clone())])
        .with_instrumentation(Arc::new(TracingInstrumentation));
    play.start().await.unwrap();

    bus.publish(&event, &(), &1u64, &(), None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    play.stop(None).await.unwrap();
}

// ─── Waiter ───

#[tokio::test]
async fn test_waiter_resolves_with_first_event() {
    let bus = bus();
    let event = tick_event();
    let waiter = Waiter::new(bus.subscribe(&event, None).await.unwrap());

    bus.publish(&event, &(), &42u64, &(), None).await.unwrap();

    let msg = waiter.wait(Some(Duration::from_millis(500))).await.unwrap();
    assert_eq!(msg.data().unwrap(), &42);
}

#[tokio::test]
async fn test_waiter_times_out() {
    let bus = bus();
    let event = tick_event();
    let waiter = Waiter::new(bus.subscribe(&event, None).await.unwrap());

    let err = waiter.wait(Some(Duration::from_millis(50))).await.unwrap_err();
    assert!(matches!(err, BusError::Timeout));
}
