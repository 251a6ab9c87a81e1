//! Response queue behavior through the public API: the documented
//! scenarios, plus single-flight, no-lost-request and FIFO properties over
//! pseudo-random event sequences.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use voxbridge::defaults;
use voxbridge::response::{
    ChannelTransport, OutboundMessage, QueueError, RecordingTransport, ResponseEvent, ResponseId,
    ResponseQueueConfig, ResponseQueueHandle, ResponseRequest, ResponseRequestQueue, ResponseState,
    SimulatedService, SimulatorConfig,
};

type Outcome = Result<ResponseId, QueueError>;

/// Synchronous queue core driven with explicit instants.
struct Bench {
    queue: ResponseRequestQueue,
    transport: RecordingTransport,
    t0: Instant,
    now_ms: u64,
    waiting: BTreeMap<u64, oneshot::Receiver<Outcome>>,
    settled: BTreeMap<u64, Outcome>,
    /// Request id assigned by the queue, mapped to the caller that owns it.
    callers: BTreeMap<u64, u64>,
    next_caller: u64,
}

impl Bench {
    fn new(config: ResponseQueueConfig) -> Self {
        let transport = RecordingTransport::new();
        Self {
            queue: ResponseRequestQueue::new(config, Arc::new(transport.clone())),
            transport,
            t0: Instant::now(),
            now_ms: 0,
            waiting: BTreeMap::new(),
            settled: BTreeMap::new(),
            callers: BTreeMap::new(),
            next_caller: 0,
        }
    }

    fn now(&self) -> Instant {
        self.t0 + Duration::from_millis(self.now_ms)
    }

    /// Enqueues a request and returns the caller number used to look up its outcome.
    fn enqueue(&mut self) -> u64 {
        let (tx, rx) = oneshot::channel();
        let now = self.now();
        let caller = self.next_caller;
        self.next_caller += 1;
        if let Some(request_id) = self.queue.enqueue(ResponseRequest::text("translate"), tx, now) {
            self.callers.insert(request_id, caller);
        }
        self.waiting.insert(caller, rx);
        caller
    }

    fn advance(&mut self, ms: u64) {
        self.now_ms += ms;
        let now = self.now();
        self.queue.poll_timers(now);
    }

    fn event(&mut self, event: ResponseEvent) {
        let now = self.now();
        self.queue.handle_event(event, now);
    }

    /// Moves every delivered outcome from `waiting` to `settled`.
    fn collect(&mut self) {
        let mut done = Vec::new();
        for (caller, rx) in self.waiting.iter_mut() {
            if let Ok(outcome) = rx.try_recv() {
                done.push((*caller, outcome));
            }
        }
        for (caller, outcome) in done {
            self.waiting.remove(&caller);
            assert!(
                self.settled.insert(caller, outcome).is_none(),
                "caller {caller} settled twice"
            );
        }
    }

    fn outcome(&mut self, caller: u64) -> Option<Outcome> {
        self.collect();
        self.settled.get(&caller).cloned()
    }

    fn sent_ids(&self) -> Vec<u64> {
        self.transport
            .sent()
            .into_iter()
            .map(|m| match m {
                OutboundMessage::CreateResponse { request_id, .. } => request_id,
            })
            .collect()
    }
}

fn created(id: &str) -> ResponseEvent {
    ResponseEvent::Created {
        response_id: id.to_string(),
    }
}

fn done(id: &str) -> ResponseEvent {
    ResponseEvent::Done {
        response_id: id.to_string(),
    }
}

fn conflict() -> ResponseEvent {
    ResponseEvent::Error {
        code: Some(defaults::CONFLICT_ERROR_CODE.to_string()),
        message: "Conversation already has an active response".to_string(),
    }
}

#[test]
fn test_scenario_created_then_done_resolves() {
    let mut bench = Bench::new(ResponseQueueConfig::default());
    let a = bench.enqueue();
    bench.advance(0);
    assert_eq!(bench.transport.sent_count(), 1);

    bench.event(created("r1"));
    assert_eq!(bench.outcome(a), None);
    bench.event(done("r1"));

    assert_eq!(bench.outcome(a), Some(Ok("r1".to_string())));
    assert_eq!(bench.queue.pending_count(), 0);
    assert_eq!(bench.queue.state(), ResponseState::Idle);
}

#[test]
fn test_scenario_second_request_waits_for_done_and_settle() {
    let mut bench = Bench::new(ResponseQueueConfig::default());
    let a = bench.enqueue();
    let b = bench.enqueue();
    bench.advance(0);
    assert_eq!(bench.sent_ids(), vec![1]);

    bench.event(created("r1"));
    bench.advance(500);
    assert_eq!(bench.sent_ids(), vec![1], "B must not be sent while A is active");

    bench.event(done("r1"));
    assert_eq!(bench.outcome(a), Some(Ok("r1".to_string())));
    bench.advance(defaults::SETTLE_DELAY_MS - 1);
    assert_eq!(bench.sent_ids(), vec![1], "B must wait out the settle delay");

    bench.advance(1);
    assert_eq!(bench.sent_ids(), vec![1, 2]);
    bench.event(created("r2"));
    bench.event(done("r2"));
    assert_eq!(bench.outcome(b), Some(Ok("r2".to_string())));
}

#[test]
fn test_scenario_conflict_resets_and_admits_next() {
    let mut bench = Bench::new(ResponseQueueConfig::default());
    let a = bench.enqueue();
    bench.advance(0);

    bench.event(conflict());
    assert_eq!(bench.queue.state(), ResponseState::Idle);
    assert!(matches!(
        bench.outcome(a),
        Some(Err(QueueError::RemoteConflict { .. }))
    ));

    let c = bench.enqueue();
    assert_eq!(bench.outcome(c), None, "C must be admitted, not refused");
    bench.advance(defaults::SETTLE_DELAY_MS);
    assert_eq!(bench.sent_ids(), vec![1, 2]);
}

#[test]
fn test_enqueue_while_in_flight_fails_fast() {
    let mut bench = Bench::new(ResponseQueueConfig::default());
    bench.enqueue();
    bench.advance(0);

    let late = bench.enqueue();
    assert_eq!(
        bench.outcome(late),
        Some(Err(QueueError::CannotCreateResponse {
            state: ResponseState::ResponsePending
        }))
    );
}

/// Small deterministic generator so the property runs are reproducible.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

#[test]
fn test_single_flight_no_loss_and_fifo_over_random_sequences() {
    let config = ResponseQueueConfig {
        timeout: Duration::from_millis(2_000),
        completion_timeout: Duration::from_millis(5_000),
        ..ResponseQueueConfig::default()
    };

    for seed in 1..=64 {
        let mut rng = Lcg(seed);
        let mut bench = Bench::new(config.clone());
        let mut generation = 0u64;

        for _ in 0..300 {
            match rng.below(8) {
                0 | 1 => {
                    bench.enqueue();
                }
                2 => {
                    generation += 1;
                    bench.event(created(&format!("r{generation}")));
                }
                3 => {
                    // Usually the active generation, sometimes a stale one
                    let id = generation.saturating_sub(rng.below(2));
                    bench.event(done(&format!("r{id}")));
                }
                4 => {
                    if rng.below(2) == 0 {
                        bench.event(conflict());
                    } else {
                        bench.event(ResponseEvent::Error {
                            code: None,
                            message: "server error".to_string(),
                        });
                    }
                }
                5 => match rng.below(3) {
                    0 => bench.event(ResponseEvent::AudioBufferStarted),
                    1 => bench.event(ResponseEvent::AudioBufferCommitted),
                    _ => bench.event(ResponseEvent::AudioBufferCleared),
                },
                _ => bench.advance(rng.below(400)),
            }

            bench.collect();

            // Single flight: at most one sent request is still unresolved
            let sent = bench.sent_ids();
            let unresolved = sent
                .iter()
                .filter(|id| bench.waiting.contains_key(&bench.callers[*id]))
                .count();
            assert!(unresolved <= 1, "seed {seed}: {unresolved} requests in flight");

            // The active id exists exactly while a generation is active
            assert_eq!(
                bench.queue.active_response_id().is_some(),
                bench.queue.state() == ResponseState::ResponseActive,
                "seed {seed}"
            );

            // FIFO: requests are sent in enqueue order
            assert!(sent.windows(2).all(|w| w[0] < w[1]), "seed {seed}: {sent:?}");
        }

        // No lost requests: after teardown every caller has exactly one outcome
        bench.queue.clear();
        bench.collect();
        assert!(bench.waiting.is_empty(), "seed {seed}: unresolved callers");
        assert_eq!(bench.settled.len() as u64, bench.next_caller);
    }
}

#[tokio::test(start_paused = true)]
async fn test_simulated_remote_never_sees_overlap() {
    let (transport, requests) = ChannelTransport::new();
    let (remote_tx, remote_rx) = tokio::sync::mpsc::unbounded_channel();
    let service = SimulatedService::new(SimulatorConfig::default(), remote_tx).spawn(requests);
    let (queue, queue_task) =
        ResponseQueueHandle::spawn(ResponseQueueConfig::default(), Arc::new(transport));
    let forwarder = queue.attach_events(remote_rx);

    let mut callers = Vec::new();
    for i in 0..12u64 {
        let queue = queue.clone();
        callers.push(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(i * 37)).await;
            loop {
                match queue.enqueue(ResponseRequest::text(format!("utterance {i}"))).await {
                    Ok(id) => return id,
                    Err(QueueError::CannotCreateResponse { .. }) => {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                    Err(e) => panic!("caller {i} failed: {e}"),
                }
            }
        }));
    }

    let mut ids = Vec::new();
    for caller in callers {
        ids.push(caller.await.unwrap());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 12, "every caller gets its own generation");

    queue.shutdown();
    let stats = queue_task.await.unwrap();
    let remote = service.await.unwrap();
    forwarder.await.unwrap();

    assert_eq!(stats.completed, 12);
    assert_eq!(stats.failed, 0);
    assert_eq!(remote.requests, 12);
    assert_eq!(remote.overlaps, 0);
}

#[tokio::test(start_paused = true)]
async fn test_injected_conflicts_are_recovered() {
    let (transport, requests) = ChannelTransport::new();
    let (remote_tx, remote_rx) = tokio::sync::mpsc::unbounded_channel();
    let service = SimulatedService::new(SimulatorConfig::default().with_conflict_every(2), remote_tx)
        .spawn(requests);
    let (queue, queue_task) =
        ResponseQueueHandle::spawn(ResponseQueueConfig::default(), Arc::new(transport));
    let forwarder = queue.attach_events(remote_rx);

    let mut conflicts = 0;
    let mut completed = 0;
    for i in 0..6 {
        match queue.enqueue(ResponseRequest::text(format!("u{i}"))).await {
            Ok(_) => completed += 1,
            Err(QueueError::RemoteConflict { .. }) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
        // Let the settle delay pass before the next request
        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    assert_eq!(completed, 3);
    assert_eq!(conflicts, 3);
    assert_eq!(queue.state(), ResponseState::Idle);

    queue.shutdown();
    queue_task.await.unwrap();
    let remote = service.await.unwrap();
    forwarder.await.unwrap();
    assert_eq!(remote.injected_conflicts, 3);
    assert_eq!(remote.overlaps, 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_request_times_out_and_queue_moves_on() {
    let (transport, requests) = ChannelTransport::new();
    let (remote_tx, remote_rx) = tokio::sync::mpsc::unbounded_channel();
    let service = SimulatedService::new(SimulatorConfig::default().with_drop_every(1), remote_tx)
        .spawn(requests);
    let config = ResponseQueueConfig {
        timeout: Duration::from_secs(1),
        ..ResponseQueueConfig::default()
    };
    let (queue, queue_task) = ResponseQueueHandle::spawn(config, Arc::new(transport));
    let forwarder = queue.attach_events(remote_rx);

    let started = tokio::time::Instant::now();
    let result = queue.enqueue(ResponseRequest::text("lost")).await;
    assert_eq!(result, Err(QueueError::Timeout { waited_ms: 1000 }));
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(queue.state(), ResponseState::Idle);

    queue.shutdown();
    assert_eq!(queue_task.await.unwrap().timed_out, 1);
    service.await.unwrap();
    forwarder.await.unwrap();
}
