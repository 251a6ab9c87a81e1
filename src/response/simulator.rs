//! Loopback stand-in for the remote generation service.
//!
//! Enforces the same single-flight rule as the real service: a create that
//! arrives while a generation is active is answered with the conflict error.
//! Latencies are configurable and faults can be injected, which makes it
//! useful for the CLI demo and for end-to-end tests.

use crate::defaults;
use crate::response::protocol::{OutboundMessage, ResponseEvent, ResponseId};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatorConfig {
    /// Delay between receiving a create and emitting `created`.
    pub created_latency: Duration,
    /// Delay between `created` and `done` for text-only requests.
    pub text_latency: Duration,
    /// Delay between `created` and `done` for requests with audio output.
    pub voice_latency: Duration,
    /// Answer every Nth request with a spurious conflict error.
    pub conflict_every: Option<u64>,
    /// Never answer every Nth request.
    pub drop_every: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            created_latency: Duration::from_millis(50),
            text_latency: Duration::from_millis(150),
            voice_latency: Duration::from_millis(300),
            conflict_every: None,
            drop_every: None,
        }
    }
}

impl SimulatorConfig {
    /// Derives every phase from one base latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.created_latency = latency / 4;
        self.text_latency = latency;
        self.voice_latency = latency * 2;
        self
    }

    pub fn with_conflict_every(mut self, n: u64) -> Self {
        self.conflict_every = (n > 0).then_some(n);
        self
    }

    pub fn with_drop_every(mut self, n: u64) -> Self {
        self.drop_every = (n > 0).then_some(n);
        self
    }
}

/// What the simulated remote saw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatorStats {
    pub requests: u64,
    pub completed: u64,
    /// Creates that arrived while a generation was really active.
    pub overlaps: u64,
    /// Conflict errors injected by `conflict_every`.
    pub injected_conflicts: u64,
    pub dropped: u64,
}

pub struct SimulatedService {
    config: SimulatorConfig,
    events: mpsc::UnboundedSender<ResponseEvent>,
    active: Option<ResponseId>,
    scheduled: VecDeque<(Instant, ResponseEvent)>,
    stats: SimulatorStats,
}

impl SimulatedService {
    pub fn new(config: SimulatorConfig, events: mpsc::UnboundedSender<ResponseEvent>) -> Self {
        Self {
            config,
            events,
            active: None,
            scheduled: VecDeque::new(),
            stats: SimulatorStats::default(),
        }
    }

    /// Runs the service until `requests` closes and every scheduled event
    /// has been delivered.
    pub fn spawn(self, requests: mpsc::UnboundedReceiver<OutboundMessage>) -> JoinHandle<SimulatorStats> {
        tokio::spawn(self.run(requests))
    }

    pub async fn run(mut self, mut requests: mpsc::UnboundedReceiver<OutboundMessage>) -> SimulatorStats {
        let mut open = true;
        loop {
            let next = self.scheduled.front().map(|(at, _)| *at);
            if !open && next.is_none() {
                break;
            }
            tokio::select! {
                biased;
                message = requests.recv(), if open => match message {
                    Some(message) => self.receive(message),
                    None => open = false,
                },
                () = sleep_until(next) => self.deliver_due(),
            }
        }
        self.stats
    }

    fn receive(&mut self, message: OutboundMessage) {
        let OutboundMessage::CreateResponse {
            request_id,
            request,
        } = message;
        self.stats.requests += 1;
        let n = self.stats.requests;

        if let Some(active) = &self.active {
            tracing::debug!(request = request_id, %active, "simulator: create while active");
            self.stats.overlaps += 1;
            self.error(defaults::CONFLICT_ERROR_CODE, "Conversation already has an active response");
            return;
        }
        if self.config.conflict_every.is_some_and(|every| n % every == 0) {
            self.stats.injected_conflicts += 1;
            self.error(defaults::CONFLICT_ERROR_CODE, "Conversation already has an active response");
            return;
        }
        if self.config.drop_every.is_some_and(|every| n % every == 0) {
            tracing::debug!(request = request_id, "simulator: dropping request");
            self.stats.dropped += 1;
            return;
        }

        let response_id = format!("resp_{n:04}");
        let now = Instant::now();
        let created_at = now + self.config.created_latency;
        let body = if request.wants_audio() {
            self.config.voice_latency
        } else {
            self.config.text_latency
        };
        self.active = Some(response_id.clone());
        self.schedule(
            created_at,
            ResponseEvent::Created {
                response_id: response_id.clone(),
            },
        );
        self.schedule(created_at + body, ResponseEvent::Done { response_id });
    }

    fn schedule(&mut self, at: Instant, event: ResponseEvent) {
        let index = self.scheduled.partition_point(|(t, _)| *t <= at);
        self.scheduled.insert(index, (at, event));
    }

    fn deliver_due(&mut self) {
        let now = Instant::now();
        while self.scheduled.front().is_some_and(|(at, _)| *at <= now) {
            let Some((_, event)) = self.scheduled.pop_front() else {
                break;
            };
            if let ResponseEvent::Done { response_id } = &event
                && self.active.as_ref() == Some(response_id)
            {
                self.active = None;
                self.stats.completed += 1;
            }
            self.emit(event);
        }
    }

    fn error(&self, code: &str, message: &str) {
        self.emit(ResponseEvent::Error {
            code: Some(code.to_string()),
            message: message.to_string(),
        });
    }

    fn emit(&self, event: ResponseEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("simulator: event receiver closed");
        }
    }
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::protocol::ResponseRequest;

    fn create(request_id: u64, request: ResponseRequest) -> OutboundMessage {
        OutboundMessage::CreateResponse {
            request_id,
            request,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_created_then_done() {
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (ev_tx, mut ev_rx) = mpsc::unbounded_channel();
        let task = SimulatedService::new(SimulatorConfig::default(), ev_tx).spawn(req_rx);

        req_tx.send(create(1, ResponseRequest::text("t"))).unwrap();
        let start = Instant::now();

        assert_eq!(
            ev_rx.recv().await,
            Some(ResponseEvent::Created {
                response_id: "resp_0001".to_string()
            })
        );
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(matches!(ev_rx.recv().await, Some(ResponseEvent::Done { .. })));
        assert!(start.elapsed() >= Duration::from_millis(200));

        drop(req_tx);
        let stats = task.await.unwrap();
        assert_eq!(stats.requests, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.overlaps, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_create_while_active_conflicts() {
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (ev_tx, mut ev_rx) = mpsc::unbounded_channel();
        let task = SimulatedService::new(SimulatorConfig::default(), ev_tx).spawn(req_rx);

        req_tx.send(create(1, ResponseRequest::text("a"))).unwrap();
        req_tx.send(create(2, ResponseRequest::text("b"))).unwrap();

        assert_eq!(
            ev_rx.recv().await,
            Some(ResponseEvent::Error {
                code: Some(defaults::CONFLICT_ERROR_CODE.to_string()),
                message: "Conversation already has an active response".to_string()
            })
        );

        drop(req_tx);
        let stats = task.await.unwrap();
        assert_eq!(stats.overlaps, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_voice_takes_longer() {
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (ev_tx, mut ev_rx) = mpsc::unbounded_channel();
        let task = SimulatedService::new(SimulatorConfig::default(), ev_tx).spawn(req_rx);

        req_tx
            .send(create(1, ResponseRequest::voice("t", "alloy")))
            .unwrap();
        let start = Instant::now();
        ev_rx.recv().await;
        ev_rx.recv().await;
        assert!(start.elapsed() >= Duration::from_millis(350));

        drop(req_tx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_fault_injection() {
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (ev_tx, mut ev_rx) = mpsc::unbounded_channel();
        let config = SimulatorConfig::default()
            .with_conflict_every(1)
            .with_drop_every(0);
        let task = SimulatedService::new(config, ev_tx).spawn(req_rx);

        req_tx.send(create(1, ResponseRequest::text("a"))).unwrap();
        assert!(matches!(
            ev_rx.recv().await,
            Some(ResponseEvent::Error { .. })
        ));

        drop(req_tx);
        let stats = task.await.unwrap();
        assert_eq!(stats.injected_conflicts, 1);
        assert_eq!(stats.dropped, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_request_gets_no_events() {
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (ev_tx, mut ev_rx) = mpsc::unbounded_channel();
        let config = SimulatorConfig::default().with_drop_every(1);
        let task = SimulatedService::new(config, ev_tx).spawn(req_rx);

        req_tx.send(create(1, ResponseRequest::text("a"))).unwrap();
        drop(req_tx);
        let stats = task.await.unwrap();

        assert_eq!(stats.dropped, 1);
        assert!(ev_rx.try_recv().is_err());
    }
}
