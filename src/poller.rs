use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::model::{ClusterIssue, ClusterMetrics};

pub trait ClusterSource: Send + Sync + 'static {
    fn metrics(&self) -> impl Future<Output = Result<ClusterMetrics>> + Send;
    fn issues(&self) -> impl Future<Output = Result<Vec<ClusterIssue>>> + Send;
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PollStream {
    Metrics,
    Issues,
}

impl PollStream {
    pub fn label(self) -> &'static str {
        match self {
            Self::Metrics => "metrics",
            Self::Issues => "issues",
        }
    }
}

#[derive(Debug)]
pub enum PollEvent {
    Metrics(ClusterMetrics),
    Issues(Vec<ClusterIssue>),
    Error { stream: PollStream, message: String },
}

pub struct PollCoordinator<S> {
    source: Arc<S>,
    events: UnboundedSender<PollEvent>,
    metrics_in_flight: Arc<AtomicBool>,
    issues_in_flight: Arc<AtomicBool>,
    shutting_down: Arc<AtomicBool>,
    tickers: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: ClusterSource> PollCoordinator<S> {
    pub fn new(source: S) -> (Self, UnboundedReceiver<PollEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let coordinator = Self {
            source: Arc::new(source),
            events,
            metrics_in_flight: Arc::new(AtomicBool::new(false)),
            issues_in_flight: Arc::new(AtomicBool::new(false)),
            shutting_down: Arc::new(AtomicBool::new(false)),
            tickers: Mutex::new(Vec::new()),
        };
        (coordinator, receiver)
    }

    pub fn start_polling(&self, metrics_interval: Duration, issues_interval: Duration) {
        let mut tickers = self
            .tickers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !tickers.is_empty() {
            debug!("polling already started");
            return;
        }

        info!(
            metrics_ms = metrics_interval.as_millis() as u64,
            issues_ms = issues_interval.as_millis() as u64,
            "starting poll streams"
        );
        tickers.push(self.spawn_ticker(PollStream::Metrics, metrics_interval));
        tickers.push(self.spawn_ticker(PollStream::Issues, issues_interval));
    }

    pub fn stop_polling(&self) {
        let mut tickers = self
            .tickers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for ticker in tickers.drain(..) {
            ticker.abort();
        }
    }

    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.stop_polling();
        info!("poll coordinator shut down");
    }

    fn spawn_ticker(&self, stream: PollStream, period: Duration) -> JoinHandle<()> {
        let source = Arc::clone(&self.source);
        let events = self.events.clone();
        let in_flight = match stream {
            PollStream::Metrics => Arc::clone(&self.metrics_in_flight),
            PollStream::Issues => Arc::clone(&self.issues_in_flight),
        };
        let shutting_down = Arc::clone(&self.shutting_down);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                if in_flight
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    debug!(stream = stream.label(), "fetch in flight, dropping tick");
                    continue;
                }

                let source = Arc::clone(&source);
                let events = events.clone();
                let in_flight = Arc::clone(&in_flight);
                let shutting_down = Arc::clone(&shutting_down);
                tokio::spawn(async move {
                    let event = match stream {
                        PollStream::Metrics => match source.metrics().await {
                            Ok(metrics) => PollEvent::Metrics(metrics),
                            Err(error) => PollEvent::Error {
                                stream,
                                message: error.to_string(),
                            },
                        },
                        PollStream::Issues => match source.issues().await {
                            Ok(issues) => PollEvent::Issues(issues),
                            Err(error) => PollEvent::Error {
                                stream,
                                message: error.to_string(),
                            },
                        },
                    };
                    in_flight.store(false, Ordering::SeqCst);
                    if shutting_down.load(Ordering::SeqCst) {
                        return;
                    }
                    let _ = events.send(event);
                });
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{ClusterSource, PollCoordinator, PollEvent};
    use crate::model::{ClusterIssue, ClusterMetrics};
    use anyhow::Result;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    struct StubSource {
        metrics_calls: Arc<AtomicUsize>,
        issues_calls: Arc<AtomicUsize>,
        fetch_delay: Duration,
    }

    impl ClusterSource for StubSource {
        async fn metrics(&self) -> Result<ClusterMetrics> {
            self.metrics_calls.fetch_add(1, Ordering::SeqCst);
            sleep(self.fetch_delay).await;
            Ok(ClusterMetrics::fallback())
        }

        async fn issues(&self) -> Result<Vec<ClusterIssue>> {
            self.issues_calls.fetch_add(1, Ordering::SeqCst);
            sleep(self.fetch_delay).await;
            Ok(Vec::new())
        }
    }

    fn stub(delay: Duration) -> (StubSource, Arc<AtomicUsize>) {
        let metrics_calls = Arc::new(AtomicUsize::new(0));
        let source = StubSource {
            metrics_calls: Arc::clone(&metrics_calls),
            issues_calls: Arc::new(AtomicUsize::new(0)),
            fetch_delay: delay,
        };
        (source, metrics_calls)
    }

    #[tokio::test]
    async fn ticks_during_a_fetch_are_dropped() {
        let (source, metrics_calls) = stub(Duration::from_millis(500));
        let (coordinator, _receiver) = PollCoordinator::new(source);
        coordinator.start_polling(Duration::from_millis(5), Duration::from_secs(3600));

        sleep(Duration::from_millis(150)).await;
        coordinator.shutdown();

        assert_eq!(metrics_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn start_polling_is_idempotent() {
        let (source, metrics_calls) = stub(Duration::from_millis(500));
        let (coordinator, _receiver) = PollCoordinator::new(source);
        coordinator.start_polling(Duration::from_millis(5), Duration::from_secs(3600));
        coordinator.start_polling(Duration::from_millis(5), Duration::from_secs(3600));

        sleep(Duration::from_millis(150)).await;
        coordinator.shutdown();

        assert_eq!(metrics_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn in_flight_fetch_still_publishes_after_stop() {
        let (source, _metrics_calls) = stub(Duration::from_millis(50));
        let (coordinator, mut receiver) = PollCoordinator::new(source);
        coordinator.start_polling(Duration::from_millis(5), Duration::from_secs(3600));

        sleep(Duration::from_millis(20)).await;
        coordinator.stop_polling();
        sleep(Duration::from_millis(200)).await;

        let event = receiver.try_recv().expect("in-flight result is published");
        assert!(matches!(event, PollEvent::Metrics(_)));
    }

    #[tokio::test]
    async fn shutdown_suppresses_pending_publishes() {
        let (source, metrics_calls) = stub(Duration::from_millis(50));
        let (coordinator, mut receiver) = PollCoordinator::new(source);
        coordinator.start_polling(Duration::from_millis(5), Duration::from_secs(3600));

        sleep(Duration::from_millis(20)).await;
        coordinator.shutdown();
        sleep(Duration::from_millis(200)).await;

        assert!(metrics_calls.load(Ordering::SeqCst) >= 1);
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn both_streams_publish_independently() {
        let (source, _metrics_calls) = stub(Duration::from_millis(1));
        let (coordinator, mut receiver) = PollCoordinator::new(source);
        coordinator.start_polling(Duration::from_millis(10), Duration::from_millis(10));

        let mut saw_metrics = false;
        let mut saw_issues = false;
        for _ in 0..10 {
            match tokio::time::timeout(Duration::from_millis(500), receiver.recv()).await {
                Ok(Some(PollEvent::Metrics(_))) => saw_metrics = true,
                Ok(Some(PollEvent::Issues(_))) => saw_issues = true,
                _ => break,
            }
            if saw_metrics && saw_issues {
                break;
            }
        }
        coordinator.shutdown();

        assert!(saw_metrics);
        assert!(saw_issues);
    }
}
