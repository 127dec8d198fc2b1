//! Named in-process work queues and their consumers.
//!
//! Each queue is a bounded `mpsc` channel carrying JSON payload text. A
//! consumer pulls payloads, decodes them for its processor, and runs each job
//! in its own tokio task, capped by a semaphore.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::error::QueueError;
use crate::pipeline::{
    DECOMPOSE_QUEUE, DecomposeJob, DecomposeProcessor, INVESTIGATE_QUEUE, InvestigateJob,
    InvestigateProcessor, Job,
};

/// Something that consumes one decoded payload from a queue.
#[async_trait]
pub trait JobProcessor: Send + Sync + 'static {
    type Payload: DeserializeOwned + Send + 'static;

    /// Handle one job. Failures are recorded by the processor, not returned.
    async fn process(&self, payload: Self::Payload);
}

#[async_trait]
impl JobProcessor for DecomposeProcessor {
    type Payload = DecomposeJob;

    async fn process(&self, payload: DecomposeJob) {
        DecomposeProcessor::process(self, payload).await
    }
}

#[async_trait]
impl JobProcessor for InvestigateProcessor {
    type Payload = InvestigateJob;

    async fn process(&self, payload: InvestigateJob) {
        InvestigateProcessor::process(self, payload).await
    }
}

// ── Producer side ───────────────────────────────────────────────────

/// Sending halves of the named queues. Cheap to clone; the queues close once
/// every clone is dropped.
#[derive(Debug, Clone)]
pub struct JobQueues {
    senders: HashMap<&'static str, mpsc::Sender<String>>,
}

/// Receiving halves, one per named queue.
#[derive(Debug)]
pub struct QueueReceivers {
    pub decompose: mpsc::Receiver<String>,
    pub investigate: mpsc::Receiver<String>,
}

impl JobQueues {
    /// Create both queues with the given per-queue capacity.
    pub fn new(capacity: usize) -> (Self, QueueReceivers) {
        let capacity = capacity.max(1);
        let (decompose_tx, decompose_rx) = mpsc::channel(capacity);
        let (investigate_tx, investigate_rx) = mpsc::channel(capacity);

        let senders = HashMap::from([
            (DECOMPOSE_QUEUE, decompose_tx),
            (INVESTIGATE_QUEUE, investigate_tx),
        ]);
        (
            Self { senders },
            QueueReceivers {
                decompose: decompose_rx,
                investigate: investigate_rx,
            },
        )
    }

    /// Send raw payload text to a named queue, waiting for capacity.
    pub async fn send(&self, queue: &str, payload: String) -> Result<(), QueueError> {
        let tx = self
            .senders
            .get(queue)
            .ok_or_else(|| QueueError::UnknownQueue {
                name: queue.to_string(),
            })?;
        tx.send(payload).await.map_err(|_| QueueError::Closed {
            name: queue.to_string(),
        })
    }

    /// Put a job on the queue for its kind.
    pub async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
        let queue = job.queue_name();
        let payload = job.payload_json().map_err(|e| QueueError::InvalidPayload {
            name: queue.to_string(),
            reason: e.to_string(),
        })?;
        self.send(queue, payload).await?;
        debug!(queue, "Job enqueued");
        Ok(())
    }
}

// ── Consumer side ───────────────────────────────────────────────────

/// Decode a queue payload for a processor.
pub fn decode_payload<T: DeserializeOwned>(queue: &str, raw: &str) -> Result<T, QueueError> {
    serde_json::from_str(raw).map_err(|e| QueueError::InvalidPayload {
        name: queue.to_string(),
        reason: e.to_string(),
    })
}

/// Spawn a consumer for one named queue.
///
/// At most `concurrency` jobs run at once. Undecodable payloads are logged
/// and dropped. The returned handle completes once the queue is closed and
/// every in-flight job has finished.
pub fn spawn_consumer<P: JobProcessor>(
    name: &'static str,
    mut rx: mpsc::Receiver<String>,
    processor: Arc<P>,
    concurrency: usize,
) -> JoinHandle<()> {
    let concurrency = concurrency.max(1);
    tokio::spawn(async move {
        info!(queue = name, concurrency, "Queue consumer started");

        let permits = Arc::new(Semaphore::new(concurrency));
        let mut in_flight = JoinSet::new();

        while let Some(raw) = rx.recv().await {
            let payload = match decode_payload::<P::Payload>(name, &raw) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(queue = name, error = %e, "Dropping undecodable job");
                    continue;
                }
            };

            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let processor = Arc::clone(&processor);
            in_flight.spawn(async move {
                processor.process(payload).await;
                drop(permit);
            });

            while let Some(done) = in_flight.try_join_next() {
                log_join(name, done);
            }
        }

        debug!(queue = name, pending = in_flight.len(), "Queue closed, draining");
        while let Some(done) = in_flight.join_next().await {
            log_join(name, done);
        }
        info!(queue = name, "Queue consumer stopped");
    })
}

fn log_join(queue: &str, result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        error!(queue, error = %e, "Job task panicked");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde::Deserialize;
    use tokio::sync::Mutex;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct Ping {
        n: u32,
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<u32>>,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl JobProcessor for Recorder {
        type Payload = Ping;

        async fn process(&self, payload: Ping) {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.seen.lock().await.push(payload.n);
            self.running.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn consumer_respects_concurrency_and_drains() {
        let (tx, rx) = mpsc::channel(16);
        let recorder = Arc::new(Recorder::default());
        let handle = spawn_consumer("test", rx, recorder.clone(), 2);

        for n in 0..6 {
            tx.send(format!(r#"{{"n": {n}}}"#)).await.unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        let mut seen = recorder.seen.lock().await.clone();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
        assert!(recorder.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn invalid_payload_is_dropped_and_consumer_continues() {
        let (tx, rx) = mpsc::channel(4);
        let recorder = Arc::new(Recorder::default());
        let handle = spawn_consumer("test", rx, recorder.clone(), 1);

        tx.send("not json".into()).await.unwrap();
        tx.send(r#"{"wrong": 1}"#.into()).await.unwrap();
        tx.send(r#"{"n": 7}"#.into()).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(*recorder.seen.lock().await, vec![7]);
    }

    #[tokio::test]
    async fn enqueue_routes_bare_payload_by_kind() {
        let (queues, mut receivers) = JobQueues::new(4);
        let job: Job = serde_json::from_str(
            r#"{"kind":"decompose","questId":"6f1c0d4e-8a7b-4c1e-9f2a-3b4c5d6e7f80","title":"Garden"}"#,
        )
        .unwrap();

        queues.enqueue(&job).await.unwrap();

        let raw = receivers.decompose.recv().await.unwrap();
        let decoded: DecomposeJob = decode_payload(DECOMPOSE_QUEUE, &raw).unwrap();
        assert_eq!(decoded.title, "Garden");
        assert!(receivers.investigate.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_and_closed_queues_error() {
        let (queues, receivers) = JobQueues::new(1);
        assert!(matches!(
            queues.send("nope", "{}".into()).await,
            Err(QueueError::UnknownQueue { .. })
        ));

        drop(receivers);
        assert!(matches!(
            queues.send(INVESTIGATE_QUEUE, "{}".into()).await,
            Err(QueueError::Closed { .. })
        ));
    }
}
