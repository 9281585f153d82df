//! Batch Coordinator
//!
//! Sends the same batch to the predictor `fan_out` times and keeps the last
//! successful answer. Completions flow through a per-request channel drained
//! by a single collector; every pull is bounded by `per_item_timeout` and the
//! first pull that times out ends the request. Calls still running at that
//! point are not cancelled: their completion handlers find the request's
//! token closed and only log.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::InferenceJob;

use super::batch::{AggregatedResult, CompletionToken, HedgeOutcome, JobResult, PendingBatch};
use super::gateway::InferenceGateway;
use super::predictor::QualityPredictor;

/// Progress is logged every this many arrivals
const PROGRESS_EVERY: usize = 100;

#[derive(Clone)]
pub struct BatchCoordinator {
    gateway: InferenceGateway,
    predictor: QualityPredictor,
    late_arrivals: Arc<AtomicUsize>,
}

impl BatchCoordinator {
    pub fn new(gateway: InferenceGateway, predictor: QualityPredictor) -> Self {
        Self {
            gateway,
            predictor,
            late_arrivals: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn predictor(&self) -> &QualityPredictor {
        &self.predictor
    }

    /// Completions that arrived after their request was already answered
    pub fn late_arrivals(&self) -> usize {
        self.late_arrivals.load(Ordering::Relaxed)
    }

    /// Hedged fan-out over callback calls
    pub async fn run(
        &self,
        job: InferenceJob,
        fan_out: usize,
        per_item_timeout: Duration,
    ) -> AggregatedResult {
        if fan_out == 0 {
            warn!("fan_out is 0, nothing dispatched");
            return AggregatedResult::empty(0);
        }

        let start = Instant::now();
        let expected = job.batch_size();
        let job = Arc::new(job);
        let mut pending = PendingBatch::new(fan_out);
        let token = CompletionToken::new();
        // Each hedge sends at most once, so try_send never sees a full channel
        let (tx, mut rx) = mpsc::channel::<HedgeOutcome>(fan_out);

        info!(
            "Batch {}: dispatching {} hedge calls for {} images",
            pending.id(),
            fan_out,
            expected
        );

        for hedge in 0..fan_out {
            let tx = tx.clone();
            let token = token.clone();
            let predictor = self.predictor.clone();
            let late = self.late_arrivals.clone();
            let batch_id = pending.id();

            self.gateway.infer_callback(job.clone(), move |outcome| {
                if token.is_closed() {
                    late.fetch_add(1, Ordering::Relaxed);
                    debug!("Batch {}: dropping late result of hedge {}", batch_id, hedge);
                    return;
                }

                let result = predictor.to_job_result(outcome, expected);
                if tx.try_send(HedgeOutcome { hedge, result }).is_err() {
                    late.fetch_add(1, Ordering::Relaxed);
                    debug!("Batch {}: collector gone, dropping hedge {}", batch_id, hedge);
                }
            });
        }
        drop(tx);

        let mut timed_out = false;
        while !pending.is_complete() {
            match tokio::time::timeout(per_item_timeout, rx.recv()).await {
                Ok(Some(outcome)) => {
                    pending.record(outcome);
                    if pending.received() % PROGRESS_EVERY == 0 {
                        debug!(
                            "Batch {}: {}/{} received after {:?}",
                            pending.id(),
                            pending.received(),
                            fan_out,
                            start.elapsed()
                        );
                    }
                }
                // Every handler has run or been dropped
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Batch {}: no result within {:?}, abandoning {} outstanding calls",
                        pending.id(),
                        per_item_timeout,
                        fan_out - pending.received()
                    );
                    timed_out = true;
                    break;
                }
            }
        }

        // Anything still queued raced the token and is discarded unread
        token.close();
        rx.close();
        while let Ok(outcome) = rx.try_recv() {
            self.late_arrivals.fetch_add(1, Ordering::Relaxed);
            debug!("Batch {}: discarding queued result of hedge {}", pending.id(), outcome.hedge);
        }

        let id = pending.id();
        let result = pending.finish(timed_out);
        info!(
            "Batch {}: {} received, {} failed, {} scores in {:?}",
            id,
            result.received,
            result.failures,
            result.scores.len(),
            start.elapsed()
        );
        result
    }

    /// Hedged fan-out over spawned futures, awaited in dispatch order
    pub async fn run_futures(
        &self,
        job: InferenceJob,
        fan_out: usize,
        per_item_timeout: Duration,
    ) -> AggregatedResult {
        if fan_out == 0 {
            warn!("fan_out is 0, nothing dispatched");
            return AggregatedResult::empty(0);
        }

        let start = Instant::now();
        let expected = job.batch_size();
        let job = Arc::new(job);
        let mut pending = PendingBatch::new(fan_out);

        let handles: Vec<_> = (0..fan_out)
            .map(|_| self.gateway.infer_future(job.clone()))
            .collect();

        let mut timed_out = false;
        for (hedge, handle) in handles.into_iter().enumerate() {
            if timed_out {
                // Detached; the call finishes on its own and is ignored
                drop(handle);
                continue;
            }

            let result = match tokio::time::timeout(per_item_timeout, handle).await {
                Ok(Ok(outcome)) => self.predictor.to_job_result(outcome, expected),
                Ok(Err(join_err)) => JobResult::Failed(format!("inference task failed: {}", join_err)),
                Err(_) => {
                    warn!(
                        "Batch {}: hedge {} did not finish within {:?}",
                        pending.id(),
                        hedge,
                        per_item_timeout
                    );
                    timed_out = true;
                    continue;
                }
            };
            pending.record(HedgeOutcome { hedge, result });
        }

        debug!("Batch {}: futures collected in {:?}", pending.id(), start.elapsed());
        pending.finish(timed_out)
    }

    /// One awaited call; failure yields an empty result
    pub async fn run_sync(&self, job: InferenceJob) -> AggregatedResult {
        let expected = job.batch_size();
        let mut pending = PendingBatch::new(1);

        let outcome = self.gateway.infer_sync(&job).await;
        let result = self.predictor.to_job_result(outcome, expected);
        pending.record(HedgeOutcome { hedge: 0, result });
        pending.finish(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::{ScriptedBackend, Step};
    use crate::config::Config;
    use ndarray::Array4;

    async fn coordinator_for(backend: Arc<ScriptedBackend>) -> BatchCoordinator {
        let config = Config::default();
        let gateway = InferenceGateway::connect(backend, &config.predictor)
            .await
            .unwrap();
        BatchCoordinator::new(gateway, QualityPredictor::new(&config.model))
    }

    fn job(images: usize) -> InferenceJob {
        let predictor = QualityPredictor::new(&Config::default().model);
        predictor.job(&Array4::<f32>::zeros((images, 3, 2, 2)))
    }

    const TIMEOUT: Duration = Duration::from_millis(200);

    #[tokio::test(start_paused = true)]
    async fn test_two_succeed_one_fails() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Step::ok(10, vec![0.87]),
            Step::ok(20, vec![0.87]),
            Step::fail(30, "deadline exceeded"),
        ]));
        let coordinator = coordinator_for(backend).await;

        let result = coordinator.run(job(1), 3, TIMEOUT).await;
        assert_eq!(result.scores, vec![0.87]);
        assert_eq!(result.received, 3);
        assert_eq!(result.failures, 1);
        assert!(!result.timed_out);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_arrival_wins_not_last_dispatch() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Step::ok(50, vec![0.3]),
            Step::ok(10, vec![0.1]),
            Step::ok(30, vec![0.2]),
        ]));
        let coordinator = coordinator_for(backend).await;

        let result = coordinator.run(job(1), 3, TIMEOUT).await;
        assert_eq!(result.scores, vec![0.3]);

        let backend = Arc::new(ScriptedBackend::new(vec![
            Step::ok(50, vec![0.3]),
            Step::ok(70, vec![0.1]),
            Step::ok(30, vec![0.2]),
        ]));
        let coordinator = coordinator_for(backend).await;
        assert_eq!(coordinator.run(job(1), 3, TIMEOUT).await.scores, vec![0.1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_failures_return_empty() {
        let backend = Arc::new(
            ScriptedBackend::new(vec![]).with_fallback(Step::fail(5, "model not loaded")),
        );
        let coordinator = coordinator_for(backend).await;

        let result = coordinator.run(job(2), 4, TIMEOUT).await;
        assert!(result.is_empty());
        assert_eq!(result.failures, 4);
        assert_eq!(result.received, 4);
        assert!(!result.timed_out);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_counted_before_timeout() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Step::fail(10, "oom"),
            Step::ok(20, vec![0.5]),
            Step::fail(30, "oom"),
            Step::ok(10_000, vec![0.9]),
        ]));
        let coordinator = coordinator_for(backend).await;

        let result = coordinator.run(job(1), 4, TIMEOUT).await;
        assert_eq!(result.scores, vec![0.5]);
        assert_eq!(result.failures, 2);
        assert_eq!(result.received, 3);
        assert!(result.timed_out);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_pull_timeout_returns_within_bound() {
        let backend = Arc::new(
            ScriptedBackend::new(vec![]).with_fallback(Step::ok(60_000, vec![0.9])),
        );
        let coordinator = coordinator_for(backend).await;

        let start = tokio::time::Instant::now();
        let result = coordinator.run(job(1), 3, TIMEOUT).await;
        let elapsed = start.elapsed();

        assert!(result.is_empty());
        assert!(result.timed_out);
        assert_eq!(result.received, 0);
        assert!(elapsed >= TIMEOUT && elapsed < TIMEOUT * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_results_are_inert() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Step::ok(10, vec![0.4]),
            Step::ok(1_000, vec![0.8]),
        ]));
        let coordinator = coordinator_for(backend.clone()).await;

        let result = coordinator.run(job(1), 2, TIMEOUT).await;
        assert_eq!(result.scores, vec![0.4]);
        assert!(result.timed_out);
        assert_eq!(coordinator.late_arrivals(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(backend.completed(), 2);
        assert_eq!(coordinator.late_arrivals(), 1);
        assert_eq!(result.scores, vec![0.4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sixteen_images_keep_order() {
        let backend = Arc::new(ScriptedBackend::new(vec![Step::echo(5)]));
        let coordinator = coordinator_for(backend).await;

        let result = coordinator.run(job(16), 1, TIMEOUT).await;
        let expected: Vec<f32> = (0..16).map(|i| i as f32 / 100.0).collect();
        assert_eq!(result.scores, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_score_count_is_a_failure() {
        let backend = Arc::new(ScriptedBackend::new(vec![Step::ok(5, vec![0.1, 0.2])]));
        let coordinator = coordinator_for(backend).await;

        let result = coordinator.run(job(3), 1, TIMEOUT).await;
        assert!(result.is_empty());
        assert_eq!(result.failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_fan_out_dispatches_nothing() {
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let coordinator = coordinator_for(backend.clone()).await;

        let result = coordinator.run(job(1), 0, TIMEOUT).await;
        assert!(result.is_empty());
        assert_eq!(result.dispatched, 0);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_futures_last_in_dispatch_order_wins() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Step::ok(50, vec![0.3]),
            Step::ok(10, vec![0.1]),
            Step::fail(20, "busy"),
        ]));
        let coordinator = coordinator_for(backend).await;

        let result = coordinator.run_futures(job(1), 3, TIMEOUT).await;
        assert_eq!(result.scores, vec![0.1]);
        assert_eq!(result.failures, 1);
        assert_eq!(result.received, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_futures_stop_at_first_timeout() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Step::ok(10, vec![0.6]),
            Step::ok(5_000, vec![0.7]),
            Step::ok(10, vec![0.8]),
        ]));
        let coordinator = coordinator_for(backend).await;

        let result = coordinator.run_futures(job(1), 3, TIMEOUT).await;
        assert_eq!(result.scores, vec![0.6]);
        assert_eq!(result.received, 1);
        assert!(result.timed_out);
    }

    #[tokio::test]
    async fn test_sync_absorbs_errors() {
        let backend = Arc::new(ScriptedBackend::new(vec![Step::fail(0, "bad input")]));
        let coordinator = coordinator_for(backend).await;

        let result = coordinator.run_sync(job(1)).await;
        assert!(result.is_empty());
        assert_eq!(result.failures, 1);

        let result = coordinator.run_sync(job(2)).await;
        assert_eq!(result.scores, vec![0.0, 0.01]);
    }
}
