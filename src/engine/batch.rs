//! Batch bookkeeping
//!
//! Per-request state shared between the coordinator's collector and the
//! completion handlers of its hedge calls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

/// Outcome of one dispatched call
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    /// One score per input image, in input order
    Scores(Vec<f32>),
    Failed(String),
}

/// A `JobResult` tagged with the hedge call that produced it
#[derive(Debug, Clone)]
pub struct HedgeOutcome {
    pub hedge: usize,
    pub result: JobResult,
}

/// Closed once the collector stops listening; completion handlers check it
/// before touching the request
#[derive(Debug, Clone, Default)]
pub struct CompletionToken {
    closed: Arc<AtomicBool>,
}

impl CompletionToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Final answer for one request
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregatedResult {
    /// Scores of the last successful call; empty if none succeeded
    pub scores: Vec<f32>,
    pub dispatched: usize,
    pub received: usize,
    pub failures: usize,
    pub timed_out: bool,
}

impl AggregatedResult {
    pub fn empty(dispatched: usize) -> Self {
        Self {
            dispatched,
            ..Default::default()
        }
    }

    /// True when no call succeeded. Does not mean "no faces".
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// In-flight calls for one external request
#[derive(Debug)]
pub struct PendingBatch {
    id: Uuid,
    target: usize,
    received: usize,
    failures: usize,
    best: Option<Vec<f32>>,
}

impl PendingBatch {
    pub fn new(target: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            received: 0,
            failures: 0,
            best: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }


    pub fn received(&self) -> usize {
        self.received
    }


    pub fn is_complete(&self) -> bool {
        self.received >= self.target
    }

    /// Account for one arrived outcome. Returns false, without changing
    /// anything, once every dispatched call has been accounted for.
    pub fn record(&mut self, outcome: HedgeOutcome) -> bool {
        if self.is_complete() {
            debug!(
                "Batch {}: ignoring outcome of hedge {} beyond target {}",
                self.id, outcome.hedge, self.target
            );
            return false;
        }

        self.received += 1;
        match outcome.result {
            JobResult::Scores(scores) => {
                debug!("Batch {}: hedge {} returned {} scores", self.id, outcome.hedge, scores.len());
                self.best = Some(scores);
            }
            JobResult::Failed(err) => {
                self.failures += 1;
                warn!("Batch {}: hedge {} inference failed: {}", self.id, outcome.hedge, err);
            }
        }
        true
    }

    pub fn finish(self, timed_out: bool) -> AggregatedResult {
        AggregatedResult {
            scores: self.best.unwrap_or_default(),
            dispatched: self.target,
            received: self.received,
            failures: self.failures,
            timed_out,
        }
    }
}
