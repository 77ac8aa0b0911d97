// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Parallel Extraction Coordinator
 * Bounded worker pool over row extractions with ordered results,
 * per-row retry and a run-wide WAF circuit breaker
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use crate::errors::{CoordinatorError, EngineError};
use crate::events::ProgressEvent;
use crate::extractor::Extractor;
use crate::point::InjectionPoint;
use crate::probe::ProbeGate;
use crate::retry::{retry_with_predicate, RetryConfig};
use crate::session::Session;
use crate::types::{ExtractedValue, ExtractionJob, Query};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Result slot for one input row
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Extracted(ExtractedValue),
    Failed(EngineError),
    /// Dispatch stopped (breaker or cancellation) before this row was claimed
    NotAttempted,
}

impl RowOutcome {
    pub fn value(&self) -> Option<&ExtractedValue> {
        match self {
            RowOutcome::Extracted(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&EngineError> {
        match self {
            RowOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RowOutcome::Extracted(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub succeeded: usize,
    pub failed: usize,
    pub not_attempted: usize,
    /// Row-level retries across all workers
    pub retries: u64,
}

/// Everything a batch produced, in input order. `error` carries the
/// batch-level verdict; rows are returned even when it is set.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub rows: Vec<RowOutcome>,
    pub error: Option<CoordinatorError>,
    pub stats: BatchStats,
}

impl BatchOutcome {
    pub fn values(&self) -> Vec<Option<&ExtractedValue>> {
        self.rows.iter().map(RowOutcome::value).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.rows.iter().all(RowOutcome::is_success)
    }
}

/// Runs row extractions for one injection point over a fixed-size pool
pub struct ExtractionCoordinator {
    session: Session,
    point: Arc<InjectionPoint>,
}

impl ExtractionCoordinator {
    pub fn new(session: Session, point: Arc<InjectionPoint>) -> Self {
        Self { session, point }
    }

    pub async fn run(&self, queries: Vec<Query>) -> BatchOutcome {
        let total = queries.len();
        let gate = self.session.gate();
        let queries = Arc::new(queries);
        let next = Arc::new(AtomicUsize::new(0));
        let retries = Arc::new(AtomicU64::new(0));
        let workers = self.session.options().worker_count.min(total).max(1);

        info!(
            point = self.point.id(),
            rows = total,
            workers = workers,
            "Starting batch extraction"
        );

        let mut pool = JoinSet::new();
        for worker_id in 0..workers {
            let worker = Worker {
                id: worker_id,
                session: self.session.clone(),
                point: Arc::clone(&self.point),
                gate: gate.clone(),
                queries: Arc::clone(&queries),
                next: Arc::clone(&next),
                retries: Arc::clone(&retries),
            };
            pool.spawn(worker.run());
        }

        let mut rows = vec![RowOutcome::NotAttempted; total];
        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(finished) => {
                    for (index, outcome) in finished {
                        rows[index] = outcome;
                    }
                }
                Err(e) => error!(error = %e, "Extraction worker aborted"),
            }
        }

        let stats = BatchStats {
            succeeded: rows.iter().filter(|r| r.is_success()).count(),
            failed: rows.iter().filter(|r| r.error().is_some()).count(),
            not_attempted: rows
                .iter()
                .filter(|r| matches!(r, RowOutcome::NotAttempted))
                .count(),
            retries: retries.load(Ordering::Relaxed),
        };

        let error = if gate.breaker().is_open() {
            Some(CoordinatorError::GlobalBlock {
                blocks: gate.breaker().consecutive_blocks(),
            })
        } else if total > 0 && stats.succeeded == 0 && !gate.is_cancelled() {
            Some(CoordinatorError::AllRowsFailed { rows: total })
        } else {
            None
        };

        match &error {
            Some(err) => warn!(
                point = self.point.id(),
                succeeded = stats.succeeded,
                failed = stats.failed,
                not_attempted = stats.not_attempted,
                error = %err,
                "Batch extraction stopped"
            ),
            None => info!(
                point = self.point.id(),
                succeeded = stats.succeeded,
                failed = stats.failed,
                not_attempted = stats.not_attempted,
                retries = stats.retries,
                "Batch extraction finished"
            ),
        }

        BatchOutcome { rows, error, stats }
    }
}

/// Per-task state. Everything a worker needs travels with it.
struct Worker {
    id: usize,
    session: Session,
    point: Arc<InjectionPoint>,
    gate: ProbeGate,
    queries: Arc<Vec<Query>>,
    next: Arc<AtomicUsize>,
    retries: Arc<AtomicU64>,
}

impl Worker {
    async fn run(self) -> Vec<(usize, RowOutcome)> {
        let mut finished = Vec::new();

        loop {
            if self.gate.is_cancelled() || self.gate.breaker().is_open() {
                debug!(worker = self.id, "Dispatch halted");
                break;
            }

            let index = self.next.fetch_add(1, Ordering::SeqCst);
            let Some(query) = self.queries.get(index) else {
                break;
            };

            let outcome = match self.extract_row(index, query).await {
                Ok(value) => RowOutcome::Extracted(value),
                Err(err) => {
                    warn!(worker = self.id, row = index, error = %err, "Row failed");
                    RowOutcome::Failed(err)
                }
            };

            self.session.events().emit(ProgressEvent::RowFinished {
                index,
                success: outcome.is_success(),
            });
            finished.push((index, outcome));
        }

        finished
    }

    async fn extract_row(&self, index: usize, query: &Query) -> Result<ExtractedValue, EngineError> {
        let config = RetryConfig::from_options(self.session.options());
        let extractor = Extractor::new(&self.session, &self.point, &self.gate);
        let job = Mutex::new(ExtractionJob::new(query.clone(), None));
        let attempts = AtomicU32::new(0);

        let extractor = &extractor;
        let job = &job;
        let attempts_ref = &attempts;
        let gate = &self.gate;

        let result = retry_with_predicate(
            &config,
            "extract_row",
            gate.cancel_signal(),
            move || async move {
                attempts_ref.fetch_add(1, Ordering::Relaxed);
                let mut job = job.lock().await;
                extractor.extract_job(&mut job).await
            },
            |err| err.is_retryable() && !gate.breaker().is_open() && !gate.is_cancelled(),
        )
        .await;

        let retried = attempts.load(Ordering::Relaxed).saturating_sub(1);
        if retried > 0 {
            self.retries.fetch_add(retried as u64, Ordering::Relaxed);
            debug!(worker = self.id, row = index, retries = retried, "Row needed retries");
        }

        result
    }
}
