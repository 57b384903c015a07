// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bulk submission with bounded, backing-off retry.
//!
//! One [`RetryCoordinator::run`] call drives one session:
//!
//! ```text
//!   Pending ──> Submitting ──> Succeeded
//!                  │   ^
//!                  │   └── AwaitingRetry <── (retryable failures, delay available)
//!                  └─────> Failed            (non-retryable item or no delay left)
//! ```
//!
//! After each round, successful items are accumulated as final. Failed items are resent only when
//! every failure in the round is retryable: overloaded items go back unchanged, mapping conflicts
//! go back repaired by the [`ConflictResolutionEngine`]. A single non-retryable item ends the
//! session for the whole batch.
//!
//! Retries are handed back to the session through a oneshot channel by the [`Scheduler`]'s task,
//! so the resubmission may run on another worker thread than the one that scheduled it.

use std::iter::Peekable;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error, trace};

use crate::bulk::{
    BulkItem, BulkRequest, BulkResponse, BulkSubmitter, FailureStatus, ItemResponse,
};
use crate::engine::ConflictResolutionEngine;
use crate::error::TransportError;
use crate::event::FailedSubmission;
use crate::scheduler::{ScheduledHandle, Scheduler, TokioScheduler};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Submitting,
    AwaitingRetry,
    Succeeded,
    Failed,
}

impl SessionState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Succeeded | SessionState::Failed)
    }
}

/// Final response for one item of the caller's batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemOutcome {
    /// Position of the item in the batch passed to [`RetryCoordinator::run`].
    pub index: usize,
    pub response: ItemResponse,
}

/// Terminal result of a session.
///
/// Outcomes are in accumulation order: items that succeeded early come before items that
/// needed retries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregatedResult {
    pub outcomes: Vec<ItemOutcome>,
    /// Monotonic time from session start to completion, backoff delays included.
    pub took: Duration,
    /// Number of submissions made.
    pub rounds: usize,
    pub state: SessionState,
}

impl AggregatedResult {
    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|outcome| outcome.response.is_failed())
    }

    pub fn successes(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| !outcome.response.is_failed())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.response.is_failed())
    }
}

/// Resubmits failed bulk items, repairing mapping conflicts on the way.
#[derive(Clone)]
pub struct RetryCoordinator {
    engine: Arc<ConflictResolutionEngine>,
    scheduler: Arc<dyn Scheduler>,
}

impl RetryCoordinator {
    pub fn new(engine: Arc<ConflictResolutionEngine>) -> Self {
        RetryCoordinator::with_scheduler(engine, Arc::new(TokioScheduler))
    }

    pub fn with_scheduler(
        engine: Arc<ConflictResolutionEngine>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        RetryCoordinator { engine, scheduler }
    }

    /// Submits `request` until every item succeeded, an item failed for a non-retryable reason,
    /// or `backoff` ran out of delays.
    ///
    /// Per-item failures are reported inside the result. Only a failure of the submission itself
    /// is returned as an error, after any scheduled retry has been cancelled.
    pub async fn run<S, B>(
        &self,
        request: BulkRequest,
        submitter: &S,
        backoff: B,
    ) -> Result<AggregatedResult, TransportError>
    where
        S: BulkSubmitter + ?Sized,
        B: IntoIterator<Item = Duration>,
        B::IntoIter: Send,
    {
        let mut session = RetrySession::new(backoff.into_iter());
        let mut current = request;

        loop {
            session.transition(SessionState::Submitting);
            session.rounds += 1;
            debug!(
                "Submitting bulk request with {} items, round {}",
                current.len(),
                session.rounds
            );

            let response = match submitter.submit(&current).await {
                Ok(response) => response,
                Err(e) => {
                    error!("Bulk submission failed: {e}");
                    session.abort();
                    return Err(e);
                }
            };
            if response.items.len() != current.len() {
                session.abort();
                return Err(TransportError::ResponseMismatch {
                    expected: current.len(),
                    received: response.items.len(),
                });
            }

            if !response.has_failures() {
                session.add_responses(current, response);
                return Ok(session.finish(SessionState::Succeeded));
            }

            let delay = if session.can_retry(&response) {
                session.backoff.next()
            } else {
                None
            };
            let Some(delay) = delay else {
                debug!("Bulk request has failures that will not be retried");
                session.add_responses(current, response);
                return Ok(session.finish(SessionState::Failed));
            };

            let retry = self.prepare_retry(&session, current, response);
            session.transition(SessionState::AwaitingRetry);
            debug!(
                "Retrying {} items of bulk request in {} ms",
                retry.len(),
                delay.as_millis()
            );
            let (handle, next) = self.schedule_retry(delay, retry);
            session.set_pending(handle);
            current = match next.await {
                Ok(next) => next,
                Err(_) => {
                    let e = TransportError::RetryDropped;
                    error!("Bulk retry could not be resubmitted: {e}");
                    session.abort();
                    return Err(e);
                }
            };
        }
    }

    /// Settles this round's successes and builds the next request from its failures.
    fn prepare_retry<I>(
        &self,
        session: &RetrySession<I>,
        current: BulkRequest,
        response: BulkResponse,
    ) -> BulkRequest
    where
        I: Iterator<Item = Duration>,
    {
        let mut settled = Vec::new();
        let mut retry = Vec::new();

        for (item, item_response) in current.into_items().into_iter().zip(response.items) {
            match item_response {
                ItemResponse::Success => settled.push(ItemOutcome {
                    index: item.index,
                    response: ItemResponse::Success,
                }),
                ItemResponse::Failure {
                    status: FailureStatus::MappingConflict,
                    message,
                } => {
                    if !self.engine.is_mapping_conflict(&message) {
                        debug!(
                            "Item {} rejected without a mapping conflict marker, resending unchanged",
                            item.index
                        );
                    }
                    let record = self
                        .engine
                        .resolve(FailedSubmission::new(item.record, message));
                    retry.push(BulkItem {
                        index: item.index,
                        record,
                    });
                }
                ItemResponse::Failure {
                    status: FailureStatus::TransientOverload,
                    ..
                } => retry.push(item),
                failure @ ItemResponse::Failure { .. } => settled.push(ItemOutcome {
                    index: item.index,
                    response: failure,
                }),
            }
        }

        session.add_outcomes(settled);
        BulkRequest::from_items(retry)
    }

    /// The scheduled task hands `retry` back through the returned receiver once `delay` elapsed.
    fn schedule_retry(
        &self,
        delay: Duration,
        retry: BulkRequest,
    ) -> (ScheduledHandle, oneshot::Receiver<BulkRequest>) {
        let (tx, rx) = oneshot::channel();
        let handle = self.scheduler.schedule(
            delay,
            Box::pin(async move {
                if tx.send(retry).is_err() {
                    trace!("Retry session ended before its scheduled retry fired");
                }
            }),
        );
        (handle, rx)
    }
}

struct RetrySession<I: Iterator<Item = Duration>> {
    backoff: Peekable<I>,
    // Accumulated across rounds; a round's completion may run on a different worker thread.
    responses: Mutex<Vec<ItemOutcome>>,
    pending: Mutex<Option<ScheduledHandle>>,
    state: Mutex<SessionState>,
    started: Instant,
    rounds: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<I: Iterator<Item = Duration>> RetrySession<I> {
    fn new(backoff: I) -> Self {
        RetrySession {
            backoff: backoff.peekable(),
            responses: Mutex::new(Vec::new()),
            pending: Mutex::new(None),
            state: Mutex::new(SessionState::Pending),
            started: Instant::now(),
            rounds: 0,
        }
    }

    fn transition(&self, next: SessionState) {
        let mut state = lock(&self.state);
        trace!("Retry session {:?} -> {:?}", *state, next);
        *state = next;
    }

    /// Retrying needs another delay and only retryable failures in the round.
    fn can_retry(&mut self, response: &BulkResponse) -> bool {
        if self.backoff.peek().is_none() {
            debug!("Backoff exhausted after {} rounds", self.rounds);
            return false;
        }
        response.items.iter().all(|item| match item {
            ItemResponse::Success => true,
            ItemResponse::Failure { status, .. } => status.is_retryable(),
        })
    }

    fn add_responses(&self, request: BulkRequest, response: BulkResponse) {
        let outcomes = request
            .into_items()
            .into_iter()
            .zip(response.items)
            .map(|(item, response)| ItemOutcome {
                index: item.index,
                response,
            })
            .collect();
        self.add_outcomes(outcomes);
    }

    fn add_outcomes(&self, outcomes: Vec<ItemOutcome>) {
        lock(&self.responses).extend(outcomes);
    }

    fn set_pending(&self, handle: ScheduledHandle) {
        if let Some(previous) = lock(&self.pending).replace(handle) {
            previous.cancel();
        }
    }

    fn cancel_pending(&self) {
        if let Some(handle) = lock(&self.pending).take() {
            handle.cancel();
        }
    }

    fn abort(&self) {
        self.cancel_pending();
        self.transition(SessionState::Failed);
    }

    fn finish(&self, state: SessionState) -> AggregatedResult {
        self.cancel_pending();
        self.transition(state);
        let outcomes = std::mem::take(&mut *lock(&self.responses));
        AggregatedResult {
            outcomes,
            took: self.started.elapsed(),
            rounds: self.rounds,
            state,
        }
    }
}

impl<I: Iterator<Item = Duration>> Drop for RetrySession<I> {
    // Cancels the retry timer of a session dropped mid-backoff.
    fn drop(&mut self) {
        self.cancel_pending();
    }
}
