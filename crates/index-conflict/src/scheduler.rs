// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::trace;

pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Runs a task after a delay.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, task: Task) -> ScheduledHandle;
}

/// Cancels a scheduled task that has not started yet. Dropping the handle does not cancel.
#[derive(Clone, Debug, Default)]
pub struct ScheduledHandle {
    cancel_token: CancellationToken,
}

impl ScheduledHandle {
    pub fn new(cancel_token: CancellationToken) -> Self {
        ScheduledHandle { cancel_token }
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Schedules onto the ambient tokio runtime.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> ScheduledHandle {
        let cancel_token = CancellationToken::new();
        let cancelled = cancel_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancelled.cancelled() => {
                    trace!("Scheduled task cancelled before it ran");
                }
                () = tokio::time::sleep(delay) => task.await,
            }
        });
        ScheduledHandle::new(cancel_token)
    }
}
