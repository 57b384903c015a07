// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Retry delay sequences.
//!
//! The coordinator only sees a sequence of [`Duration`]s: anything implementing
//! `IntoIterator<Item = Duration>` can drive it, including an unbounded iterator.
//! [`BackoffPolicy`] covers the shapes used in practice.

use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// The same delay `retries` times.
    Constant { delay: Duration, retries: usize },
    /// `initial`, `initial + step`, `initial + 2 * step`, ...
    Linear {
        initial: Duration,
        step: Duration,
        retries: usize,
    },
    /// `initial`, doubling each time, never above `max`.
    Exponential {
        initial: Duration,
        max: Duration,
        retries: usize,
    },
}

impl BackoffPolicy {
    /// A policy that yields no delay at all, so the first failure is final.
    #[must_use]
    pub fn no_backoff() -> Self {
        BackoffPolicy::Constant {
            delay: Duration::ZERO,
            retries: 0,
        }
    }

    #[must_use]
    pub fn retries(&self) -> usize {
        match self {
            BackoffPolicy::Constant { retries, .. }
            | BackoffPolicy::Linear { retries, .. }
            | BackoffPolicy::Exponential { retries, .. } => *retries,
        }
    }

    #[must_use]
    pub fn cursor(&self) -> BackoffCursor {
        BackoffCursor {
            policy: self.clone(),
            attempt: 0,
        }
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        let attempt = u32::try_from(attempt).unwrap_or(u32::MAX);
        match self {
            BackoffPolicy::Constant { delay, .. } => *delay,
            BackoffPolicy::Linear { initial, step, .. } => {
                initial.saturating_add(step.saturating_mul(attempt))
            }
            BackoffPolicy::Exponential { initial, max, .. } => {
                let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
                initial.saturating_mul(factor).min(*max)
            }
        }
    }
}

impl IntoIterator for BackoffPolicy {
    type Item = Duration;
    type IntoIter = BackoffCursor;

    fn into_iter(self) -> Self::IntoIter {
        BackoffCursor {
            policy: self,
            attempt: 0,
        }
    }
}

impl IntoIterator for &BackoffPolicy {
    type Item = Duration;
    type IntoIter = BackoffCursor;

    fn into_iter(self) -> Self::IntoIter {
        self.cursor()
    }
}

/// Position within a [`BackoffPolicy`]'s delay sequence.
#[derive(Clone, Debug)]
pub struct BackoffCursor {
    policy: BackoffPolicy,
    attempt: usize,
}

impl BackoffCursor {
    pub fn has_next(&self) -> bool {
        self.attempt < self.policy.retries()
    }

    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.has_next() {
            return None;
        }
        let delay = self.policy.delay_for(self.attempt);
        self.attempt += 1;
        Some(delay)
    }
}

impl Iterator for BackoffCursor {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        self.next_delay()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.policy.retries().saturating_sub(self.attempt);
        (remaining, Some(remaining))
    }
}
