// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Resilience layer in front of a schema-enforcing, multi-tenant index.
//!
//! Records rejected because a field's type conflicts with the index mapping are repaired by the
//! [`ConflictResolutionEngine`], which removes the offending field (or group of fields) according
//! to a rule chain. The [`RetryCoordinator`] resubmits repaired and transiently rejected records
//! with a bounded backoff and reports one [`AggregatedResult`] per batch.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod backoff;
pub mod bulk;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod event;
pub mod logger;
pub mod resolver;
pub mod rules;
pub mod scheduler;

pub use backoff::BackoffPolicy;
pub use bulk::{BulkItem, BulkRequest, BulkResponse, BulkSubmitter, FailureStatus, ItemResponse};
pub use config::ResilienceConfig;
pub use coordinator::{AggregatedResult, ItemOutcome, RetryCoordinator, SessionState};
pub use engine::ConflictResolutionEngine;
pub use error::{ConfigError, TransportError};
pub use event::{EventRecord, FailedSubmission, Notification, NotificationKey};
