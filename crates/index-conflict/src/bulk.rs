// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bulk requests, per-item responses, and the submission seam to the index.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::event::EventRecord;

/// One event in a bulk request, tagged with its position in the caller's original batch.
#[derive(Clone, Debug, PartialEq)]
pub struct BulkItem {
    pub index: usize,
    pub record: EventRecord,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BulkRequest {
    items: Vec<BulkItem>,
}

impl BulkRequest {
    /// Numbers the records by their position in `records`.
    pub fn new(records: impl IntoIterator<Item = EventRecord>) -> Self {
        BulkRequest {
            items: records
                .into_iter()
                .enumerate()
                .map(|(index, record)| BulkItem { index, record })
                .collect(),
        }
    }

    pub fn from_items(items: Vec<BulkItem>) -> Self {
        BulkRequest { items }
    }

    pub fn items(&self) -> &[BulkItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<BulkItem> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Why the index rejected an item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureStatus {
    /// The index is overloaded; resending unchanged may succeed.
    TransientOverload,
    /// A field's type disagrees with the established mapping.
    MappingConflict,
    /// Anything else, carrying the HTTP-like status the index reported.
    Other(u16),
}

impl FailureStatus {
    /// Maps the status codes the index uses: 429 is overload, 400 a mapping conflict.
    #[must_use]
    pub fn from_status_code(code: u16) -> Self {
        match code {
            429 => FailureStatus::TransientOverload,
            400 => FailureStatus::MappingConflict,
            other => FailureStatus::Other(other),
        }
    }

    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureStatus::TransientOverload | FailureStatus::MappingConflict
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ItemResponse {
    Success,
    Failure {
        status: FailureStatus,
        message: String,
    },
}

impl ItemResponse {
    pub fn failure(status: FailureStatus, message: impl Into<String>) -> Self {
        ItemResponse::Failure {
            status,
            message: message.into(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ItemResponse::Failure { .. })
    }
}

/// Per-item results, positionally aligned with the submitted request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BulkResponse {
    pub items: Vec<ItemResponse>,
}

impl BulkResponse {
    pub fn new(items: Vec<ItemResponse>) -> Self {
        BulkResponse { items }
    }

    pub fn has_failures(&self) -> bool {
        self.items.iter().any(ItemResponse::is_failed)
    }
}

/// The call into the index.
///
/// Implementations deliver exactly one response per submitted request, or a transport error
/// when the request as a whole could not be delivered.
#[async_trait]
pub trait BulkSubmitter: Send + Sync {
    async fn submit(&self, request: &BulkRequest) -> Result<BulkResponse, TransportError>;
}
