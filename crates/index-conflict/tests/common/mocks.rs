// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock index for driving the retry coordinator end to end

use index_conflict::{
    BulkRequest, BulkResponse, BulkSubmitter, EventRecord, FailureStatus, ItemResponse,
    TransportError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::sync::oneshot;

/// Index whose mapping has `json.field1` as an object, so any event carrying a concrete
/// `json.field1` is rejected with a mapping conflict.
///
/// The first `overloaded_rounds` submissions reject every item as overloaded.
#[derive(Default)]
pub struct MockIndex {
    overloaded_rounds: AtomicUsize,
    rejected_status: Option<u16>,
    requests: Mutex<Vec<BulkRequest>>,
}

#[allow(dead_code)]
impl MockIndex {
    pub fn new() -> Self {
        MockIndex::default()
    }

    pub fn overloaded_for(rounds: usize) -> Self {
        MockIndex {
            overloaded_rounds: AtomicUsize::new(rounds),
            ..MockIndex::default()
        }
    }

    /// Rejects records carrying `http` with the given status instead of accepting them.
    pub fn rejecting_http_with(status: u16) -> Self {
        MockIndex {
            rejected_status: Some(status),
            ..MockIndex::default()
        }
    }

    pub fn requests(&self) -> Vec<BulkRequest> {
        self.requests.lock().expect("lock poisoned").clone()
    }

    /// Records the request and answers it synchronously.
    pub fn respond_to(&self, request: &BulkRequest) -> BulkResponse {
        self.requests
            .lock()
            .expect("lock poisoned")
            .push(request.clone());

        let overloaded = self
            .overloaded_rounds
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        let items = request
            .items()
            .iter()
            .map(|item| match self.respond(&item.record, overloaded) {
                (200, _) => ItemResponse::Success,
                (status, message) => {
                    ItemResponse::failure(FailureStatus::from_status_code(status), message)
                }
            })
            .collect();
        BulkResponse::new(items)
    }

    fn respond(&self, record: &EventRecord, overloaded: bool) -> (u16, String) {
        let conflicting = format!("{}.json.field1", record.customer_id());
        if overloaded {
            (
                429,
                "EsRejectedExecutionException[rejected execution]".to_string(),
            )
        } else if let (Some(status), true) =
            (self.rejected_status, record.contains_field_group("http"))
        {
            (status, "index_closed_exception".to_string())
        } else if record.get_field(&conflicting).is_some() {
            (
                400,
                format!("MapperParsingException[failed to parse [{conflicting}]]"),
            )
        } else {
            (200, String::new())
        }
    }
}

#[async_trait::async_trait]
impl BulkSubmitter for MockIndex {
    async fn submit(&self, request: &BulkRequest) -> Result<BulkResponse, TransportError> {
        Ok(self.respond_to(request))
    }
}

/// Answers every submission from a freshly spawned OS thread, outside the async runtime.
pub struct ThreadedIndex {
    index: Arc<MockIndex>,
}

impl ThreadedIndex {
    pub fn new(index: Arc<MockIndex>) -> Self {
        ThreadedIndex { index }
    }
}

#[async_trait::async_trait]
impl BulkSubmitter for ThreadedIndex {
    async fn submit(&self, request: &BulkRequest) -> Result<BulkResponse, TransportError> {
        let (tx, rx) = oneshot::channel();
        let index = Arc::clone(&self.index);
        let request = request.clone();
        thread::spawn(move || {
            let _ = tx.send(index.respond_to(&request));
        });
        rx.await
            .map_err(|_| TransportError::submit(None, "responder thread went away"))
    }
}

/// Submitter whose channel is always down.
#[allow(dead_code)]
pub struct UnreachableIndex;

#[async_trait::async_trait]
impl BulkSubmitter for UnreachableIndex {
    async fn submit(&self, _request: &BulkRequest) -> Result<BulkResponse, TransportError> {
        Err(TransportError::submit(Some(503), "service unavailable"))
    }
}
