// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Common fixtures and mocks for integration tests

#[allow(dead_code)]
pub mod mocks;

use index_conflict::EventRecord;

const FIXTURE_EVENT: &str = include_str!("../fixtures/event.json");

#[allow(dead_code)]
pub const CUSTOMER_ID: &str = "12345";

/// Tenant 12345's event with client JSON, http, syslog and metadata groups.
pub fn fixture_event() -> EventRecord {
    let source = serde_json::from_str(FIXTURE_EVENT).expect("fixture is valid JSON");
    EventRecord::from_source(source).expect("fixture is a valid event")
}

/// Whether a facet path still points at a live field, inside or outside the tenant group.
#[allow(dead_code)]
pub fn facet_resolves(record: &EventRecord, facet: &str) -> bool {
    record.get_field(facet).is_some()
        || record
            .get_field(&format!("{}.{facet}", record.customer_id()))
            .is_some()
}

#[allow(dead_code)]
pub fn all_facets_resolve(record: &EventRecord) -> bool {
    record
        .facet_index()
        .values()
        .flatten()
        .all(|facet| facet_resolves(record, facet))
}
