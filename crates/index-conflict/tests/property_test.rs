// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod common;

use common::{all_facets_resolve, fixture_event};
use index_conflict::resolver::SafeFallback;
use index_conflict::{ConflictResolutionEngine, EventRecord, FailedSubmission};
use proptest::prelude::*;
use serde_json::json;

#[derive(Clone, Debug)]
enum Removal {
    Field(&'static str),
    Group(&'static str),
    Fallback,
}

const FIELDS: &[&str] = &[
    "12345.json.field1",
    "12345.json.field2",
    "12345.json.inner1",
    "12345.json.inner1.latitude",
    "12345.json.inner1.location",
    "12345.json",
    "http.clientHost",
    "syslog.appName",
    "missing.field",
];

const GROUPS: &[&str] = &["12345", "http", "syslog", "_idxts", "missing"];

const FIELD_NAMES: &[&str] = &["field1", "field2", "field3", "inner1", "latitude", "nope"];

fn removal() -> impl Strategy<Value = Removal> {
    prop_oneof![
        4 => prop::sample::select(FIELDS).prop_map(Removal::Field),
        2 => prop::sample::select(GROUPS).prop_map(Removal::Group),
        1 => Just(Removal::Fallback),
    ]
}

fn reason() -> impl Strategy<Value = String> {
    let name = prop::sample::select(FIELD_NAMES);
    prop_oneof![
        name.clone().prop_map(|n| format!(
            "MapperParsingException[failed to parse [12345.json.{n}]]"
        )),
        name.clone().prop_map(|n| format!(
            "MapperParsingException[tried to parse field [{n}] as object, but found a concrete value]"
        )),
        name.prop_map(|n| format!(
            "MapperParsingException[object mapping [{n}] trying to serialize a value with no field associated with it]"
        )),
        Just("MapperParsingException[tried to parse as object, but got EOF]".to_string()),
        Just("MapperParsingException[Unknown error]".to_string()),
    ]
}

fn record_with_groups(groups: &[&'static str]) -> EventRecord {
    let mut record = EventRecord::new("12345");
    for group in groups {
        record.set_field_group(*group, json!({ "value": 1 }));
        record.add_facet("facet", format!("{group}.value"));
    }
    record
}

proptest! {
    #[test]
    fn facets_stay_consistent_under_removals(removals in prop::collection::vec(removal(), 1..8)) {
        let mut record = fixture_event();
        let fallback = SafeFallback::default();
        for removal in removals {
            match removal {
                Removal::Field(path) => { record.drop_field(path); }
                Removal::Group(name) => { record.drop_field_group(name); }
                Removal::Fallback => fallback.apply(&mut record),
            }
            prop_assert!(all_facets_resolve(&record), "dangling facet in {:?}", record.facet_index());
        }
    }

    #[test]
    fn facets_stay_consistent_after_repairs(reasons in prop::collection::vec(reason(), 1..4)) {
        let engine = ConflictResolutionEngine::with_default_rules().expect("engine");
        let mut record = fixture_event();
        for reason in reasons {
            record = engine.resolve(FailedSubmission::new(record, reason));
            prop_assert!(all_facets_resolve(&record), "dangling facet in {:?}", record.facet_index());
        }
    }

    #[test]
    fn fallback_is_idempotent(
        groups in prop::sample::subsequence(vec!["syslog", "http", "_idxts", "tag", "12345", "custom"], 0..6)
    ) {
        let fallback = SafeFallback::default();
        let mut once = record_with_groups(&groups);
        fallback.apply(&mut once);
        let mut twice = once.clone();
        fallback.apply(&mut twice);
        prop_assert_eq!(once, twice);
    }
}
