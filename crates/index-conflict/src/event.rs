// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event records as they travel between the parser and the index.
//!
//! An [`EventRecord`] owns three things that must stay consistent with each other:
//!
//! - **Field groups**: named sub-trees grouping fields by origin (`syslog`, `http`, ...).
//!   Client-submitted JSON lives in the *tenant group*, a group named after the customer id
//!   whose tree holds a `json` key.
//! - **Facet index**: category name (`facet`, `numeric`, ...) to the dotted paths indexed under
//!   it. Paths inside the tenant group are written without the customer-id prefix
//!   (`json.field1`); paths in every other group start with the group name (`syslog.appName`).
//! - **Notifications**: an append-only audit trail of repairs applied to the record.
//!
//! The removal helpers prefixed with `drop_` prune the facet index in the same call, so no facet
//! path outlives the field it points at.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

use crate::error::SourceError;

/// Parsed syslog header fields. Always well typed, so it survives the safe fallback.
pub const SYSLOG_GROUP: &str = "syslog";
/// Client-submitted JSON. Rules name it; records store it under the tenant group.
pub const JSON_GROUP: &str = "json";
/// Document key holding the facet index.
pub const FACETS_FIELD: &str = "_fnames";
/// Document key holding materialised notifications.
pub const NOTIFICATIONS_GROUP: &str = "notifications";
/// Document key holding the customer id.
pub const CUSTOMER_ID_FIELD: &str = "_custid";

const UNKNOWN_CUSTOMER_ID: &str = "-1";
const NO_FAILURE_REASON: &str = "No failure reason";

/// Groups kept by the safe fallback: syslog plus record metadata set by the pipeline itself.
pub const DEFAULT_FALLBACK_GROUPS: &[&str] = &[
    SYSLOG_GROUP,
    "tag",
    "logtype",
    NOTIFICATIONS_GROUP,
    "_rects",
    "_recseq",
    "_refts",
    "_idxts",
    CUSTOMER_ID_FIELD,
    "_senderip",
    "_logmsg",
    "_unparsed",
    "_unparsedmsg",
    "_logsize",
    "_sample",
    "_parser",
];

/// Closed taxonomy of notification kinds attached to events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationKey {
    MaxFieldsLimitReached,
    MaxTagsLimitReached,
    InvalidTags,
    TimestampBelowFloor,
    TimestampAboveCeiling,
    ScrubbedKeys,
    ScrubbedValues,
    TimezoneMissing,
    EventClockOrTimezoneWrong,
    SyslogClockOrTimezoneWrong,
    /// Syslog clock drift relative to the reception timestamp.
    SyslogClockDrift,
    /// Event clock drift relative to the reception timestamp.
    EventClockDrift,
    FieldNameMaxSizeReached,
    MappingConflict,
    MaxCustomFieldsLimitReached,
    DerivedFieldTypeMismatch,
    InvalidTimestamp,
    FieldDepthLimitReached,
}

impl NotificationKey {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKey::MaxFieldsLimitReached => "MaxFieldsLimitReached",
            NotificationKey::MaxTagsLimitReached => "MaxTagsLimitReached",
            NotificationKey::InvalidTags => "InvalidTags",
            NotificationKey::TimestampBelowFloor => "TimestampBelowFloor",
            NotificationKey::TimestampAboveCeiling => "TimestampAboveCeiling",
            NotificationKey::ScrubbedKeys => "ScrubbedKeys",
            NotificationKey::ScrubbedValues => "ScrubbedValues",
            NotificationKey::TimezoneMissing => "TimezoneMissing",
            NotificationKey::EventClockOrTimezoneWrong => "EventClockOrTimezoneWrong",
            NotificationKey::SyslogClockOrTimezoneWrong => "SyslogClockOrTimezoneWrong",
            NotificationKey::SyslogClockDrift => "SyslogClockDrift",
            NotificationKey::EventClockDrift => "EventClockDrift",
            NotificationKey::FieldNameMaxSizeReached => "FieldNameMaxSizeReached",
            NotificationKey::MappingConflict => "MappingConflict",
            NotificationKey::MaxCustomFieldsLimitReached => "MaxCustomFieldsLimitReached",
            NotificationKey::DerivedFieldTypeMismatch => "DerivedFieldTypeMismatch",
            NotificationKey::InvalidTimestamp => "InvalidTimestamp",
            NotificationKey::FieldDepthLimitReached => "FieldDepthLimitReached",
        }
    }
}

impl fmt::Display for NotificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a record's audit trail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKey,
    pub message: String,
}

/// One log event: tenant id, nested field groups, facet index and notifications.
#[derive(Clone, Debug, PartialEq)]
pub struct EventRecord {
    customer_id: String,
    field_groups: Map<String, Value>,
    facet_index: BTreeMap<String, Vec<String>>,
    notifications: Vec<Notification>,
}

impl Default for EventRecord {
    fn default() -> Self {
        EventRecord::new(UNKNOWN_CUSTOMER_ID)
    }
}

impl EventRecord {
    #[must_use]
    pub fn new(customer_id: impl Into<String>) -> Self {
        EventRecord {
            customer_id: customer_id.into(),
            field_groups: Map::new(),
            facet_index: BTreeMap::new(),
            notifications: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_field_group(mut self, name: impl Into<String>, tree: Value) -> Self {
        self.set_field_group(name, tree);
        self
    }

    #[must_use]
    pub fn with_facets<I, S>(mut self, category: impl Into<String>, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.facet_index
            .entry(category.into())
            .or_default()
            .extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn customer_id(&self) -> &str {
        &self.customer_id
    }

    pub fn field_groups(&self) -> &Map<String, Value> {
        &self.field_groups
    }

    pub fn facet_index(&self) -> &BTreeMap<String, Vec<String>> {
        &self.facet_index
    }

    /// Paths indexed under `category`, in insertion order.
    pub fn facets(&self, category: &str) -> &[String] {
        self.facet_index.get(category).map_or(&[], Vec::as_slice)
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn contains_field_group(&self, name: &str) -> bool {
        self.field_groups.contains_key(name)
    }

    pub fn field_group(&self, name: &str) -> Option<&Value> {
        self.field_groups.get(name)
    }

    /// The group's tree, if the group exists and is a map.
    pub fn field_group_mut(&mut self, name: &str) -> Option<&mut Map<String, Value>> {
        self.field_groups.get_mut(name)?.as_object_mut()
    }

    pub fn set_field_group(&mut self, name: impl Into<String>, tree: Value) {
        self.field_groups.insert(name.into(), tree);
    }

    pub fn add_facet(&mut self, category: impl Into<String>, path: impl Into<String>) {
        self.facet_index
            .entry(category.into())
            .or_default()
            .push(path.into());
    }

    /// Looks up a dotted path whose first segment names a field group.
    ///
    /// Paths with fewer than two segments, or that cross a non-map node, resolve to nothing.
    pub fn get_field(&self, path: &str) -> Option<&Value> {
        let (group, rest) = path.split_once('.')?;
        let mut node = self.field_groups.get(group)?;
        for segment in rest.split('.') {
            node = node.as_object()?.get(segment)?;
        }
        Some(node)
    }

    /// Removes the field at a dotted path and returns it. A path that does not resolve is a no-op.
    ///
    /// The facet index is left untouched; see [`EventRecord::drop_field`].
    pub fn remove_field(&mut self, path: &str) -> Option<Value> {
        let (group, rest) = path.split_once('.')?;
        let segments: Vec<&str> = rest.split('.').collect();
        let (leaf, parents) = segments.split_last()?;
        let mut node = self.field_groups.get_mut(group)?.as_object_mut()?;
        for segment in parents {
            node = node.get_mut(*segment)?.as_object_mut()?;
        }
        node.shift_remove(*leaf)
    }

    /// Removes a whole field group without touching the facet index.
    pub fn remove_field_group(&mut self, name: &str) -> Option<Value> {
        self.field_groups.shift_remove(name)
    }

    /// Removes facet entries equal to `path` (`exact`) or nested under `path` (`!exact`)
    /// from every category. Surviving entries keep their relative order.
    pub fn prune_facet(&mut self, path: &str, exact: bool) {
        let prefix = format!("{path}.");
        for paths in self.facet_index.values_mut() {
            if exact {
                paths.retain(|p| p != path);
            } else {
                paths.retain(|p| !p.starts_with(&prefix));
            }
        }
    }

    /// Removes the facet entry for `path` and everything nested under it.
    pub fn prune_facet_tree(&mut self, path: &str) {
        self.prune_facet(path, true);
        self.prune_facet(path, false);
    }

    /// Removes a field and every facet entry pointing at it or below it.
    pub fn drop_field(&mut self, path: &str) -> Option<Value> {
        let removed = self.remove_field(path)?;
        let facet = self.facet_path(path).to_string();
        self.prune_facet_tree(&facet);
        Some(removed)
    }

    /// Removes a field group and every facet entry rooted in it.
    pub fn drop_field_group(&mut self, name: &str) -> Option<Value> {
        let removed = self.remove_field_group(name)?;
        for root in self.group_facet_roots(name, &removed) {
            self.prune_facet_tree(&root);
        }
        Some(removed)
    }

    pub fn append_notification(&mut self, kind: NotificationKey, message: impl Into<String>) {
        self.notifications.push(Notification {
            kind,
            message: message.into(),
        });
    }

    /// Keeps only the named group and the facet entries that still resolve under it.
    pub fn truncate_to_group(&mut self, name: &str) {
        self.retain_groups(&[name]);
    }

    /// Keeps only the listed groups and the facet entries that still resolve under them.
    pub fn retain_groups<S: AsRef<str>>(&mut self, names: &[S]) {
        self.field_groups
            .retain(|group, _| names.iter().any(|name| name.as_ref() == group.as_str()));

        let roots: Vec<String> = self
            .field_groups
            .iter()
            .flat_map(|(group, tree)| self.group_facet_roots(group, tree))
            .collect();
        for paths in self.facet_index.values_mut() {
            paths.retain(|path| roots.iter().any(|root| is_under(path, root)));
        }
    }

    /// Converts a tree path (`12345.json.field1`) to the facet path it is indexed under
    /// (`json.field1`). Paths outside the tenant group are returned unchanged.
    pub fn facet_path<'a>(&self, path: &'a str) -> &'a str {
        path.strip_prefix(self.customer_id.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(path)
    }

    fn group_facet_roots(&self, group: &str, tree: &Value) -> Vec<String> {
        if group == self.customer_id {
            tree.as_object()
                .map(|fields| fields.keys().cloned().collect())
                .unwrap_or_default()
        } else {
            vec![group.to_string()]
        }
    }

    /// Builds a record from an indexed document.
    ///
    /// `_custid` becomes the customer id (and stays in the tree), `_fnames` becomes the facet
    /// index and the `notifications` list becomes the audit trail.
    pub fn from_source(source: Value) -> Result<Self, SourceError> {
        let Value::Object(mut field_groups) = source else {
            return Err(SourceError::NotAnObject);
        };

        let customer_id = match field_groups.get(CUSTOMER_ID_FIELD) {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => UNKNOWN_CUSTOMER_ID.to_string(),
        };

        let facet_index = match field_groups.shift_remove(FACETS_FIELD) {
            Some(facets) => serde_json::from_value(facets)
                .map_err(|_| SourceError::InvalidFacets(FACETS_FIELD))?,
            None => BTreeMap::new(),
        };

        let notifications = match field_groups.shift_remove(NOTIFICATIONS_GROUP) {
            Some(Value::Array(entries)) => entries
                .into_iter()
                .filter_map(|entry| match serde_json::from_value(entry) {
                    Ok(notification) => Some(notification),
                    Err(e) => {
                        warn!("Dropping unreadable notification: {e}");
                        None
                    }
                })
                .collect(),
            Some(_) => {
                warn!("Ignoring `{NOTIFICATIONS_GROUP}` field that is not a list");
                Vec::new()
            }
            None => Vec::new(),
        };

        Ok(EventRecord {
            customer_id,
            field_groups,
            facet_index,
            notifications,
        })
    }

    /// Materialises the record as the document sent to the index.
    pub fn to_source(&self) -> Value {
        let mut source = self.field_groups.clone();
        if !self.facet_index.is_empty() {
            let facets = self
                .facet_index
                .iter()
                .map(|(category, paths)| (category.clone(), Value::from(paths.clone())))
                .collect();
            source.insert(FACETS_FIELD.to_string(), Value::Object(facets));
        }
        if !self.notifications.is_empty() {
            let entries = self
                .notifications
                .iter()
                .map(|n| serde_json::json!({ "type": n.kind.as_str(), "message": n.message }))
                .collect();
            source.insert(NOTIFICATIONS_GROUP.to_string(), Value::Array(entries));
        }
        Value::Object(source)
    }
}

fn is_under(path: &str, root: &str) -> bool {
    path.strip_prefix(root)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
}

/// A record the index rejected, paired with the reason it gave.
#[derive(Clone, Debug, PartialEq)]
pub struct FailedSubmission {
    record: EventRecord,
    failure_reason: String,
}

impl FailedSubmission {
    pub fn new(record: EventRecord, failure_reason: impl Into<String>) -> Self {
        FailedSubmission {
            record,
            failure_reason: failure_reason.into(),
        }
    }

    pub fn without_reason(record: EventRecord) -> Self {
        FailedSubmission::new(record, NO_FAILURE_REASON)
    }

    pub fn record(&self) -> &EventRecord {
        &self.record
    }

    pub fn failure_reason(&self) -> &str {
        &self.failure_reason
    }

    pub fn into_parts(self) -> (EventRecord, String) {
        (self.record, self.failure_reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> EventRecord {
        EventRecord::new("12345")
            .with_field_group(
                "12345",
                json!({
                    "json": {
                        "field1": 10,
                        "inner1": { "latitude": 1.5, "location": "here" },
                        "field2": "x"
                    }
                }),
            )
            .with_field_group("syslog", json!({ "appName": "web", "host": "h1" }))
            .with_field_group("http", json!({ "clientHost": "10.0.0.1" }))
            .with_field_group("_idxts", json!(1_500_000_000))
            .with_facets(
                "facet",
                [
                    "json.field1",
                    "json.field10",
                    "json.inner1.latitude",
                    "json.inner1.location",
                    "json.field2",
                    "syslog.appName",
                    "http.clientHost",
                ],
            )
            .with_facets("numeric", ["json.field1", "json.inner1.latitude"])
    }

    #[test]
    fn test_get_field() {
        let record = record();
        assert_eq!(record.get_field("12345.json.field1"), Some(&json!(10)));
        assert_eq!(record.get_field("syslog.appName"), Some(&json!("web")));
        assert_eq!(
            record.get_field("12345.json.inner1.location"),
            Some(&json!("here"))
        );
    }

    #[test]
    fn test_get_field_needs_two_segments() {
        let record = record();
        assert_eq!(record.get_field("syslog"), None);
        assert_eq!(record.get_field("_idxts"), None);
    }

    #[test]
    fn test_get_field_through_scalar() {
        let record = record();
        assert_eq!(record.get_field("12345.json.field1.deeper"), None);
        assert_eq!(record.get_field("missing.field"), None);
    }

    #[test]
    fn test_remove_field() {
        let mut record = record();
        assert_eq!(
            record.remove_field("12345.json.inner1"),
            Some(json!({ "latitude": 1.5, "location": "here" }))
        );
        assert_eq!(record.get_field("12345.json.inner1"), None);
        assert_eq!(record.get_field("12345.json.field2"), Some(&json!("x")));
        // facets are not touched by the raw removal
        assert!(record
            .facets("facet")
            .contains(&"json.inner1.latitude".to_string()));
    }

    #[test]
    fn test_remove_field_keeps_sibling_order() {
        let mut record = record();
        record.remove_field("12345.json.field1");
        let keys: Vec<&String> = record
            .get_field("12345.json")
            .and_then(Value::as_object)
            .map(|m| m.keys().collect())
            .unwrap_or_default();
        assert_eq!(keys, vec!["inner1", "field2"]);
    }

    #[test]
    fn test_remove_field_missing_is_noop() {
        let mut record = record();
        let before = record.clone();
        assert_eq!(record.remove_field("12345.json.nope"), None);
        assert_eq!(record.remove_field("12345.json.field1.deeper"), None);
        assert_eq!(record.remove_field("nope.field"), None);
        assert_eq!(record.remove_field("syslog"), None);
        assert_eq!(record, before);
    }

    #[test]
    fn test_prune_facet_exact() {
        let mut record = record();
        record.prune_facet("json.field1", true);
        assert_eq!(
            record.facets("facet"),
            &[
                "json.field10",
                "json.inner1.latitude",
                "json.inner1.location",
                "json.field2",
                "syslog.appName",
                "http.clientHost"
            ]
        );
        assert_eq!(record.facets("numeric"), &["json.inner1.latitude"]);
    }

    #[test]
    fn test_prune_facet_subtree() {
        let mut record = record();
        record.prune_facet("json.inner1", false);
        assert_eq!(
            record.facets("facet"),
            &[
                "json.field1",
                "json.field10",
                "json.field2",
                "syslog.appName",
                "http.clientHost"
            ]
        );
        assert_eq!(record.facets("numeric"), &["json.field1"]);
    }

    #[test]
    fn test_drop_field_prunes_nested_facets() {
        let mut record = record();
        assert!(record.drop_field("12345.json.inner1").is_some());
        assert!(!record
            .facets("facet")
            .iter()
            .any(|p| p.starts_with("json.inner1")));
        assert!(record.facets("facet").contains(&"json.field1".to_string()));
    }

    #[test]
    fn test_drop_tenant_group_prunes_json_facets() {
        let mut record = record();
        assert!(record.drop_field_group("12345").is_some());
        assert_eq!(
            record.facets("facet"),
            &["syslog.appName", "http.clientHost"]
        );
        assert!(record.facets("numeric").is_empty());
    }

    #[test]
    fn test_facet_path() {
        let record = record();
        assert_eq!(record.facet_path("12345.json.field1"), "json.field1");
        assert_eq!(record.facet_path("http.clientHost"), "http.clientHost");
        assert_eq!(record.facet_path("123456.json"), "123456.json");
    }

    #[test]
    fn test_truncate_to_group() {
        let mut record = record();
        record.truncate_to_group("syslog");
        assert_eq!(record.field_groups().len(), 1);
        assert!(record.contains_field_group("syslog"));
        assert_eq!(record.facets("facet"), &["syslog.appName"]);
        assert!(record.facets("numeric").is_empty());
    }

    #[test]
    fn test_retain_groups() {
        let mut record = record();
        record.retain_groups(DEFAULT_FALLBACK_GROUPS);
        let groups: Vec<&String> = record.field_groups().keys().collect();
        assert_eq!(groups, vec!["syslog", "_idxts"]);
    }

    #[test]
    fn test_append_notification_does_not_dedupe() {
        let mut record = record();
        record.append_notification(NotificationKey::MappingConflict, "same");
        record.append_notification(NotificationKey::MappingConflict, "same");
        assert_eq!(record.notifications().len(), 2);
    }

    #[test]
    fn test_source_round_trip() {
        let mut record = record().with_field_group(CUSTOMER_ID_FIELD, json!("12345"));
        record.append_notification(NotificationKey::ScrubbedKeys, "scrubbed");

        let source = record.to_source();
        assert_eq!(
            source["notifications"],
            json!([{ "type": "ScrubbedKeys", "message": "scrubbed" }])
        );
        assert_eq!(source["_fnames"]["numeric"], json!(["json.field1", "json.inner1.latitude"]));

        let parsed = EventRecord::from_source(source).expect("source should parse");
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_from_source_numeric_customer_id() {
        let parsed = EventRecord::from_source(json!({ "_custid": 42, "syslog": {} }))
            .expect("source should parse");
        assert_eq!(parsed.customer_id(), "42");
    }

    #[test]
    fn test_from_source_rejects_non_object() {
        assert_eq!(
            EventRecord::from_source(json!([1, 2])),
            Err(SourceError::NotAnObject)
        );
        assert_eq!(
            EventRecord::from_source(json!({ "_fnames": { "facet": 3 } })),
            Err(SourceError::InvalidFacets(FACETS_FIELD))
        );
    }

    #[test]
    fn test_failed_submission_default_reason() {
        let failed = FailedSubmission::without_reason(EventRecord::default());
        assert_eq!(failed.failure_reason(), "No failure reason");
        assert_eq!(failed.record().customer_id(), "-1");
    }
}
