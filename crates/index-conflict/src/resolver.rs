// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Compiled mapping-conflict resolvers.
//!
//! Each resolver is built from one [`ResolverRule`]. Once a resolver's trigger matches it owns
//! the conflict and walks its own escalation ladder until the record is indexable:
//!
//! ```text
//!   remove-single-field:  field ──> field group ──> safe fallback
//!   remove-json-fields:   field group ──> safe fallback
//! ```

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ConfigError;
use crate::event::{EventRecord, NotificationKey, DEFAULT_FALLBACK_GROUPS, JSON_GROUP};
use crate::rules::{ResolverRule, RuleKind};

/// Notification attached when no rule could identify the conflicting field.
pub const UNRESOLVED_NOTIFICATION: &str = "Encountered mapping conflict while attempting to index event and was unable to resolve the conflict. Removed all fields.";

/// Where a single-field resolver looks for the field named in a failure reason.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldTarget {
    /// The capture is a full dotted path, group first.
    FullyQualified,
    /// The capture is a bare key, searched for inside the named group.
    Within(String),
}

/// One link of the resolver chain.
#[derive(Clone, Debug)]
pub enum ConflictResolver {
    RemoveSingleField {
        patterns: Vec<Regex>,
        notification: String,
        target: FieldTarget,
    },
    RemoveFieldGroup {
        patterns: Vec<Regex>,
        notification: String,
        group: String,
    },
}

/// What a matching trigger pattern extracted from the failure reason.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger<'r> {
    Field(&'r str),
    Group,
}

/// Truncates a record to the groups that are always well typed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SafeFallback {
    groups: Vec<String>,
}

impl Default for SafeFallback {
    fn default() -> Self {
        SafeFallback::new(DEFAULT_FALLBACK_GROUPS.iter().copied())
    }
}

impl SafeFallback {
    pub fn new<I, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SafeFallback {
            groups: groups.into_iter().map(Into::into).collect(),
        }
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// Idempotent: a second application leaves the record unchanged.
    pub fn apply(&self, record: &mut EventRecord) {
        record.retain_groups(&self.groups);
    }
}

impl ConflictResolver {
    /// Compiles a validated rule. `index` is the rule's position, used in error messages.
    pub fn from_rule(index: usize, rule: &ResolverRule) -> Result<Self, ConfigError> {
        let patterns = rule
            .trigger_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| ConfigError::InvalidRegex {
                    index,
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let notification = rule.notification_template.clone();

        match rule.kind {
            RuleKind::RemoveSingleField => {
                if let Some(pattern) = patterns.iter().find(|p| p.captures_len() < 2) {
                    return Err(ConfigError::MissingCaptureGroup {
                        index,
                        pattern: pattern.as_str().to_string(),
                    });
                }
                let target = if rule.field_is_fully_qualified {
                    FieldTarget::FullyQualified
                } else {
                    let group = rule
                        .target_field_group
                        .clone()
                        .ok_or(ConfigError::MissingFieldGroup { index })?;
                    FieldTarget::Within(group)
                };
                Ok(ConflictResolver::RemoveSingleField {
                    patterns,
                    notification,
                    target,
                })
            }
            RuleKind::RemoveJsonFields => Ok(ConflictResolver::RemoveFieldGroup {
                patterns,
                notification,
                group: rule
                    .target_field_group
                    .clone()
                    .unwrap_or_else(|| JSON_GROUP.to_string()),
            }),
        }
    }

    pub fn notification(&self) -> &str {
        match self {
            ConflictResolver::RemoveSingleField { notification, .. }
            | ConflictResolver::RemoveFieldGroup { notification, .. } => notification,
        }
    }

    /// Tests `reason` against the trigger patterns in order.
    ///
    /// A single-field pattern only counts as a match when its first capture group participated.
    pub fn matches<'r>(&self, reason: &'r str) -> Option<Trigger<'r>> {
        match self {
            ConflictResolver::RemoveSingleField { patterns, .. } => patterns
                .iter()
                .find_map(|p| p.captures(reason).and_then(|caps| caps.get(1)))
                .map(|field| Trigger::Field(field.as_str())),
            ConflictResolver::RemoveFieldGroup { patterns, .. } => patterns
                .iter()
                .any(|p| p.is_match(reason))
                .then_some(Trigger::Group),
        }
    }

    /// Repairs `record` if this resolver's trigger matches. Returns whether it matched.
    pub fn try_resolve(
        &self,
        record: &mut EventRecord,
        reason: &str,
        fallback: &SafeFallback,
    ) -> bool {
        let Some(trigger) = self.matches(reason) else {
            return false;
        };
        match (self, trigger) {
            (
                ConflictResolver::RemoveSingleField {
                    target: FieldTarget::FullyQualified,
                    ..
                },
                Trigger::Field(path),
            ) => self.remove_qualified(record, path, fallback),
            (
                ConflictResolver::RemoveSingleField {
                    target: FieldTarget::Within(group),
                    ..
                },
                Trigger::Field(name),
            ) => self.remove_unqualified(record, name, group, fallback),
            (ConflictResolver::RemoveFieldGroup { group, .. }, _) => {
                self.remove_group(record, group, fallback);
            }
            (ConflictResolver::RemoveSingleField { .. }, Trigger::Group) => {
                return false;
            }
        }
        true
    }

    fn remove_qualified(&self, record: &mut EventRecord, path: &str, fallback: &SafeFallback) {
        if record.drop_field(path).is_some() {
            let field = record.facet_path(path);
            debug!("Removed field {field} causing mapping conflict");
            record.append_notification(
                NotificationKey::MappingConflict,
                format!(
                    "{} Removed field causing conflict: {field}",
                    self.notification()
                ),
            );
            return;
        }

        let group = path.split('.').next().unwrap_or(path);
        if record.drop_field_group(group).is_some() {
            debug!("Field {path} not found, removed field group {group}");
            record.append_notification(
                NotificationKey::MappingConflict,
                format!("{} Removed all {group} fields.", self.notification()),
            );
            return;
        }

        debug!("Neither field {path} nor its group exist, applying safe fallback");
        fallback.apply(record);
        record.append_notification(
            NotificationKey::MappingConflict,
            format!("{} Removed all fields.", self.notification()),
        );
    }

    fn remove_unqualified(
        &self,
        record: &mut EventRecord,
        name: &str,
        group: &str,
        fallback: &SafeFallback,
    ) {
        let group_key = group_key(record, group);
        let Some(tree) = record.field_group_mut(&group_key) else {
            debug!("Field group {group} is missing, applying safe fallback");
            fallback.apply(record);
            record.append_notification(
                NotificationKey::MappingConflict,
                format!("{} Removed all fields.", self.notification()),
            );
            return;
        };

        let mut path = Vec::new();
        if search_and_remove(tree, name, &mut path).is_some() {
            let tree_path = format!("{group_key}.{}", path.join("."));
            let facet = record.facet_path(&tree_path).to_string();
            record.prune_facet_tree(&facet);
            debug!("Removed field {facet} causing mapping conflict");
            record.append_notification(
                NotificationKey::MappingConflict,
                format!(
                    "{} Removed the field causing the conflict: {name}",
                    self.notification()
                ),
            );
        } else {
            debug!("Field {name} not found in {group}, removing the whole group");
            record.drop_field_group(&group_key);
            record.append_notification(
                NotificationKey::MappingConflict,
                format!("{} Removed all {group} fields.", self.notification()),
            );
        }
    }

    fn remove_group(&self, record: &mut EventRecord, group: &str, fallback: &SafeFallback) {
        let group_key = group_key(record, group);
        if record.drop_field_group(&group_key).is_some() {
            debug!("Removed field group {group} causing mapping conflict");
            record.append_notification(NotificationKey::MappingConflict, self.notification());
        } else {
            debug!("Field group {group} is missing, applying safe fallback");
            fallback.apply(record);
            record.append_notification(NotificationKey::MappingConflict, UNRESOLVED_NOTIFICATION);
        }
    }
}

/// Client JSON is stored under the tenant group, keyed by customer id.
fn group_key(record: &EventRecord, group: &str) -> String {
    if group == JSON_GROUP {
        record.customer_id().to_string()
    } else {
        group.to_string()
    }
}

/// Removes the first key equal to `name`. Each level's own keys are checked before descending
/// into its child maps, in insertion order. On success `path` holds the keys leading to it.
fn search_and_remove(
    node: &mut Map<String, Value>,
    name: &str,
    path: &mut Vec<String>,
) -> Option<Value> {
    if let Some(removed) = node.shift_remove(name) {
        path.push(name.to_string());
        return Some(removed);
    }
    for (key, child) in node.iter_mut() {
        if let Value::Object(child) = child {
            path.push(key.clone());
            if let Some(removed) = search_and_remove(child, name, path) {
                return Some(removed);
            }
            path.pop();
        }
    }
    None
}
