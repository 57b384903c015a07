// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mapping-conflict rule files.
//!
//! Rules are loaded once at startup. Order is significant: the engine tries them top to bottom
//! and the first rule whose regex matches the failure reason handles the conflict.
//!
//! # Format
//!
//! Either a bare list of rules or an object wrapping the list under `mapping_conflicts`:
//!
//! ```json
//! {
//!   "mapping_conflicts": [
//!     {
//!       "type": "remove-single-field",
//!       "regexes": ["failed to parse \\[([^\\]]+)\\]"],
//!       "notification": "Field originally sent as one type and later sent as new type.",
//!       "field_is_fully_qualified": true
//!     },
//!     {
//!       "type": "remove-single-field",
//!       "regexes": ["object mapping \\[([^\\]]+)\\] trying to serialize a value"],
//!       "notification": "Field originally sent as an object and later sent as a concrete value.",
//!       "field_is_fully_qualified": false,
//!       "field_group_containing_field": "json"
//!     },
//!     {
//!       "type": "remove-json-fields",
//!       "regexes": ["tried to parse as object, but got EOF"],
//!       "notification": "Removed all json fields."
//!     }
//!   ]
//! }
//! ```
//!
//! A malformed entry is never skipped: any problem fails the whole load.

use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::ConfigError;

const MAPPING_CONFLICTS_FIELD: &str = "mapping_conflicts";

/// Rules compiled into the binary, used when no rule file is configured.
pub const BUNDLED_RULES: &str = include_str!("../config/mapping-conflicts.json");

/// Repair strategy a rule selects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum RuleKind {
    /// Remove the one field named in the failure reason, escalating to its group when needed.
    #[serde(rename = "remove-single-field", alias = "REMOVE_SINGLE_FIELD")]
    RemoveSingleField,
    /// Remove a whole field group, client JSON by default.
    #[serde(rename = "remove-json-fields", alias = "REMOVE_JSON_FIELDS")]
    RemoveJsonFields,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    #[serde(rename = "type")]
    kind: RuleKind,
    #[serde(default)]
    regexes: Option<Vec<String>>,
    #[serde(default)]
    notification: Option<String>,
    #[serde(default)]
    field_is_fully_qualified: Option<bool>,
    #[serde(default)]
    field_group_containing_field: Option<String>,
}

/// A validated rule, ready to be compiled into a resolver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolverRule {
    pub kind: RuleKind,
    pub trigger_patterns: Vec<String>,
    pub notification_template: String,
    /// For `RemoveSingleField`: whether the captured field is a full dotted path.
    pub field_is_fully_qualified: bool,
    /// For unqualified `RemoveSingleField`: the group searched for the field.
    /// For `RemoveJsonFields`: the group removed, `json` when absent.
    pub target_field_group: Option<String>,
}

impl RawRule {
    fn validate(self, index: usize) -> Result<ResolverRule, ConfigError> {
        let trigger_patterns = self
            .regexes
            .filter(|regexes| !regexes.is_empty())
            .ok_or(ConfigError::MissingRegexes { index })?;
        let notification_template = self
            .notification
            .filter(|notification| !notification.trim().is_empty())
            .ok_or(ConfigError::MissingNotification { index })?;
        let field_group = self
            .field_group_containing_field
            .filter(|group| !group.trim().is_empty());

        let (field_is_fully_qualified, target_field_group) = match self.kind {
            RuleKind::RemoveSingleField => {
                let qualified = self
                    .field_is_fully_qualified
                    .ok_or(ConfigError::MissingQualification { index })?;
                match (qualified, field_group) {
                    (true, None) => (true, None),
                    (true, Some(_)) => return Err(ConfigError::UnexpectedFieldGroup { index }),
                    (false, None) => return Err(ConfigError::MissingFieldGroup { index }),
                    (false, Some(group)) => (false, Some(group)),
                }
            }
            RuleKind::RemoveJsonFields => (false, field_group),
        };

        Ok(ResolverRule {
            kind: self.kind,
            trigger_patterns,
            notification_template,
            field_is_fully_qualified,
            target_field_group,
        })
    }
}

/// Parses and validates a rule file's contents.
pub fn parse_rules(contents: &str) -> Result<Vec<ResolverRule>, ConfigError> {
    let entries = match serde_json::from_str::<Value>(contents)? {
        Value::Array(entries) => entries,
        Value::Object(mut wrapper) => match wrapper.shift_remove(MAPPING_CONFLICTS_FIELD) {
            Some(Value::Array(entries)) => entries,
            _ => return Err(ConfigError::Shape),
        },
        _ => return Err(ConfigError::Shape),
    };

    let rules = entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let raw: RawRule =
                serde_json::from_value(entry).map_err(|e| ConfigError::MalformedRule {
                    index,
                    message: e.to_string(),
                })?;
            raw.validate(index)
        })
        .collect::<Result<Vec<_>, _>>()?;

    if rules.is_empty() {
        warn!("No mapping conflict rules configured, every conflict will use the safe fallback");
    }
    Ok(rules)
}

/// Reads and validates the rule file at `path`.
pub fn load_rules(path: &Path) -> Result<Vec<ResolverRule>, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let rules = parse_rules(&contents)?;
    debug!(
        "Loaded {} mapping conflict rules from {}",
        rules.len(),
        path.display()
    );
    Ok(rules)
}

/// The rules shipped with the crate.
pub fn default_rules() -> Result<Vec<ResolverRule>, ConfigError> {
    parse_rules(BUNDLED_RULES)
}
