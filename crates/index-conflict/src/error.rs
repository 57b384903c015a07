// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

/// Errors raised while loading mapping-conflict rules or environment configuration.
///
/// All of these are fatal at startup: no engine is built from a partially valid rule file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read rule file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Rule file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Rule file must be a list of rules or an object with a `mapping_conflicts` list")]
    Shape,

    #[error("Rule {index} is malformed: {message}")]
    MalformedRule { index: usize, message: String },

    #[error("Rule {index} must specify at least one regex")]
    MissingRegexes { index: usize },

    #[error("Rule {index} must specify a notification message")]
    MissingNotification { index: usize },

    #[error("Rule {index}: field_is_fully_qualified must be present")]
    MissingQualification { index: usize },

    #[error("Rule {index}: field_group_containing_field must be present when field_is_fully_qualified is false")]
    MissingFieldGroup { index: usize },

    #[error("Rule {index}: field_group_containing_field is only allowed when field_is_fully_qualified is false")]
    UnexpectedFieldGroup { index: usize },

    #[error("Rule {index}: invalid regex `{pattern}`: {source}")]
    InvalidRegex {
        index: usize,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Rule {index}: regex `{pattern}` must have a capture group for the conflicting field")]
    MissingCaptureGroup { index: usize, pattern: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// The submission channel itself failed, as opposed to individual items being rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Bulk submission failed: {message}")]
    Submit {
        status: Option<u16>,
        message: String,
    },

    #[error("Bulk response has {received} items but {expected} were submitted")]
    ResponseMismatch { expected: usize, received: usize },

    #[error("Scheduled retry was dropped before it ran")]
    RetryDropped,
}

impl TransportError {
    pub fn submit(status: Option<u16>, message: impl Into<String>) -> Self {
        TransportError::Submit {
            status,
            message: message.into(),
        }
    }
}

/// An indexed document could not be turned back into an event record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("Event source must be a JSON object")]
    NotAnObject,

    #[error("`{0}` must be an object of string lists")]
    InvalidFacets(&'static str),
}
