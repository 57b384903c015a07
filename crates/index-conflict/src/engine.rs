// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use tracing::debug;

use crate::error::ConfigError;
use crate::event::{EventRecord, FailedSubmission, NotificationKey};
use crate::resolver::{ConflictResolver, SafeFallback, UNRESOLVED_NOTIFICATION};
use crate::rules::{self, ResolverRule};

/// Substring the index puts in every schema-conflict rejection.
pub const DEFAULT_MAPPING_MARKER: &str = "MapperParsingException";

/// Repairs records rejected for a mapping conflict.
///
/// Built once from the rule chain and shared by reference. Resolving never fails: a conflict
/// no rule understands degrades to the safe fallback.
#[derive(Clone, Debug)]
pub struct ConflictResolutionEngine {
    resolvers: Vec<ConflictResolver>,
    marker: String,
    fallback: SafeFallback,
}

impl ConflictResolutionEngine {
    pub fn new(rules: &[ResolverRule]) -> Result<Self, ConfigError> {
        let resolvers = rules
            .iter()
            .enumerate()
            .map(|(index, rule)| ConflictResolver::from_rule(index, rule))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ConflictResolutionEngine {
            resolvers,
            marker: DEFAULT_MAPPING_MARKER.to_string(),
            fallback: SafeFallback::default(),
        })
    }

    /// Engine over the bundled rule chain.
    pub fn with_default_rules() -> Result<Self, ConfigError> {
        ConflictResolutionEngine::new(&rules::default_rules()?)
    }

    #[must_use]
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    #[must_use]
    pub fn with_fallback(mut self, fallback: SafeFallback) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn resolvers(&self) -> &[ConflictResolver] {
        &self.resolvers
    }

    pub fn fallback(&self) -> &SafeFallback {
        &self.fallback
    }

    pub fn is_mapping_conflict(&self, reason: &str) -> bool {
        reason.contains(&self.marker)
    }

    /// Returns the repaired record, or the original one untouched when the failure is not a
    /// mapping conflict. Only the first rule whose trigger matches is applied.
    pub fn resolve(&self, failed: FailedSubmission) -> EventRecord {
        let (mut record, reason) = failed.into_parts();
        if !self.is_mapping_conflict(&reason) {
            debug!("Failure is not a mapping conflict, leaving event untouched: {reason}");
            return record;
        }

        for (position, resolver) in self.resolvers.iter().enumerate() {
            if resolver.try_resolve(&mut record, &reason, &self.fallback) {
                debug!("Mapping conflict resolved by rule {position}");
                return record;
            }
        }

        debug!("No rule matched mapping conflict, applying safe fallback: {reason}");
        self.fallback.apply(&mut record);
        record.append_notification(NotificationKey::MappingConflict, UNRESOLVED_NOTIFICATION);
        record
    }
}
