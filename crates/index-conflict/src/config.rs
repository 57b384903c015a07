// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::engine::{ConflictResolutionEngine, DEFAULT_MAPPING_MARKER};
use crate::error::ConfigError;
use crate::event::DEFAULT_FALLBACK_GROUPS;
use crate::resolver::SafeFallback;
use crate::rules;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_BACKOFF_KINDS: [&str; 3] = ["constant", "linear", "exponential"];

/// Runtime configuration for the resilience layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResilienceConfig {
    /// Rule file to load; the bundled rules are used when unset
    pub rules_path: Option<PathBuf>,
    /// Substring identifying a mapping conflict in a failure reason
    pub mapping_marker: String,
    /// Groups kept when a conflict cannot be repaired precisely
    pub fallback_groups: Vec<String>,
    /// One of constant, linear, exponential
    pub backoff: String,
    pub backoff_initial_ms: u64,
    /// Cap for the exponential policy
    pub backoff_max_ms: u64,
    pub max_retries: usize,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            rules_path: None,
            mapping_marker: DEFAULT_MAPPING_MARKER.to_string(),
            fallback_groups: DEFAULT_FALLBACK_GROUPS
                .iter()
                .map(ToString::to_string)
                .collect(),
            backoff: "exponential".to_string(),
            backoff_initial_ms: 50,
            backoff_max_ms: 5000,
            max_retries: 8,
            log_level: "info".to_string(),
        }
    }
}

impl ResilienceConfig {
    /// Create configuration from `INDEX_CONFLICT_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let rules_path = lookup("INDEX_CONFLICT_RULES_PATH")
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        let mapping_marker =
            lookup("INDEX_CONFLICT_MAPPING_MARKER").unwrap_or(defaults.mapping_marker);
        let fallback_groups = lookup("INDEX_CONFLICT_FALLBACK_GROUPS")
            .map(|val| {
                val.split(',')
                    .map(str::trim)
                    .filter(|group| !group.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or(defaults.fallback_groups);
        let backoff = lookup("INDEX_CONFLICT_BACKOFF")
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.backoff);
        let backoff_initial_ms = lookup("INDEX_CONFLICT_BACKOFF_INITIAL_MS")
            .and_then(|val| val.trim().parse::<u64>().ok())
            .unwrap_or(defaults.backoff_initial_ms);
        let backoff_max_ms = lookup("INDEX_CONFLICT_BACKOFF_MAX_MS")
            .and_then(|val| val.trim().parse::<u64>().ok())
            .unwrap_or(defaults.backoff_max_ms);
        let max_retries = lookup("INDEX_CONFLICT_MAX_RETRIES")
            .and_then(|val| val.trim().parse::<usize>().ok())
            .unwrap_or(defaults.max_retries);
        let log_level = lookup("INDEX_CONFLICT_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.log_level);

        let config = Self {
            rules_path,
            mapping_marker,
            fallback_groups,
            backoff,
            backoff_initial_ms,
            backoff_max_ms,
            max_retries,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mapping_marker.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "INDEX_CONFLICT_MAPPING_MARKER cannot be empty".to_string(),
            ));
        }

        if !VALID_BACKOFF_KINDS.contains(&self.backoff.as_str()) {
            return Err(ConfigError::InvalidConfig(format!(
                "Invalid backoff '{}'. Must be one of: constant, linear, exponential",
                self.backoff
            )));
        }

        if self.backoff_initial_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "Initial backoff delay must be greater than 0".to_string(),
            ));
        }

        if self.backoff_max_ms < self.backoff_initial_ms {
            return Err(ConfigError::InvalidConfig(format!(
                "Maximum backoff delay {} ms is below the initial delay {} ms",
                self.backoff_max_ms, self.backoff_initial_ms
            )));
        }

        if self.fallback_groups.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "INDEX_CONFLICT_FALLBACK_GROUPS must name at least one group".to_string(),
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Loads the configured rule file, or the bundled rules, into an engine.
    pub fn build_engine(&self) -> Result<ConflictResolutionEngine, ConfigError> {
        let rules = match &self.rules_path {
            Some(path) => rules::load_rules(path)?,
            None => rules::default_rules()?,
        };
        Ok(ConflictResolutionEngine::new(&rules)?
            .with_marker(self.mapping_marker.clone())
            .with_fallback(SafeFallback::new(self.fallback_groups.iter().cloned())))
    }

    pub fn backoff_policy(&self) -> Result<BackoffPolicy, ConfigError> {
        let initial = Duration::from_millis(self.backoff_initial_ms);
        let retries = self.max_retries;
        match self.backoff.as_str() {
            "constant" => Ok(BackoffPolicy::Constant {
                delay: initial,
                retries,
            }),
            "linear" => Ok(BackoffPolicy::Linear {
                initial,
                step: initial,
                retries,
            }),
            "exponential" => Ok(BackoffPolicy::Exponential {
                initial,
                max: Duration::from_millis(self.backoff_max_ms),
                retries,
            }),
            other => Err(ConfigError::InvalidConfig(format!("Invalid backoff '{other}'"))),
        }
    }
}
