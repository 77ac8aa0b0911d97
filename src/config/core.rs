// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

use crate::errors::ConfigError;
use crate::types::{CharsetHint, Technique};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Structured options consumed by the engine. Never parsed from the
/// command line here; callers build or load it and hand it over.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ExtractionOptions {
    /// Parallel extraction workers. Probing is rate sensitive, keep it low.
    #[validate(range(min = 1, max = 64))]
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    #[validate(range(min = 1, max = 20))]
    #[serde(default = "default_per_row_retry_limit")]
    pub per_row_retry_limit: u32,

    #[validate(range(min = 1, max = 60000))]
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[validate(range(min = 1, max = 600000))]
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    #[validate(range(min = 0.0, max = 1.0))]
    #[serde(default = "default_backoff_jitter")]
    pub backoff_jitter: f64,

    /// Extra samples taken when a timing measurement is ambiguous
    #[validate(range(min = 0, max = 10))]
    #[serde(default = "default_ambiguity_retry_count")]
    pub ambiguity_retry_count: u32,

    /// Attempts per character position before giving up on it
    #[validate(range(min = 1, max = 10))]
    #[serde(default = "default_position_retry_limit")]
    pub position_retry_limit: u32,

    /// Consecutive faults tolerated before moving to the next technique
    #[validate(range(min = 1, max = 50))]
    #[serde(default = "default_technique_failure_budget")]
    pub technique_failure_budget: u32,

    #[validate(range(min = 1, max = 100))]
    #[serde(default = "default_waf_block_threshold")]
    pub waf_block_threshold: u32,

    #[validate(range(min = 1))]
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,

    #[serde(default)]
    pub technique_priority_override: Option<Vec<Technique>>,

    #[validate(range(min = 0.5, max = 1.0))]
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    #[validate(range(min = 0.0, max = 0.5))]
    #[serde(default = "default_similarity_margin")]
    pub similarity_margin: f64,

    #[validate(range(min = 1, max = 30))]
    #[serde(default = "default_time_delay_secs")]
    pub time_delay_secs: u64,

    #[validate(range(min = 0.5, max = 1.0))]
    #[serde(default = "default_time_tolerance")]
    pub time_tolerance: f64,

    #[validate(range(min = 1.5, max = 20.0))]
    #[serde(default = "default_time_ceiling_factor")]
    pub time_ceiling_factor: f64,

    /// Baseline latency samples collected during calibration
    #[validate(range(min = 1, max = 20))]
    #[serde(default = "default_calibration_samples")]
    pub calibration_samples: usize,

    #[validate(range(min = 1, max = 1048576))]
    #[serde(default = "default_max_value_length")]
    pub max_value_length: usize,

    #[serde(default)]
    pub charset: CharsetHint,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            per_row_retry_limit: default_per_row_retry_limit(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            backoff_jitter: default_backoff_jitter(),
            ambiguity_retry_count: default_ambiguity_retry_count(),
            position_retry_limit: default_position_retry_limit(),
            technique_failure_budget: default_technique_failure_budget(),
            waf_block_threshold: default_waf_block_threshold(),
            cache_capacity: default_cache_capacity(),
            technique_priority_override: None,
            similarity_threshold: default_similarity_threshold(),
            similarity_margin: default_similarity_margin(),
            time_delay_secs: default_time_delay_secs(),
            time_tolerance: default_time_tolerance(),
            time_ceiling_factor: default_time_ceiling_factor(),
            calibration_samples: default_calibration_samples(),
            max_value_length: default_max_value_length(),
            charset: CharsetHint::default(),
        }
    }
}

impl ExtractionOptions {
    /// Run field and cross-field validation
    pub fn validated(self) -> Result<Self, ConfigError> {
        super::validation::OptionsValidator::validate(&self)?;
        Ok(self)
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_waf_block_threshold(mut self, threshold: u32) -> Self {
        self.waf_block_threshold = threshold;
        self
    }

    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base_ms = base.as_millis() as u64;
        self.backoff_cap_ms = cap.as_millis() as u64;
        self
    }

    pub fn with_charset(mut self, charset: CharsetHint) -> Self {
        self.charset = charset;
        self
    }

    pub fn with_priority_override(mut self, order: Vec<Technique>) -> Self {
        self.technique_priority_override = Some(order);
        self
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }

    pub fn time_delay(&self) -> Duration {
        Duration::from_secs(self.time_delay_secs)
    }
}

fn default_worker_count() -> usize {
    4
}

fn default_per_row_retry_limit() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    250
}

fn default_backoff_cap_ms() -> u64 {
    8000
}

fn default_backoff_jitter() -> f64 {
    0.3
}

fn default_ambiguity_retry_count() -> u32 {
    2
}

fn default_position_retry_limit() -> u32 {
    3
}

fn default_technique_failure_budget() -> u32 {
    3
}

fn default_waf_block_threshold() -> u32 {
    3
}

fn default_cache_capacity() -> u64 {
    10_000
}

fn default_similarity_threshold() -> f64 {
    0.95
}

fn default_similarity_margin() -> f64 {
    0.02
}

fn default_time_delay_secs() -> u64 {
    2
}

fn default_time_tolerance() -> f64 {
    0.9
}

fn default_time_ceiling_factor() -> f64 {
    3.0
}

fn default_calibration_samples() -> usize {
    3
}

fn default_max_value_length() -> usize {
    4096
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let options = ExtractionOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.worker_count, 4);
        assert_eq!(options.waf_block_threshold, 3);
        assert_eq!(options.similarity_threshold, 0.95);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let options: ExtractionOptions =
            serde_json::from_str(r#"{"worker_count": 8}"#).unwrap();
        assert_eq!(options.worker_count, 8);
        assert_eq!(options.per_row_retry_limit, 3);
        assert_eq!(options.charset, CharsetHint::Printable);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let options = ExtractionOptions::default().with_worker_count(0);
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_priority_override_deserializes() {
        let options: ExtractionOptions =
            serde_json::from_str(r#"{"technique_priority_override": ["time_blind", "boolean_blind"]}"#)
                .unwrap();
        assert_eq!(
            options.technique_priority_override,
            Some(vec![Technique::TimeBlind, Technique::BooleanBlind])
        );
    }
}
