// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Extraction Error Types
 * Layered error taxonomy for probing, extraction, selection and batching
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use crate::types::Technique;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while turning a raw probe into a decision
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    /// Transport failure reported by the probe function
    #[error("Network error: {0}")]
    Network(String),

    /// Probe did not complete in time
    #[error("Probe timed out after {0:?}")]
    Timeout(Duration),

    /// Target answered with an active block (WAF/IPS)
    #[error("Request blocked by WAF: {0}")]
    WafBlocked(String),

    /// Response matched neither calibrated side, even after re-probing
    #[error("Ambiguous oracle response for {technique}")]
    Ambiguous { technique: Technique },

    /// Session cancellation fired before or during the probe
    #[error("Probe cancelled")]
    Cancelled,

    /// The WAF circuit breaker for this run has tripped
    #[error("Circuit breaker open after {blocks} consecutive WAF blocks")]
    CircuitOpen { blocks: u32 },

    /// True and false conditions could not be told apart
    #[error("Calibration failed for {technique}: {reason}")]
    CalibrationFailed { technique: Technique, reason: String },
}

/// Errors raised by value extraction logic
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("Value is NULL")]
    NullValue,

    #[error("Value is empty")]
    EmptyValue,

    #[error("Character at position {position} could not be resolved")]
    CharsetExhausted { position: usize },

    /// Directly retrieved value could not be interpreted for the requested shape
    #[error("Malformed value: {0}")]
    Malformed(String),

    /// Value is longer than the configured maximum; carries what was resolved
    #[error("Value truncated at {max_length} of {length} characters")]
    Truncated {
        prefix: String,
        length: usize,
        max_length: usize,
    },
}

/// Errors raised by technique selection
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    /// Non-fatal: current technique was abandoned for the next candidate
    #[error("Technique {from} degraded, switching to {to}")]
    TechniqueDegraded { from: Technique, to: Technique },

    #[error("No usable injection technique left")]
    ExhaustedTechniques,
}

/// Batch-level outcomes reported by the coordinator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("All {rows} rows failed")]
    AllRowsFailed { rows: usize },

    #[error("Global WAF block after {blocks} consecutive blocked probes")]
    GlobalBlock { blocks: u32 },
}

/// Result cache misuse
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Conflicting value stored for fingerprint {fingerprint}")]
    Conflict { fingerprint: String },
}

/// Invalid extraction options
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid extraction options: {0}")]
    Invalid(String),
}

/// Umbrella error for engine operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Selector error: {0}")]
    Selector(#[from] SelectorError),

    #[error("Coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unknown injection point: {0}")]
    UnknownPoint(String),
}

impl OracleError {
    /// Transient faults that may clear up on a later attempt.
    /// WAF blocks are never retried silently.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OracleError::Network(_) | OracleError::Timeout(_) | OracleError::Ambiguous { .. }
        )
    }

    /// Faults that count against the technique currently in use
    pub fn is_technique_fault(&self) -> bool {
        self.is_retryable()
    }

    pub fn is_block(&self) -> bool {
        matches!(self, OracleError::WafBlocked(_) | OracleError::CircuitOpen { .. })
    }
}

impl EngineError {
    /// Check if the row that produced this error may be retried by the coordinator
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Oracle(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Suggested delay before retrying, if the error carries one
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            EngineError::Oracle(OracleError::Timeout(d)) => Some(*d / 2),
            _ => None,
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self, EngineError::Oracle(e) if e.is_block())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Oracle(OracleError::Cancelled))
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
