// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Core Extraction Types
 * Techniques, queries, extracted values and job state
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Injection technique, declared in default priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Technique {
    Union,
    Error,
    Stacked,
    BooleanBlind,
    TimeBlind,
}

impl Technique {
    /// Fixed priority: UNION > error-based > stacked > boolean-blind > time-blind
    pub const PRIORITY: [Technique; 5] = [
        Technique::Union,
        Technique::Error,
        Technique::Stacked,
        Technique::BooleanBlind,
        Technique::TimeBlind,
    ];

    /// UNION and error-based techniques can return data in the response body
    pub fn retrieves_directly(self) -> bool {
        matches!(self, Technique::Union | Technique::Error)
    }

    /// Techniques whose oracle signal is response latency
    pub fn is_time_based(self) -> bool {
        matches!(self, Technique::Stacked | Technique::TimeBlind)
    }

    pub fn supports(self, capability: Capability) -> bool {
        match capability {
            Capability::DirectRetrieval => self.retrieves_directly(),
            Capability::BooleanOracle => !self.retrieves_directly(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Technique::Union => "union",
            Technique::Error => "error",
            Technique::Stacked => "stacked",
            Technique::BooleanBlind => "boolean_blind",
            Technique::TimeBlind => "time_blind",
        }
    }
}

impl fmt::Display for Technique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller needs from a technique
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// A yes/no answer about a condition
    BooleanOracle,
    /// The value itself, returned in the response
    DirectRetrieval,
}

/// Shape of the value a query produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultShape {
    Scalar,
    Count,
    Existence,
}

/// Narrowing hint for the alphabet used during character bisection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharsetHint {
    Printable,
    Digits,
    Hexadecimal,
    Lowercase,
    Alpha,
    Alphanumeric,
    Custom(Vec<u8>),
}

impl Default for CharsetHint {
    fn default() -> Self {
        CharsetHint::Printable
    }
}

impl CharsetHint {
    /// Byte codes covered by this hint, ascending and deduplicated
    pub fn codes(&self) -> Vec<u8> {
        let mut codes: Vec<u8> = match self {
            CharsetHint::Printable => (32u8..=126).collect(),
            CharsetHint::Digits => (b'0'..=b'9').collect(),
            CharsetHint::Hexadecimal => (b'0'..=b'9').chain(b'a'..=b'f').chain(b'A'..=b'F').collect(),
            CharsetHint::Lowercase => (b'a'..=b'z').collect(),
            CharsetHint::Alpha => (b'a'..=b'z').chain(b'A'..=b'Z').collect(),
            CharsetHint::Alphanumeric => (b'a'..=b'z')
                .chain(b'A'..=b'Z')
                .chain(b'0'..=b'9')
                .collect(),
            CharsetHint::Custom(bytes) => bytes.clone(),
        };
        codes.sort_unstable();
        codes.dedup();
        codes
    }
}

/// Abstract request for a value, independent of DBMS syntax
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    pub expression: String,
    pub shape: ResultShape,
    #[serde(default)]
    pub charset: Option<CharsetHint>,
}

impl Query {
    pub fn scalar(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            shape: ResultShape::Scalar,
            charset: None,
        }
    }

    pub fn count(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            shape: ResultShape::Count,
            charset: None,
        }
    }

    pub fn existence(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            shape: ResultShape::Existence,
            charset: None,
        }
    }

    pub fn with_charset(mut self, charset: CharsetHint) -> Self {
        self.charset = Some(charset);
        self
    }

    /// Whitespace-collapsed expression; the stable part of a fingerprint
    pub fn normalized(&self) -> String {
        let expression = self.expression.split_whitespace().collect::<Vec<_>>().join(" ");
        let shape = match self.shape {
            ResultShape::Scalar => "scalar",
            ResultShape::Count => "count",
            ResultShape::Existence => "existence",
        };
        format!("{}|{}", shape, expression)
    }
}

/// A fully resolved value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ExtractedValue {
    Text(String),
    Count(u64),
    Exists(bool),
    /// Longer than the configured maximum; never cached
    Partial { prefix: String, length: usize },
}

impl ExtractedValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ExtractedValue::Text(s) => Some(s),
            ExtractedValue::Partial { prefix, .. } => Some(prefix),
            _ => None,
        }
    }

    pub fn as_count(&self) -> Option<u64> {
        match self {
            ExtractedValue::Count(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, ExtractedValue::Partial { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
}

/// One extraction in progress. Progress is monotonic: the length is set
/// once and the prefix only grows.
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub query: Query,
    pub max_length: Option<usize>,
    pub status: JobStatus,
    pub technique: Option<Technique>,
    length: Option<usize>,
    prefix: Vec<char>,
}

impl ExtractionJob {
    pub fn new(query: Query, max_length: Option<usize>) -> Self {
        Self {
            query,
            max_length,
            status: JobStatus::Pending,
            technique: None,
            length: None,
            prefix: Vec::new(),
        }
    }

    pub fn length(&self) -> Option<usize> {
        self.length
    }

    /// Resolved characters, one per position
    pub fn prefix(&self) -> &[char] {
        &self.prefix
    }

    /// Record the discovered length. A second, different value is ignored.
    pub fn set_length(&mut self, length: usize) {
        if self.length.is_none() {
            self.length = Some(length);
        }
    }

    pub fn push(&mut self, ch: char) {
        self.prefix.push(ch);
    }

    pub fn prefix_text(&self) -> String {
        self.prefix.iter().collect()
    }
}
