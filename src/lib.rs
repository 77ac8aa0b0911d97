// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Blind Oracle Library
 * Blind SQL injection inference and extraction engine
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

pub mod alphabet;
pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod dialect;
pub mod events;
pub mod types;

// Error handling and resilience
pub mod errors;
pub mod retry;

// Oracle and probing
pub mod oracle;
pub mod point;
pub mod probe;

// Extraction pipeline
pub mod coordinator;
pub mod extractor;
pub mod selector;

// Session context and persistence
pub mod session;
pub mod store;

pub use config::ExtractionOptions;
pub use coordinator::{BatchOutcome, BatchStats, RowOutcome};
pub use dialect::{dialect_for, Dbms, Dialect};
pub use errors::{
    CoordinatorError, EngineError, EngineResult, ExtractionError, OracleError, SelectorError,
};
pub use events::{ChannelSink, EventSink, ProgressEvent};
pub use point::InjectionPoint;
pub use probe::{Probe, ProbeError, ProbeRequest, RawResponse};
pub use session::Session;
pub use store::{JsonFileStore, SessionStore};
pub use types::{CharsetHint, ExtractedValue, Query, ResultShape, Technique};
