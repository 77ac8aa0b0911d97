// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Simulated injectable target shared by the integration tests.
//!
//! The target owns a ground-truth table and answers every probe by
//! evaluating the rendered condition against it. Lengths count characters
//! and character codes are Unicode code points, as `CHAR_LENGTH`/`UNICODE`
//! report them. Latency is reported, not
//! slept, so time-based extraction runs at full speed.

#![allow(dead_code)]

use async_trait::async_trait;
use blind_oracle::dialect::{INBAND_NULL, INBAND_START, INBAND_STOP};
use blind_oracle::{
    Dbms, Dialect, ExtractionOptions, InjectionPoint, Probe, ProbeError, ProbeRequest, RawResponse,
    Technique,
};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const TRUE_PAGE: &str = "<html><head><title>Catalogue</title></head><body><h1>Product list</h1>\
<ul><li>Widget</li><li>Gadget</li><li>Sprocket</li><li>Flange</li></ul></body></html>";

pub const FALSE_PAGE: &str = "<html><head><title>Catalogue</title></head><body><h1>Product list</h1>\
<p>No products found.</p></body></html>";

pub const NOISE_PAGE: &str = "<html><head><title>Catalogue</title></head><body><h1>Product list</h1>\
<p>Widget</p><p>Service temporarily degraded, partial listing</p></body></html>";

const BASE_LATENCY_MS: u64 = 30;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Options with backoff short enough for tests
pub fn fast_options() -> ExtractionOptions {
    ExtractionOptions::default().with_backoff(Duration::from_millis(1), Duration::from_millis(4))
}

/// Renders conditions in a small grammar [`SimTarget`] can evaluate
pub struct SimDialect;

impl Dialect for SimDialect {
    fn dbms(&self) -> Dbms {
        Dbms::Sqlite
    }

    fn length_of(&self, expr: &str) -> String {
        format!("LEN[{}]", expr)
    }

    fn char_code_at(&self, expr: &str, position: usize) -> String {
        format!("CODE[{};{}]", expr, position)
    }

    fn is_null_check(&self, expr: &str) -> String {
        format!("ISNULL[{}]", expr)
    }

    fn exists_check(&self, expr: &str) -> String {
        format!("EXISTS[{}]", expr)
    }

    fn time_delay(&self, condition: &str, seconds: u64) -> String {
        format!("SLEEP_IF({})|{}", seconds, condition)
    }

    fn stacked_delay(&self, condition: &str, seconds: u64) -> String {
        format!(";STACK({})|{}", seconds, condition)
    }

    fn inband_wrap(&self, expr: &str) -> String {
        format!("INBAND[{}]", expr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectMode {
    /// Values come back between the in-band markers
    Markers,
    /// Page renders but the injected column never shows up
    Blank,
}

/// Ground truth plus fault injection
pub struct SimTarget {
    values: HashMap<String, Option<String>>,
    failing: HashSet<String>,
    noisy: HashSet<Technique>,
    direct: DirectMode,
    block_after: Option<u64>,
    probe_delay: Option<Duration>,
    max_jitter: Option<Duration>,
    calls: AtomicU64,
    code_probes: AtomicU64,
    length_probes: AtomicU64,
    null_probes: AtomicU64,
}

impl Default for SimTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl SimTarget {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
            failing: HashSet::new(),
            noisy: HashSet::new(),
            direct: DirectMode::Markers,
            block_after: None,
            probe_delay: None,
            max_jitter: None,
            calls: AtomicU64::new(0),
            code_probes: AtomicU64::new(0),
            length_probes: AtomicU64::new(0),
            null_probes: AtomicU64::new(0),
        }
    }

    pub fn with_value(mut self, expr: &str, value: &str) -> Self {
        self.values.insert(expr.to_string(), Some(value.to_string()));
        self
    }

    pub fn with_null(mut self, expr: &str) -> Self {
        self.values.insert(expr.to_string(), None);
        self
    }

    /// Every probe touching `expr` fails at the transport
    pub fn failing(mut self, expr: &str) -> Self {
        self.failing.insert(expr.to_string());
        self
    }

    /// Decisions (not calibration) for `technique` come back unreadable
    pub fn noisy(mut self, technique: Technique) -> Self {
        self.noisy.insert(technique);
        self
    }

    pub fn direct(mut self, mode: DirectMode) -> Self {
        self.direct = mode;
        self
    }

    /// Every probe after the first `allowed` is blocked
    pub fn block_after(mut self, allowed: u64) -> Self {
        self.block_after = Some(allowed);
        self
    }

    pub fn probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = Some(delay);
        self
    }

    pub fn jitter(mut self, max: Duration) -> Self {
        self.max_jitter = Some(max);
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn code_probes(&self) -> u64 {
        self.code_probes.load(Ordering::SeqCst)
    }

    pub fn length_probes(&self) -> u64 {
        self.length_probes.load(Ordering::SeqCst)
    }

    pub fn null_probes(&self) -> u64 {
        self.null_probes.load(Ordering::SeqCst)
    }

    fn value(&self, expr: &str) -> Option<&str> {
        self.values.get(expr).and_then(|v| v.as_deref())
    }

    fn touches_failing(&self, payload: &str) -> bool {
        self.failing.iter().any(|e| {
            payload.contains(&format!("[{}]", e)) || payload.contains(&format!("[{};", e))
        })
    }

    fn eval(&self, condition: &str) -> bool {
        let condition = condition.trim();
        match condition {
            "1=1" => return true,
            "1=2" => return false,
            _ => {}
        }

        if let Some(rest) = condition.strip_prefix("ISNULL[") {
            self.null_probes.fetch_add(1, Ordering::SeqCst);
            return self.value(rest.trim_end_matches(']')).is_none();
        }

        if let Some(rest) = condition.strip_prefix("EXISTS[") {
            return self.value(rest.trim_end_matches(']')).is_some();
        }

        if let Some(rest) = condition.strip_prefix("LEN[") {
            self.length_probes.fetch_add(1, Ordering::SeqCst);
            let (expr, tail) = rest.split_once(']').expect("LEN without ]");
            let bound: u64 = tail
                .strip_prefix('>')
                .expect("LEN without comparison")
                .parse()
                .expect("LEN bound");
            let length = self.value(expr).map(|v| v.chars().count() as u64).unwrap_or(0);
            return length > bound;
        }

        if let Some(rest) = condition.strip_prefix("CODE[") {
            self.code_probes.fetch_add(1, Ordering::SeqCst);
            let (inner, tail) = rest.split_once(']').expect("CODE without ]");
            let (expr, position) = inner.rsplit_once(';').expect("CODE without position");
            let position: usize = position.parse().expect("CODE position");
            let code = self
                .value(expr)
                .and_then(|v| v.chars().nth(position - 1))
                .map(|c| c as u64)
                .unwrap_or(0);

            if let Some(bound) = tail.strip_prefix('>') {
                return code > bound.parse::<u64>().expect("CODE bound");
            }
            if let Some(list) = tail.strip_prefix(" IN (") {
                return list
                    .trim_end_matches(')')
                    .split(',')
                    .any(|c| c.parse::<u64>().ok() == Some(code));
            }
        }

        panic!("unparseable condition: {}", condition);
    }

    fn page(&self, technique: Technique, condition: &str) -> &'static str {
        let calibrating = matches!(condition.trim(), "1=1" | "1=2");
        if !calibrating && self.noisy.contains(&technique) {
            return NOISE_PAGE;
        }
        if self.eval(condition) {
            TRUE_PAGE
        } else {
            FALSE_PAGE
        }
    }

    fn respond(&self, request: &ProbeRequest) -> Result<RawResponse, ProbeError> {
        let base = Duration::from_millis(BASE_LATENCY_MS);
        let payload = request.payload.as_str();

        match request.technique {
            Technique::BooleanBlind => Ok(RawResponse::new(
                200,
                self.page(Technique::BooleanBlind, payload),
                base,
            )),
            Technique::TimeBlind | Technique::Stacked => {
                let (head, condition) = payload.split_once('|').expect("timed payload");
                let seconds: u64 = head
                    .trim_start_matches(';')
                    .trim_start_matches("SLEEP_IF(")
                    .trim_start_matches("STACK(")
                    .trim_end_matches(')')
                    .parse()
                    .expect("delay seconds");
                let stalled = if self.noisy.contains(&request.technique)
                    && !matches!(condition.trim(), "1=1" | "1=2")
                {
                    Duration::from_millis(seconds * 500)
                } else if self.eval(condition) {
                    Duration::from_secs(seconds)
                } else {
                    Duration::ZERO
                };
                Ok(RawResponse::new(200, FALSE_PAGE, base + stalled))
            }
            Technique::Union | Technique::Error => {
                let expr = payload
                    .strip_prefix("INBAND[")
                    .and_then(|p| p.strip_suffix(']'))
                    .expect("in-band payload");
                let body = match (self.direct, self.values.get(expr)) {
                    (DirectMode::Blank, _) => FALSE_PAGE.to_string(),
                    (DirectMode::Markers, Some(Some(value))) => {
                        format!("<td>{}{}{}</td>", INBAND_START, value, INBAND_STOP)
                    }
                    (DirectMode::Markers, _) => {
                        format!("<td>{}{}{}</td>", INBAND_START, INBAND_NULL, INBAND_STOP)
                    }
                };
                Ok(RawResponse::new(200, body, base))
            }
        }
    }
}

#[async_trait]
impl Probe for SimTarget {
    async fn send(&self, request: ProbeRequest) -> Result<RawResponse, ProbeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(delay) = self.probe_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(max) = self.max_jitter {
            let micros = rand::rng().random_range(0..=max.as_micros() as u64);
            tokio::time::sleep(Duration::from_micros(micros)).await;
        }

        if self.block_after.is_some_and(|allowed| call > allowed) {
            return Err(ProbeError::Blocked("403 Forbidden".to_string()));
        }
        if self.touches_failing(&request.payload) {
            return Err(ProbeError::Network("connection reset by peer".to_string()));
        }

        self.respond(&request)
    }
}

pub fn sim_point(id: &str, target: &Arc<SimTarget>, techniques: &[Technique]) -> InjectionPoint {
    InjectionPoint::new(
        id,
        techniques.iter().copied(),
        Arc::new(SimDialect),
        Arc::clone(target) as Arc<dyn Probe>,
    )
}

/// Smallest `b` with `2^b >= n`
pub fn ceil_log2(n: u64) -> u64 {
    if n <= 1 {
        0
    } else {
        64 - (n - 1).leading_zeros() as u64
    }
}
