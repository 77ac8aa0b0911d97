// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Probe Capability
 * Boundary to the transport layer plus the gate every probe passes through
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use crate::circuit_breaker::WafCircuitBreaker;
use crate::errors::OracleError;
use crate::events::{EventSink, ProgressEvent};
use crate::types::Technique;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

/// One injected condition, ready for the transport layer to embed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    pub technique: Technique,
    pub payload: String,
    /// Expected stall for time-based payloads, so transports can size timeouts
    pub timing_hint: Option<Duration>,
}

/// What came back, as observed by the transport layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
    pub latency: Duration,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>, latency: Duration) -> Self {
        Self {
            status,
            body: body.into(),
            latency,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("transport error: {0}")]
    Network(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The transport recognised an active block (WAF/IPS page, reset, 403 storm)
    #[error("blocked: {0}")]
    Blocked(String),
}

/// HTTP/session layer supplied by the caller. The engine never builds
/// requests itself.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn send(&self, request: ProbeRequest) -> Result<RawResponse, ProbeError>;
}

/// Session-wide cancellation flag that can also be awaited
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once [`CancelSignal::cancel`] has been called
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[derive(Debug, Default)]
pub struct ProbeStats {
    sent: AtomicU64,
    blocked: AtomicU64,
}

impl ProbeStats {
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn blocked(&self) -> u64 {
        self.blocked.load(Ordering::Relaxed)
    }
}

/// Every probe passes through here: cancellation, breaker, accounting
#[derive(Clone)]
pub struct ProbeGate {
    cancel: CancelSignal,
    breaker: Arc<WafCircuitBreaker>,
    stats: Arc<ProbeStats>,
    events: Arc<dyn EventSink>,
}

impl ProbeGate {
    pub fn new(
        cancel: CancelSignal,
        breaker: Arc<WafCircuitBreaker>,
        stats: Arc<ProbeStats>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            cancel,
            breaker,
            stats,
            events,
        }
    }

    pub fn breaker(&self) -> &Arc<WafCircuitBreaker> {
        &self.breaker
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    /// Refuse to dispatch when cancelled or when the breaker is open
    pub fn check(&self) -> Result<(), OracleError> {
        if self.cancel.is_cancelled() {
            return Err(OracleError::Cancelled);
        }
        if self.breaker.is_open() {
            return Err(OracleError::CircuitOpen {
                blocks: self.breaker.consecutive_blocks(),
            });
        }
        Ok(())
    }

    pub async fn send(
        &self,
        probe: &dyn Probe,
        request: ProbeRequest,
    ) -> Result<RawResponse, OracleError> {
        self.check()?;
        self.stats.sent.fetch_add(1, Ordering::Relaxed);

        let technique = request.technique;
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(OracleError::Cancelled),
            outcome = probe.send(request) => outcome,
        };

        match outcome {
            Ok(response) => {
                self.breaker.record_success();
                debug!(
                    technique = %technique,
                    status = response.status,
                    latency_ms = response.latency.as_millis() as u64,
                    "Probe answered"
                );
                Ok(response)
            }
            Err(ProbeError::Blocked(reason)) => {
                self.stats.blocked.fetch_add(1, Ordering::Relaxed);
                warn!(technique = %technique, reason = %reason, "Probe blocked by WAF");
                if self.breaker.record_block() {
                    self.events.emit(ProgressEvent::BreakerTripped {
                        blocks: self.breaker.consecutive_blocks(),
                    });
                }
                Err(OracleError::WafBlocked(reason))
            }
            Err(ProbeError::Network(message)) => Err(OracleError::Network(message)),
            Err(ProbeError::Timeout(after)) => Err(OracleError::Timeout(after)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullSink;
    use std::sync::atomic::AtomicU32;

    struct FixedProbe {
        outcome: Result<RawResponse, ProbeError>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Probe for FixedProbe {
        async fn send(&self, _request: ProbeRequest) -> Result<RawResponse, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    fn gate(threshold: u32) -> (ProbeGate, CancelSignal, Arc<ProbeStats>) {
        let cancel = CancelSignal::new();
        let stats = Arc::new(ProbeStats::default());
        let gate = ProbeGate::new(
            cancel.clone(),
            Arc::new(WafCircuitBreaker::new(threshold)),
            Arc::clone(&stats),
            Arc::new(NullSink),
        );
        (gate, cancel, stats)
    }

    fn request() -> ProbeRequest {
        ProbeRequest {
            technique: Technique::BooleanBlind,
            payload: "1=1".to_string(),
            timing_hint: None,
        }
    }

    #[tokio::test]
    async fn test_blocks_trip_breaker_and_stop_dispatch() {
        let (gate, _cancel, stats) = gate(2);
        let probe = FixedProbe {
            outcome: Err(ProbeError::Blocked("403".into())),
            calls: AtomicU32::new(0),
        };

        for _ in 0..2 {
            let err = gate.send(&probe, request()).await.unwrap_err();
            assert!(matches!(err, OracleError::WafBlocked(_)));
        }

        let err = gate.send(&probe, request()).await.unwrap_err();
        assert!(matches!(err, OracleError::CircuitOpen { .. }));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
        assert_eq!(stats.sent(), 2);
        assert_eq!(stats.blocked(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_gate_sends_nothing() {
        let (gate, cancel, stats) = gate(3);
        let probe = FixedProbe {
            outcome: Ok(RawResponse::new(200, "ok", Duration::from_millis(5))),
            calls: AtomicU32::new(0),
        };

        cancel.cancel();
        let err = gate.send(&probe, request()).await.unwrap_err();
        assert_eq!(err, OracleError::Cancelled);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
        assert_eq!(stats.sent(), 0);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_in_flight_probe() {
        struct SlowProbe;

        #[async_trait]
        impl Probe for SlowProbe {
            async fn send(&self, _request: ProbeRequest) -> Result<RawResponse, ProbeError> {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(RawResponse::new(200, "late", Duration::from_secs(30)))
            }
        }

        let (gate, cancel, _stats) = gate(3);
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let err = gate.send(&SlowProbe, request()).await.unwrap_err();
        assert_eq!(err, OracleError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_transport_errors_map_to_oracle_errors() {
        let (gate, _cancel, _stats) = gate(3);
        let probe = FixedProbe {
            outcome: Err(ProbeError::Timeout(Duration::from_secs(1))),
            calls: AtomicU32::new(0),
        };

        let err = gate.send(&probe, request()).await.unwrap_err();
        assert_eq!(err, OracleError::Timeout(Duration::from_secs(1)));
        assert!(!gate.breaker().is_open());
    }
}
