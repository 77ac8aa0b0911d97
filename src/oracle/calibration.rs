// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Oracle Calibration
 * One-time capture of true/false page signatures and timing baselines
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use super::comparison::{similarity, ResponseSignature};
use super::render_payload;
use crate::config::ExtractionOptions;
use crate::errors::OracleError;
use crate::point::InjectionPoint;
use crate::probe::{ProbeGate, ProbeRequest};
use crate::types::Technique;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Minimum spread assumed for latency baselines, in milliseconds
const MIN_STD_DEV_MS: f64 = 1.0;

/// Baseline is only trusted if its upper tail sits this many deviations
/// below the injected delay
const BASELINE_SIGMAS: f64 = 4.0;

#[derive(Debug, Clone)]
pub struct BooleanCalibration {
    pub true_signature: ResponseSignature,
    pub false_signature: ResponseSignature,
    /// Similarity between the true and false pages
    pub separation: f64,
}

/// Latency profile for one time-based technique, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingBaseline {
    pub mean_ms: f64,
    pub std_dev_ms: f64,
    pub delayed_ms: f64,
    pub delay_ms: f64,
}

impl TimingBaseline {
    pub fn from_samples(samples: &[f64], delayed_ms: f64, delay_ms: f64) -> Self {
        let n = samples.len().max(1) as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;

        Self {
            mean_ms: mean,
            std_dev_ms: variance.sqrt().max(MIN_STD_DEV_MS),
            delayed_ms,
            delay_ms,
        }
    }

    /// Lowest latency accepted as "condition held"
    pub fn true_floor(&self, tolerance: f64) -> f64 {
        self.delay_ms * tolerance
    }

    /// Anything at or above this is noise, not our sleep
    pub fn ceiling(&self, ceiling_factor: f64) -> f64 {
        self.mean_ms + self.delay_ms * ceiling_factor
    }

    /// Highest latency accepted as "condition did not hold"
    pub fn false_ceiling(&self, tolerance: f64) -> f64 {
        let floor = self.true_floor(tolerance);
        ((self.mean_ms + floor) / 2.0)
            .max(self.mean_ms + BASELINE_SIGMAS * self.std_dev_ms)
            .min(floor)
    }

    /// `None` when the sample falls between the false and true bands
    pub fn classify(&self, latency_ms: f64, options: &ExtractionOptions) -> Option<bool> {
        if latency_ms >= self.true_floor(options.time_tolerance)
            && latency_ms < self.ceiling(options.time_ceiling_factor)
        {
            Some(true)
        } else if latency_ms < self.false_ceiling(options.time_tolerance) {
            Some(false)
        } else {
            None
        }
    }
}

/// Per-point calibration result. Techniques that could not be calibrated
/// are recorded with the reason and refuse to answer.
#[derive(Debug, Clone, Default)]
pub struct Calibration {
    boolean: Option<BooleanCalibration>,
    timing: HashMap<Technique, TimingBaseline>,
    failures: HashMap<Technique, String>,
}

impl Calibration {
    pub fn boolean(&self) -> Result<&BooleanCalibration, OracleError> {
        self.boolean
            .as_ref()
            .ok_or_else(|| self.failure(Technique::BooleanBlind))
    }

    pub fn timing(&self, technique: Technique) -> Result<&TimingBaseline, OracleError> {
        self.timing
            .get(&technique)
            .ok_or_else(|| self.failure(technique))
    }

    pub fn usable(&self) -> Vec<Technique> {
        let mut usable: Vec<Technique> = self.timing.keys().copied().collect();
        if self.boolean.is_some() {
            usable.push(Technique::BooleanBlind);
        }
        usable.sort();
        usable
    }

    fn failure(&self, technique: Technique) -> OracleError {
        OracleError::CalibrationFailed {
            technique,
            reason: self
                .failures
                .get(&technique)
                .cloned()
                .unwrap_or_else(|| "technique not calibrated".to_string()),
        }
    }
}

/// Calibrate every oracle technique available on the point. Transport
/// errors abort the whole run so it can be retried later; a technique
/// that merely fails its checks is recorded as unusable.
pub async fn calibrate(
    point: &InjectionPoint,
    gate: &ProbeGate,
    options: &ExtractionOptions,
) -> Result<Calibration, OracleError> {
    let mut calibration = Calibration::default();

    for &technique in point.techniques() {
        let outcome = match technique {
            Technique::BooleanBlind => calibrate_boolean(point, gate, options)
                .await
                .map(|c| calibration.boolean = Some(c)),
            t if t.is_time_based() => calibrate_timing(point, gate, options, t)
                .await
                .map(|b| {
                    calibration.timing.insert(t, b);
                }),
            _ => continue,
        };

        match outcome {
            Ok(()) => {}
            Err(OracleError::CalibrationFailed { technique, reason }) => {
                warn!(
                    point = point.id(),
                    technique = %technique,
                    reason = %reason,
                    "Technique failed calibration"
                );
                calibration.failures.insert(technique, reason);
            }
            Err(err) => return Err(err),
        }
    }

    info!(
        point = point.id(),
        usable = ?calibration.usable(),
        "Injection point calibrated"
    );

    Ok(calibration)
}

async fn calibrate_boolean(
    point: &InjectionPoint,
    gate: &ProbeGate,
    options: &ExtractionOptions,
) -> Result<BooleanCalibration, OracleError> {
    let dialect = point.dialect();
    let true_payload = dialect.tautology();
    let false_payload = dialect.contradiction();

    let true_response = gate
        .send(point.probe(), boolean_request(&true_payload))
        .await?;
    let false_response = gate
        .send(point.probe(), boolean_request(&false_payload))
        .await?;

    let true_signature = ResponseSignature::capture(&true_response, &true_payload);
    let false_signature = ResponseSignature::capture(&false_response, &false_payload);
    let separation = similarity(&true_signature.body, &false_signature.body);

    debug!(
        point = point.id(),
        true_status = true_signature.status,
        false_status = false_signature.status,
        separation = separation,
        "Boolean signatures captured"
    );

    let distinguishable = true_signature.status != false_signature.status
        || true_signature.title != false_signature.title
        || 1.0 - separation >= options.similarity_margin;

    if !distinguishable {
        return Err(OracleError::CalibrationFailed {
            technique: Technique::BooleanBlind,
            reason: format!(
                "true and false responses are indistinguishable (similarity {:.3})",
                separation
            ),
        });
    }

    Ok(BooleanCalibration {
        true_signature,
        false_signature,
        separation,
    })
}

async fn calibrate_timing(
    point: &InjectionPoint,
    gate: &ProbeGate,
    options: &ExtractionOptions,
    technique: Technique,
) -> Result<TimingBaseline, OracleError> {
    let dialect = point.dialect();
    let delay = options.time_delay();
    let delay_ms = delay.as_secs_f64() * 1000.0;

    let quiet = render_payload(dialect, technique, &dialect.contradiction(), options.time_delay_secs);
    let mut samples = Vec::with_capacity(options.calibration_samples);
    for _ in 0..options.calibration_samples {
        let response = gate
            .send(point.probe(), timed_request(technique, &quiet, delay))
            .await?;
        samples.push(response.latency.as_secs_f64() * 1000.0);
    }

    let stalled = render_payload(dialect, technique, &dialect.tautology(), options.time_delay_secs);
    let response = gate
        .send(point.probe(), timed_request(technique, &stalled, delay))
        .await?;
    let delayed_ms = response.latency.as_secs_f64() * 1000.0;

    let baseline = TimingBaseline::from_samples(&samples, delayed_ms, delay_ms);

    debug!(
        point = point.id(),
        technique = %technique,
        mean_ms = baseline.mean_ms,
        std_dev_ms = baseline.std_dev_ms,
        delayed_ms = delayed_ms,
        "Timing baseline captured"
    );

    let floor = baseline.true_floor(options.time_tolerance);
    let reason = if delayed_ms < floor {
        Some(format!(
            "injected delay not observed ({:.0}ms < {:.0}ms)",
            delayed_ms, floor
        ))
    } else if delayed_ms >= baseline.ceiling(options.time_ceiling_factor) {
        Some(format!("delayed response too slow ({:.0}ms)", delayed_ms))
    } else if baseline.mean_ms + BASELINE_SIGMAS * baseline.std_dev_ms >= floor {
        Some(format!(
            "baseline latency too close to injected delay ({:.0}±{:.0}ms)",
            baseline.mean_ms, baseline.std_dev_ms
        ))
    } else {
        None
    };

    match reason {
        Some(reason) => Err(OracleError::CalibrationFailed { technique, reason }),
        None => Ok(baseline),
    }
}

fn boolean_request(payload: &str) -> ProbeRequest {
    ProbeRequest {
        technique: Technique::BooleanBlind,
        payload: payload.to_string(),
        timing_hint: None,
    }
}

fn timed_request(technique: Technique, payload: &str, delay: std::time::Duration) -> ProbeRequest {
    ProbeRequest {
        technique,
        payload: payload.to_string(),
        timing_hint: Some(delay),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_statistics() {
        let baseline = TimingBaseline::from_samples(&[40.0, 50.0, 60.0], 2050.0, 2000.0);

        assert!((baseline.mean_ms - 50.0).abs() < 1e-9);
        assert!((baseline.std_dev_ms - 8.1649).abs() < 1e-3);
    }

    #[test]
    fn test_latency_bands() {
        let options = ExtractionOptions::default();
        let baseline = TimingBaseline::from_samples(&[50.0, 50.0, 50.0], 2050.0, 2000.0);

        assert_eq!(baseline.classify(2050.0, &options), Some(true));
        assert_eq!(baseline.classify(1800.0, &options), Some(true));
        assert_eq!(baseline.classify(60.0, &options), Some(false));
        assert_eq!(baseline.classify(1200.0, &options), None);
        // Far beyond the ceiling is not trusted as our sleep
        assert_eq!(baseline.classify(9000.0, &options), None);
    }

    #[test]
    fn test_false_ceiling_never_exceeds_true_floor() {
        let baseline = TimingBaseline::from_samples(&[100.0, 1500.0, 3000.0], 2100.0, 2000.0);
        assert!(baseline.false_ceiling(0.9) <= baseline.true_floor(0.9));
    }

    #[test]
    fn test_uncalibrated_technique_reports_reason() {
        let mut calibration = Calibration::default();
        calibration
            .failures
            .insert(Technique::TimeBlind, "too noisy".to_string());

        match calibration.timing(Technique::TimeBlind) {
            Err(OracleError::CalibrationFailed { reason, .. }) => assert_eq!(reason, "too noisy"),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(calibration.boolean().is_err());
        assert!(calibration.usable().is_empty());
    }
}
