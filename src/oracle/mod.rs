// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Oracle Adapter
 * Turns raw probes into calibrated true/false decisions and in-band reads
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

pub mod calibration;
pub mod comparison;

use crate::config::ExtractionOptions;
use crate::dialect::{Dialect, INBAND_NULL, INBAND_START, INBAND_STOP};
use crate::errors::OracleError;
use crate::events::{EventSink, ProgressEvent};
use crate::point::InjectionPoint;
use crate::probe::{ProbeGate, ProbeRequest, RawResponse};
use crate::types::Technique;
use calibration::{calibrate, BooleanCalibration, Calibration, TimingBaseline};
use comparison::{extract_title, normalize, similarity};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static INBAND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        "(?s){}(.*?){}",
        regex::escape(INBAND_START),
        regex::escape(INBAND_STOP)
    ))
    .unwrap()
});

/// Wrap a condition the way `technique` needs it on the wire
pub(crate) fn render_payload(
    dialect: &dyn Dialect,
    technique: Technique,
    condition: &str,
    delay_secs: u64,
) -> String {
    match technique {
        Technique::Stacked => dialect.stacked_delay(condition, delay_secs),
        Technique::TimeBlind => dialect.time_delay(condition, delay_secs),
        _ => condition.to_string(),
    }
}

/// Value read between the in-band markers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InbandValue {
    Null,
    Text(String),
}

pub fn parse_inband(body: &str) -> Option<InbandValue> {
    let captured = INBAND.captures(body)?.get(1)?.as_str();
    if captured == INBAND_NULL {
        Some(InbandValue::Null)
    } else {
        Some(InbandValue::Text(captured.to_string()))
    }
}

/// Oracle view of one injection point for one run
pub struct OracleAdapter<'a> {
    point: &'a InjectionPoint,
    gate: &'a ProbeGate,
    options: &'a ExtractionOptions,
    events: &'a dyn EventSink,
}

impl<'a> OracleAdapter<'a> {
    pub fn new(
        point: &'a InjectionPoint,
        gate: &'a ProbeGate,
        options: &'a ExtractionOptions,
        events: &'a dyn EventSink,
    ) -> Self {
        Self {
            point,
            gate,
            options,
            events,
        }
    }

    /// Calibrate on first use. Concurrent first callers wait on one run;
    /// a failed run leaves the point uncalibrated for the next caller.
    pub async fn calibration(&self) -> Result<&'a Calibration, OracleError> {
        let point: &'a InjectionPoint = self.point;
        point
            .calibration
            .get_or_try_init(|| async {
                let calibration = calibrate(point, self.gate, self.options).await?;
                self.events.emit(ProgressEvent::Calibrated {
                    point: point.id().to_string(),
                    techniques: calibration.usable(),
                });
                Ok(calibration)
            })
            .await
    }

    /// Does `condition` hold in the remote database?
    pub async fn decide(&self, technique: Technique, condition: &str) -> Result<bool, OracleError> {
        let calibration = self.calibration().await?;

        let answer = if technique.is_time_based() {
            self.decide_timing(technique, condition, calibration.timing(technique)?)
                .await?
        } else if technique == Technique::BooleanBlind {
            self.decide_boolean(condition, calibration.boolean()?).await?
        } else {
            return Err(OracleError::CalibrationFailed {
                technique,
                reason: "technique cannot act as a boolean oracle".to_string(),
            });
        };

        debug!(
            point = self.point.id(),
            technique = %technique,
            condition = condition,
            answer = answer,
            "Oracle decision"
        );
        Ok(answer)
    }

    /// Read `expression` directly through a UNION or error-based channel
    pub async fn retrieve(&self, technique: Technique, expression: &str) -> Result<InbandValue, OracleError> {
        let payload = self.point.dialect().inband_wrap(expression);
        let response = self
            .gate
            .send(
                self.point.probe(),
                ProbeRequest {
                    technique,
                    payload,
                    timing_hint: None,
                },
            )
            .await?;

        parse_inband(&response.body).ok_or(OracleError::Ambiguous { technique })
    }

    async fn decide_boolean(
        &self,
        condition: &str,
        calibration: &BooleanCalibration,
    ) -> Result<bool, OracleError> {
        if let Some(answer) = self.boolean_sample(condition, calibration).await? {
            return Ok(answer);
        }

        debug!(
            point = self.point.id(),
            condition = condition,
            "Ambiguous boolean response, confirming"
        );

        self.boolean_sample(condition, calibration)
            .await?
            .ok_or(OracleError::Ambiguous {
                technique: Technique::BooleanBlind,
            })
    }

    async fn boolean_sample(
        &self,
        condition: &str,
        calibration: &BooleanCalibration,
    ) -> Result<Option<bool>, OracleError> {
        let response = self
            .gate
            .send(
                self.point.probe(),
                ProbeRequest {
                    technique: Technique::BooleanBlind,
                    payload: condition.to_string(),
                    timing_hint: None,
                },
            )
            .await?;

        Ok(classify_boolean(&response, condition, calibration, self.options))
    }

    async fn decide_timing(
        &self,
        technique: Technique,
        condition: &str,
        baseline: &TimingBaseline,
    ) -> Result<bool, OracleError> {
        let payload = render_payload(
            self.point.dialect(),
            technique,
            condition,
            self.options.time_delay_secs,
        );

        if let Some(answer) = self.timing_sample(technique, &payload, baseline).await? {
            return Ok(answer);
        }

        let mut votes_true = 0u32;
        let mut votes_false = 0u32;
        for _ in 0..self.options.ambiguity_retry_count {
            match self.timing_sample(technique, &payload, baseline).await? {
                Some(true) => votes_true += 1,
                Some(false) => votes_false += 1,
                None => {}
            }
        }

        debug!(
            point = self.point.id(),
            technique = %technique,
            votes_true = votes_true,
            votes_false = votes_false,
            "Timing re-probe votes"
        );

        if votes_true > votes_false {
            Ok(true)
        } else if votes_false > votes_true {
            Ok(false)
        } else {
            Err(OracleError::Ambiguous { technique })
        }
    }

    async fn timing_sample(
        &self,
        technique: Technique,
        payload: &str,
        baseline: &TimingBaseline,
    ) -> Result<Option<bool>, OracleError> {
        let response = self
            .gate
            .send(
                self.point.probe(),
                ProbeRequest {
                    technique,
                    payload: payload.to_string(),
                    timing_hint: Some(self.options.time_delay()),
                },
            )
            .await?;

        let latency_ms = response.latency.as_secs_f64() * 1000.0;
        Ok(baseline.classify(latency_ms, self.options))
    }
}

/// Status first, then title, then normalized body similarity
fn classify_boolean(
    response: &RawResponse,
    payload: &str,
    calibration: &BooleanCalibration,
    options: &ExtractionOptions,
) -> Option<bool> {
    let truthy = &calibration.true_signature;
    let falsy = &calibration.false_signature;

    if truthy.status != falsy.status {
        return if response.status == truthy.status {
            Some(true)
        } else if response.status == falsy.status {
            Some(false)
        } else {
            None
        };
    }

    if truthy.title != falsy.title {
        let title = extract_title(&response.body);
        if title == truthy.title {
            return Some(true);
        }
        if title == falsy.title {
            return Some(false);
        }
    }

    let body = normalize(&response.body, payload);
    let ratio_true = similarity(&body, &truthy.body);
    let ratio_false = similarity(&body, &falsy.body);

    if ratio_true >= options.similarity_threshold
        && ratio_true - ratio_false >= options.similarity_margin
    {
        Some(true)
    } else if ratio_false >= options.similarity_threshold
        && ratio_false - ratio_true >= options.similarity_margin
    {
        Some(false)
    } else {
        None
    }
}
