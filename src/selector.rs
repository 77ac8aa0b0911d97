// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Technique Selector
 * Priority ordering and fallback among injection techniques
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use crate::config::ExtractionOptions;
use crate::errors::{OracleError, SelectorError};
use crate::point::InjectionPoint;
use crate::types::{Capability, Technique};
use tracing::{debug, warn};

/// Orders techniques by fixed priority, optionally overridden per session
#[derive(Debug, Clone)]
pub struct TechniqueSelector {
    order: Vec<Technique>,
}

impl Default for TechniqueSelector {
    fn default() -> Self {
        Self {
            order: Technique::PRIORITY.to_vec(),
        }
    }
}

impl TechniqueSelector {
    /// Listed techniques come first in the given order; anything not listed
    /// keeps its default priority after them.
    pub fn with_priority(priority: &[Technique]) -> Self {
        let mut order: Vec<Technique> = Vec::with_capacity(Technique::PRIORITY.len());
        for &technique in priority.iter().chain(Technique::PRIORITY.iter()) {
            if !order.contains(&technique) {
                order.push(technique);
            }
        }
        Self { order }
    }

    pub fn from_options(options: &ExtractionOptions) -> Self {
        match &options.technique_priority_override {
            Some(priority) => Self::with_priority(priority),
            None => Self::default(),
        }
    }

    pub fn order(&self) -> &[Technique] {
        &self.order
    }

    /// Techniques available on the point that provide `capability`, best first
    pub fn select(&self, point: &InjectionPoint, capability: Capability) -> Vec<Technique> {
        self.order
            .iter()
            .copied()
            .filter(|t| point.has(*t) && t.supports(capability))
            .collect()
    }

    pub fn cursor(
        &self,
        point: &InjectionPoint,
        capability: Capability,
        failure_budget: u32,
    ) -> TechniqueCursor {
        TechniqueCursor {
            point_id: point.id().to_string(),
            candidates: self.select(point, capability),
            index: 0,
            failures: 0,
            budget: failure_budget,
        }
    }
}

/// Position in one job's candidate list. Owned by the job so a noisy row
/// cannot degrade the technique used by its neighbours.
#[derive(Debug, Clone)]
pub struct TechniqueCursor {
    point_id: String,
    candidates: Vec<Technique>,
    index: usize,
    failures: u32,
    budget: u32,
}

impl TechniqueCursor {
    /// Continue from a technique an earlier attempt had switched to
    pub fn resume_at(mut self, technique: Option<Technique>) -> Self {
        if let Some(position) = technique.and_then(|t| self.candidates.iter().position(|c| *c == t)) {
            self.index = position;
        }
        self
    }

    pub fn current(&self) -> Result<Technique, SelectorError> {
        self.candidates
            .get(self.index)
            .copied()
            .ok_or(SelectorError::ExhaustedTechniques)
    }

    /// Candidates not yet abandoned, current one first
    pub fn remaining(&self) -> &[Technique] {
        self.candidates.get(self.index..).unwrap_or(&[])
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    /// Count a failed decision against the current technique.
    ///
    /// Returns `Ok(Some(TechniqueDegraded))` when the cursor moved on,
    /// `Ok(None)` when the caller should keep using the same technique, and
    /// `Err(ExhaustedTechniques)` when nothing usable remains. Transient
    /// faults on the last candidate never exhaust it; they surface through
    /// the caller's own retry budget instead.
    pub fn record_failure(&mut self, error: &OracleError) -> Result<Option<SelectorError>, SelectorError> {
        let from = self.current()?;

        if matches!(error, OracleError::CalibrationFailed { .. }) {
            return self.advance(from).map(Some);
        }

        if !error.is_technique_fault() {
            return Ok(None);
        }

        self.failures += 1;
        debug!(
            point = %self.point_id,
            technique = %from,
            failures = self.failures,
            budget = self.budget,
            "Technique fault recorded"
        );

        if self.failures < self.budget || self.index + 1 >= self.candidates.len() {
            return Ok(None);
        }

        self.advance(from).map(Some)
    }

    /// Abandon the current technique unconditionally
    pub fn skip(&mut self) -> Result<Option<SelectorError>, SelectorError> {
        let from = self.current()?;
        match self.advance(from) {
            Ok(degraded) => Ok(Some(degraded)),
            Err(SelectorError::ExhaustedTechniques) => Ok(None),
            Err(other) => Err(other),
        }
    }

    fn advance(&mut self, from: Technique) -> Result<SelectorError, SelectorError> {
        self.index += 1;
        self.failures = 0;

        match self.candidates.get(self.index).copied() {
            Some(to) => {
                warn!(
                    point = %self.point_id,
                    from = %from,
                    to = %to,
                    "Technique degraded, switching"
                );
                Ok(SelectorError::TechniqueDegraded { from, to })
            }
            None => {
                warn!(point = %self.point_id, last = %from, "No usable technique left");
                Err(SelectorError::ExhaustedTechniques)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{dialect_for, Dbms};
    use crate::probe::{Probe, ProbeError, ProbeRequest, RawResponse};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct SilentProbe;

    #[async_trait]
    impl Probe for SilentProbe {
        async fn send(&self, _request: ProbeRequest) -> Result<RawResponse, ProbeError> {
            Err(ProbeError::Network("unused".into()))
        }
    }

    fn point(techniques: Vec<Technique>) -> InjectionPoint {
        InjectionPoint::new(
            "p1",
            techniques,
            dialect_for(Dbms::PostgreSql, None),
            Arc::new(SilentProbe),
        )
    }

    #[test]
    fn test_select_filters_and_orders() {
        let selector = TechniqueSelector::default();
        let point = point(vec![Technique::TimeBlind, Technique::Union, Technique::BooleanBlind]);

        assert_eq!(
            selector.select(&point, Capability::BooleanOracle),
            vec![Technique::BooleanBlind, Technique::TimeBlind]
        );
        assert_eq!(
            selector.select(&point, Capability::DirectRetrieval),
            vec![Technique::Union]
        );
    }

    #[test]
    fn test_priority_override_keeps_unlisted() {
        let selector = TechniqueSelector::with_priority(&[Technique::TimeBlind]);
        assert_eq!(selector.order()[0], Technique::TimeBlind);
        assert_eq!(selector.order().len(), 5);
        assert_eq!(selector.order()[4], Technique::BooleanBlind);
    }

    #[test]
    fn test_degrades_after_budget() {
        let selector = TechniqueSelector::default();
        let point = point(vec![Technique::BooleanBlind, Technique::TimeBlind]);
        let mut cursor = selector.cursor(&point, Capability::BooleanOracle, 3);
        let noise = OracleError::Network("reset".into());

        assert_eq!(cursor.record_failure(&noise), Ok(None));
        assert_eq!(cursor.record_failure(&noise), Ok(None));
        assert_eq!(
            cursor.record_failure(&noise),
            Ok(Some(SelectorError::TechniqueDegraded {
                from: Technique::BooleanBlind,
                to: Technique::TimeBlind,
            }))
        );
        assert_eq!(cursor.current(), Ok(Technique::TimeBlind));

        // Last candidate is not abandoned for transient noise
        for _ in 0..10 {
            assert_eq!(cursor.record_failure(&noise), Ok(None));
        }
    }

    #[test]
    fn test_success_resets_failures() {
        let selector = TechniqueSelector::default();
        let point = point(vec![Technique::BooleanBlind, Technique::TimeBlind]);
        let mut cursor = selector.cursor(&point, Capability::BooleanOracle, 2);
        let noise = OracleError::Ambiguous {
            technique: Technique::BooleanBlind,
        };

        assert_eq!(cursor.record_failure(&noise), Ok(None));
        cursor.record_success();
        assert_eq!(cursor.record_failure(&noise), Ok(None));
        assert_eq!(cursor.current(), Ok(Technique::BooleanBlind));
    }

    #[test]
    fn test_blocks_do_not_count_against_technique() {
        let selector = TechniqueSelector::default();
        let point = point(vec![Technique::BooleanBlind, Technique::TimeBlind]);
        let mut cursor = selector.cursor(&point, Capability::BooleanOracle, 1);

        assert_eq!(cursor.record_failure(&OracleError::WafBlocked("403".into())), Ok(None));
        assert_eq!(cursor.current(), Ok(Technique::BooleanBlind));
    }

    #[test]
    fn test_calibration_failure_exhausts() {
        let selector = TechniqueSelector::default();
        let point = point(vec![Technique::BooleanBlind]);
        let mut cursor = selector.cursor(&point, Capability::BooleanOracle, 3);

        let err = OracleError::CalibrationFailed {
            technique: Technique::BooleanBlind,
            reason: "flat".into(),
        };
        assert_eq!(cursor.record_failure(&err), Err(SelectorError::ExhaustedTechniques));
        assert_eq!(cursor.current(), Err(SelectorError::ExhaustedTechniques));
        assert!(cursor.remaining().is_empty());
    }

    #[test]
    fn test_resume_at_previous_technique() {
        let selector = TechniqueSelector::default();
        let point = point(vec![Technique::BooleanBlind, Technique::TimeBlind]);
        let cursor = selector
            .cursor(&point, Capability::BooleanOracle, 3)
            .resume_at(Some(Technique::TimeBlind));

        assert_eq!(cursor.current(), Ok(Technique::TimeBlind));

        let cursor = selector
            .cursor(&point, Capability::BooleanOracle, 3)
            .resume_at(Some(Technique::Union));
        assert_eq!(cursor.current(), Ok(Technique::BooleanBlind));
    }
}
