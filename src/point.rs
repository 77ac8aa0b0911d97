// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Injection Point
 * Confirmed vulnerable parameter with its dialect, transport and calibration
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use crate::dialect::Dialect;
use crate::oracle::calibration::Calibration;
use crate::probe::Probe;
use crate::types::Technique;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Handed over by the detection phase. Calibration is filled in lazily,
/// exactly once, and is read-only afterwards.
pub struct InjectionPoint {
    id: String,
    techniques: Vec<Technique>,
    dialect: Arc<dyn Dialect>,
    probe: Arc<dyn Probe>,
    pub(crate) calibration: OnceCell<Calibration>,
}

impl InjectionPoint {
    pub fn new(
        id: impl Into<String>,
        techniques: impl IntoIterator<Item = Technique>,
        dialect: Arc<dyn Dialect>,
        probe: Arc<dyn Probe>,
    ) -> Self {
        let mut techniques: Vec<Technique> = techniques.into_iter().collect();
        techniques.sort();
        techniques.dedup();

        Self {
            id: id.into(),
            techniques,
            dialect,
            probe,
            calibration: OnceCell::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn techniques(&self) -> &[Technique] {
        &self.techniques
    }

    pub fn has(&self, technique: Technique) -> bool {
        self.techniques.contains(&technique)
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn probe(&self) -> &dyn Probe {
        self.probe.as_ref()
    }

    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.get()
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibration.initialized()
    }
}

impl fmt::Debug for InjectionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectionPoint")
            .field("id", &self.id)
            .field("techniques", &self.techniques)
            .field("dbms", &self.dialect.dbms())
            .field("calibrated", &self.is_calibrated())
            .finish()
    }
}
