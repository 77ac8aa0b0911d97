// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

use std::collections::HashSet;
use validator::Validate;

use super::core::ExtractionOptions;
use crate::errors::ConfigError;

pub struct OptionsValidator;

impl OptionsValidator {
    pub fn validate(options: &ExtractionOptions) -> Result<(), ConfigError> {
        options
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        Self::validate_backoff(options)?;
        Self::validate_priority_override(options)?;

        Ok(())
    }

    fn validate_backoff(options: &ExtractionOptions) -> Result<(), ConfigError> {
        if options.backoff_cap_ms < options.backoff_base_ms {
            return Err(ConfigError::Invalid(format!(
                "backoff cap ({}ms) is below backoff base ({}ms)",
                options.backoff_cap_ms, options.backoff_base_ms
            )));
        }

        Ok(())
    }

    fn validate_priority_override(options: &ExtractionOptions) -> Result<(), ConfigError> {
        let Some(order) = &options.technique_priority_override else {
            return Ok(());
        };

        if order.is_empty() {
            return Err(ConfigError::Invalid(
                "technique priority override cannot be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for technique in order {
            if !seen.insert(*technique) {
                return Err(ConfigError::Invalid(format!(
                    "technique {} listed twice in priority override",
                    technique
                )));
            }
        }

        Ok(())
    }
}
