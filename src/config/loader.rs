// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::core::ExtractionOptions;
use super::validation::OptionsValidator;

/// Loads extraction options from a JSON document on disk
pub struct OptionsLoader {
    path: PathBuf,
}

impl OptionsLoader {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self) -> Result<ExtractionOptions> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read options file: {:?}", self.path))?;

        let options: ExtractionOptions =
            serde_json::from_str(&content).context("Failed to parse options JSON")?;

        OptionsValidator::validate(&options).context("Options validation failed")?;

        Ok(options)
    }

    pub fn save(&self, options: &ExtractionOptions) -> Result<()> {
        OptionsValidator::validate(options)?;

        let content = serde_json::to_string_pretty(options)?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write options file: {:?}", self.path))?;

        Ok(())
    }
}
