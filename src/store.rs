// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Load/save hooks for resuming a session's extracted values.

use crate::types::ExtractedValue;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredValue {
    pub value: ExtractedValue,
    pub stored_at: DateTime<Utc>,
}

/// Fingerprint (hex) to value. Storage medium is up to the implementation.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<BTreeMap<String, StoredValue>>;

    fn save(&self, entries: &BTreeMap<String, StoredValue>) -> Result<()>;
}

/// Pretty-printed JSON document on disk
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for JsonFileStore {
    /// A missing file is an empty session
    fn load(&self) -> Result<BTreeMap<String, StoredValue>> {
        if !self.path.exists() {
            debug!(path = ?self.path, "No session file, starting empty");
            return Ok(BTreeMap::new());
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read session file: {:?}", self.path))?;

        let entries: BTreeMap<String, StoredValue> =
            serde_json::from_str(&content).context("Failed to parse session JSON")?;

        Ok(entries
            .into_iter()
            .filter(|(fingerprint, _)| {
                let valid = is_fingerprint(fingerprint);
                if !valid {
                    warn!(fingerprint = %fingerprint, "Skipping malformed fingerprint");
                }
                valid
            })
            .collect())
    }

    fn save(&self, entries: &BTreeMap<String, StoredValue>) -> Result<()> {
        let content = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write session file: {:?}", self.path))?;

        debug!(path = ?self.path, entries = entries.len(), "Session file written");
        Ok(())
    }
}

fn is_fingerprint(candidate: &str) -> bool {
    candidate.len() == 64 && hex::decode(candidate).is_ok()
}
