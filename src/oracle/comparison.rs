// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Response fingerprints and similarity scoring for boolean decisions.

use crate::probe::RawResponse;
use once_cell::sync::Lazy;
use regex::Regex;
use similar::TextDiff;

static TITLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());

/// Regex patterns for normalization (strip dynamic content before comparing)
static TIMESTAMP_ISO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2})?").unwrap()
});

static TIMESTAMP_COMMON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d{1,2}/\d{1,2}/\d{2,4}\s+\d{1,2}:\d{2}(?::\d{2})?(?:\s*[AP]M)?").unwrap()
});

static HTML_COMMENTS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());

static TOKENS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:session(?:id)?|csrf[_-]?token|_token|nonce)[=:]\s*[a-z0-9+/=_-]{16,}").unwrap()
});

static WHITESPACE_NORMALIZE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Strip the reflected payload and per-request noise from a body
pub fn normalize(body: &str, reflected: &str) -> String {
    let mut normalized = if reflected.is_empty() {
        body.to_string()
    } else {
        body.replace(reflected, "")
    };

    normalized = TIMESTAMP_ISO.replace_all(&normalized, "[TIMESTAMP]").to_string();
    normalized = TIMESTAMP_COMMON.replace_all(&normalized, "[TIMESTAMP]").to_string();
    normalized = HTML_COMMENTS.replace_all(&normalized, "").to_string();
    normalized = TOKENS.replace_all(&normalized, "[TOKEN]").to_string();
    normalized = WHITESPACE_NORMALIZE.replace_all(&normalized, " ").to_string();

    normalized.trim().to_string()
}

/// Ratio between 0.0 (completely different) and 1.0 (identical)
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    TextDiff::from_chars(a, b).ratio().into()
}

pub fn extract_title(body: &str) -> Option<String> {
    TITLE
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| WHITESPACE_NORMALIZE.replace_all(m.as_str().trim(), " ").to_string())
}

/// What a calibrated true or false page looks like
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSignature {
    pub status: u16,
    pub title: Option<String>,
    pub body: String,
}

impl ResponseSignature {
    pub fn capture(response: &RawResponse, payload: &str) -> Self {
        Self {
            status: response.status,
            title: extract_title(&response.body),
            body: normalize(&response.body, payload),
        }
    }
}
