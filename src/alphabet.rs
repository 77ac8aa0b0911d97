// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Frequency Ranked Alphabet
 * Session-wide character statistics and weighted bisection planning
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use std::sync::atomic::{AtomicU64, Ordering};

/// Weight of one observed occurrence relative to the static prior
const OBSERVED_WEIGHT: u64 = 16;

/// Static prior for characters never seen in this session
fn prior_weight(code: u8) -> u64 {
    match code {
        b'a'..=b'z' => 6,
        b'0'..=b'9' | b'_' | b' ' | b'.' | b'-' | b'@' => 4,
        b'A'..=b'Z' => 3,
        0x21..=0x7e => 2,
        _ => 1,
    }
}

/// Character frequencies shared by every extraction in a session
pub struct RankedAlphabet {
    counts: Vec<AtomicU64>,
}

impl Default for RankedAlphabet {
    fn default() -> Self {
        Self::new()
    }
}

impl RankedAlphabet {
    pub fn new() -> Self {
        Self {
            counts: (0..256).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn observe(&self, code: u8) {
        self.counts[code as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// Pre-seed from text known to resemble what will be extracted
    pub fn seed(&self, text: &[u8]) {
        for &code in text {
            self.observe(code);
        }
    }

    pub fn count(&self, code: u8) -> u64 {
        self.counts[code as usize].load(Ordering::Relaxed)
    }

    pub fn weight(&self, code: u8) -> u64 {
        self.count(code) * OBSERVED_WEIGHT + prior_weight(code)
    }

    /// Order `codes` most likely first; ties keep ascending code order
    pub fn rank(&self, codes: &[u8]) -> Vec<(u8, u64)> {
        let mut ranked: Vec<(u8, u64)> = codes.iter().map(|&c| (c, self.weight(c))).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked
    }
}

/// Outcome of a character bisection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leaf {
    Code(u8),
    /// None of the active alphabet matched
    Outside,
}

/// Binary search over a ranked index space.
///
/// Each step tests membership of a prefix of the remaining candidates. The
/// prefix size is restricted so both halves still fit in the probes left,
/// which keeps the worst case at `ceil(log2(n))` while letting frequent
/// characters resolve sooner. The `Outside` leaf, when present, is
/// always last and is never part of a tested prefix.
///
/// With the `Outside` leaf the worst case over `K` codes is
/// `ceil(log2(K + 1))`. That equals `ceil(log2(K))` unless `K` is a power
/// of two, where detecting an out-of-alphabet character costs one probe.
/// Without it (count digits) the bound is `ceil(log2(K))` exactly.
#[derive(Debug, Clone)]
pub struct Bisection {
    remaining: Vec<(Leaf, u64)>,
    budget: u32,
}

impl Bisection {
    pub fn new(ranked: Vec<(u8, u64)>, include_outside: bool) -> Self {
        let mut remaining: Vec<(Leaf, u64)> = ranked
            .into_iter()
            .map(|(code, weight)| (Leaf::Code(code), weight))
            .collect();
        if include_outside || remaining.is_empty() {
            remaining.push((Leaf::Outside, 0));
        }
        let budget = probe_budget(remaining.len());
        Self { remaining, budget }
    }

    pub fn resolved(&self) -> Option<Leaf> {
        match self.remaining.as_slice() {
            [(leaf, _)] => Some(*leaf),
            _ => None,
        }
    }

    pub fn candidates(&self) -> usize {
        self.remaining.len()
    }

    /// Codes whose membership the next probe should test
    pub fn probe_set(&self) -> Vec<u8> {
        if self.remaining.len() < 2 {
            return Vec::new();
        }
        let split = split_point(&self.remaining, self.budget);
        self.remaining[..split]
            .iter()
            .filter_map(|(leaf, _)| match leaf {
                Leaf::Code(code) => Some(*code),
                Leaf::Outside => None,
            })
            .collect()
    }

    /// Narrow to the tested prefix (`true`) or the rest (`false`)
    pub fn apply(&mut self, in_probe_set: bool) {
        if self.remaining.len() < 2 {
            return;
        }
        let split = split_point(&self.remaining, self.budget);
        self.budget -= 1;
        if in_probe_set {
            self.remaining.truncate(split);
        } else {
            self.remaining.drain(..split);
        }
    }
}

/// Probes needed in the worst case for `n` candidates
pub fn probe_budget(n: usize) -> u32 {
    if n <= 1 {
        0
    } else {
        usize::BITS - (n - 1).leading_zeros()
    }
}

/// Invariant: `2 <= items.len() <= 2^budget`
fn split_point(items: &[(Leaf, u64)], budget: u32) -> usize {
    let n = items.len();
    debug_assert!(n >= 2 && budget >= probe_budget(n));

    let cap = 1usize << (budget - 1);
    let lo = n.saturating_sub(cap).max(1);
    let hi = cap.min(n - 1);

    let total: u128 = items.iter().map(|(_, w)| *w as u128).sum();
    let mut prefix: u128 = items[..lo - 1].iter().map(|(_, w)| *w as u128).sum();

    let mut best = lo;
    let mut best_gap = u128::MAX;
    for size in lo..=hi {
        prefix += items[size - 1].1 as u128;
        let gap = (2 * prefix).abs_diff(total);
        if gap < best_gap {
            best_gap = gap;
            best = size;
        }
    }
    best
}
