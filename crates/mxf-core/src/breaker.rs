// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, HashSet};

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Repeat-call guard over one session.
///
/// Tracks `(tool, argument-fingerprint)` pairs; when a non-exempt pair is
/// dispatched for the `trip_count`-th time the session must end as broken.
/// Argument fingerprints are SHA-256 over the canonical JSON encoding
/// (serde_json orders object keys, so semantically equal argument objects
/// fingerprint identically).
#[derive(Debug)]
pub struct CircuitBreaker {
    seen: HashMap<String, u32>,
    exempt: HashSet<String>,
    trip_count: u32,
}

impl CircuitBreaker {
    pub fn new(trip_count: u32, exempt: HashSet<String>) -> Self {
        Self {
            seen: HashMap::new(),
            exempt,
            trip_count: trip_count.max(1),
        }
    }

    /// Record a dispatch attempt. Returns `true` when the breaker trips —
    /// the attempt that reaches the trip count must not execute.
    pub fn record(&mut self, tool: &str, args: &Value) -> bool {
        if self.exempt.contains(tool) {
            return false;
        }
        let count = self
            .seen
            .entry(fingerprint(tool, args))
            .and_modify(|c| *c += 1)
            .or_insert(1);
        *count >= self.trip_count
    }
}

fn fingerprint(tool: &str, args: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tool.as_bytes());
    hasher.update(b"\0");
    hasher.update(args.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(3, HashSet::new())
    }

    #[test]
    fn trips_on_third_identical_call() {
        let mut b = breaker();
        assert!(!b.record("game_makeMove", &json!({"row": 0, "col": 0})));
        assert!(!b.record("game_makeMove", &json!({"row": 0, "col": 0})));
        assert!(b.record("game_makeMove", &json!({"row": 0, "col": 0})));
    }

    #[test]
    fn different_args_do_not_trip() {
        let mut b = breaker();
        for row in 0..5 {
            assert!(!b.record("game_makeMove", &json!({"row": row, "col": 0})));
        }
    }

    #[test]
    fn different_tools_do_not_share_counts() {
        let mut b = breaker();
        assert!(!b.record("a", &json!({})));
        assert!(!b.record("b", &json!({})));
        assert!(!b.record("a", &json!({})));
        assert!(!b.record("b", &json!({})));
        assert!(b.record("a", &json!({})));
    }

    #[test]
    fn exempt_tools_never_trip() {
        let mut b = CircuitBreaker::new(3, ["game_getBoard".to_string()].into_iter().collect());
        for _ in 0..10 {
            assert!(!b.record("game_getBoard", &json!({})));
        }
    }

    #[test]
    fn key_order_does_not_change_fingerprint() {
        // serde_json canonicalizes object key order, so these are identical.
        let a: Value = serde_json::from_str(r#"{"row": 1, "col": 2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"col": 2, "row": 1}"#).unwrap();
        let mut breaker = breaker();
        breaker.record("t", &a);
        breaker.record("t", &b);
        assert!(breaker.record("t", &a));
    }

    #[test]
    fn trip_count_one_trips_immediately() {
        let mut b = CircuitBreaker::new(1, HashSet::new());
        assert!(b.record("t", &json!({})));
    }
}
