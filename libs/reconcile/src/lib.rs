//! Reconciliation loop primitives.
//!
//! Helpers shared by loops that drive a submitted remote operation to a
//! terminal state by polling:
//!
//! - **Attempt budget**: a deadman's switch that bounds how long a loop may
//!   poll a remote system that never reports a terminal status.
//! - **Generation**: a monotonically increasing operation counter. Writes from
//!   a loop are only valid while the record still carries the generation the
//!   loop was started with.
//! - **Spec hash**: a deterministic fingerprint of declared configuration,
//!   used to detect requests that change nothing.
//!
//! # Invariants
//!
//! - Budgets only count upward; an exhausted budget stays exhausted
//! - Generations never decrease
//! - Spec hashes ignore object key order

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Default sleep between two polls of a remote operation.
pub const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of polls before a loop gives up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2000;

/// Reconciliation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// The loop polled more times than its budget allows.
    #[error("gave up on {resource} after {attempts} attempts")]
    Exhausted { resource: String, attempts: u32 },

    /// A newer operation owns the resource.
    #[error("{resource} superseded: generation {held} is no longer current ({current})")]
    Superseded {
        resource: String,
        held: Generation,
        current: Generation,
    },
}

/// Poll cadence and ceiling for one loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Sleep between two polls.
    pub wait_interval: Duration,

    /// Maximum polls before the loop exits.
    pub max_attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            wait_interval: DEFAULT_WAIT_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Counts polls against a fixed ceiling.
#[derive(Debug, Clone)]
pub struct AttemptBudget {
    max_attempts: u32,
    attempts: u32,
}

impl AttemptBudget {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            attempts: 0,
        }
    }

    /// Record one poll. Returns the attempt number just used.
    pub fn record(&mut self) -> u32 {
        self.attempts = self.attempts.saturating_add(1);
        self.attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// True once more polls were made than the ceiling allows.
    pub fn is_exhausted(&self) -> bool {
        self.attempts > self.max_attempts
    }

    /// Fail with [`ReconcileError::Exhausted`] once the ceiling is passed.
    pub fn check(&self, resource: &str) -> Result<(), ReconcileError> {
        if self.is_exhausted() {
            return Err(ReconcileError::Exhausted {
                resource: resource.to_string(),
                attempts: self.max_attempts,
            });
        }
        Ok(())
    }
}

/// Operation generation of a tracked record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Generation(u64);

impl Generation {
    /// Generation of a freshly created record.
    pub const INITIAL: Self = Self(1);

    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Fail unless `current` is still the generation held by the caller.
    pub fn ensure_current(&self, resource: &str, current: Generation) -> Result<(), ReconcileError> {
        if *self != current {
            return Err(ReconcileError::Superseded {
                resource: resource.to_string(),
                held: *self,
                current,
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A spec hash for deterministic comparison of declared configuration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpecHash(String);

impl SpecHash {
    /// Compute a spec hash from canonical JSON.
    pub fn from_json(json: &serde_json::Value) -> Self {
        let canonical = canonical_json(json);
        let digest = Sha256::digest(canonical.as_bytes());
        Self(format!("sha256:{}", hex::encode(&digest[..16])))
    }

    /// Hash any serializable value; serialization failures hash as `null`.
    pub fn of<T: Serialize>(value: &T) -> Self {
        let json = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        Self::from_json(&json)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SpecHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Produce canonical JSON (sorted keys, no extra whitespace).
fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            let inner: Vec<String> = pairs
                .iter()
                .map(|(k, v)| format!("{}:{}", quote(k), canonical_json(v)))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        serde_json::Value::Array(arr) => {
            let inner: Vec<String> = arr.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        serde_json::Value::String(s) => quote(s),
        other => other.to_string(),
    }
}

fn quote(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_spec_hash_ignores_key_order() {
        let a = serde_json::json!({"b": 2, "a": {"y": [1, 2], "x": null}});
        let b = serde_json::json!({"a": {"x": null, "y": [1, 2]}, "b": 2});
        assert_eq!(SpecHash::from_json(&a), SpecHash::from_json(&b));
    }

    #[test]
    fn test_spec_hash_detects_change() {
        let a = serde_json::json!({"body": "v1"});
        let b = serde_json::json!({"body": "v2"});
        assert_ne!(SpecHash::from_json(&a), SpecHash::from_json(&b));
        assert!(SpecHash::from_json(&a).as_str().starts_with("sha256:"));
    }

    #[rstest]
    #[case(3, 3, false)]
    #[case(3, 4, true)]
    #[case(0, 1, true)]
    fn test_budget_exhaustion(#[case] max: u32, #[case] polls: u32, #[case] exhausted: bool) {
        let mut budget = AttemptBudget::new(max);
        for _ in 0..polls {
            budget.record();
        }
        assert_eq!(budget.is_exhausted(), exhausted);
        assert_eq!(budget.check("fn_x").is_err(), exhausted);
    }

    #[test]
    fn test_budget_reports_ceiling() {
        let mut budget = AttemptBudget::new(1);
        budget.record();
        budget.record();
        assert_eq!(
            budget.check("np_a"),
            Err(ReconcileError::Exhausted {
                resource: "np_a".to_string(),
                attempts: 1
            })
        );
    }

    #[test]
    fn test_generation_ordering() {
        let g = Generation::INITIAL;
        assert_eq!(g.next().value(), 2);
        assert!(g.ensure_current("fn_a", g).is_ok());
        assert!(matches!(
            g.ensure_current("fn_a", g.next()),
            Err(ReconcileError::Superseded { .. })
        ));
    }
}
