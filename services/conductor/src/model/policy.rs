//! Node pool scaling policies.

use oasis_id::NodePoolPolicyId;
use serde::{Deserialize, Serialize};

/// Autoscaling bounds and alarm settings for a node pool.
///
/// Fields left unset are not passed to the orchestrator, so the template's
/// own defaults apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePoolPolicy {
    pub id: NodePoolPolicyId,
    pub name: String,
    #[serde(default)]
    pub min_size: Option<u32>,
    #[serde(default)]
    pub max_size: Option<u32>,
    #[serde(default)]
    pub scaleup_adjust: Option<u32>,
    #[serde(default)]
    pub scaleup_cooldown: Option<u32>,
    #[serde(default)]
    pub scaleup_period: Option<u32>,
    #[serde(default)]
    pub scaleup_evaluation_periods: Option<u32>,
    #[serde(default)]
    pub scaleup_threshold: Option<u32>,
    #[serde(default)]
    pub scaledown_adjust: Option<u32>,
    #[serde(default)]
    pub scaledown_cooldown: Option<u32>,
    #[serde(default)]
    pub scaledown_period: Option<u32>,
    #[serde(default)]
    pub scaledown_evaluation_periods: Option<u32>,
    #[serde(default)]
    pub scaledown_threshold: Option<u32>,
}

impl NodePoolPolicy {
    /// Check that the size bounds are coherent.
    pub fn validate(&self) -> Result<(), String> {
        if let (Some(min), Some(max)) = (self.min_size, self.max_size) {
            if min > max {
                return Err(format!("min_size {min} exceeds max_size {max}"));
            }
        }
        Ok(())
    }

    /// Clamp a requested node count into the policy bounds.
    pub fn clamp_size(&self, requested: u32) -> u32 {
        let lower = self.min_size.unwrap_or(0);
        let upper = self.max_size.unwrap_or(u32::MAX).max(lower);
        requested.clamp(lower, upper)
    }

    /// Scaling parameters as `(name, value)` pairs, skipping unset fields.
    pub fn scaling_hints(&self) -> Vec<(&'static str, u32)> {
        [
            ("min_size", self.min_size),
            ("max_size", self.max_size),
            ("scaleup_adjust", self.scaleup_adjust),
            ("scaleup_cooldown", self.scaleup_cooldown),
            ("scaleup_period", self.scaleup_period),
            ("scaleup_evaluation_periods", self.scaleup_evaluation_periods),
            ("scaleup_threshold", self.scaleup_threshold),
            ("scaledown_adjust", self.scaledown_adjust),
            ("scaledown_cooldown", self.scaledown_cooldown),
            ("scaledown_period", self.scaledown_period),
            ("scaledown_evaluation_periods", self.scaledown_evaluation_periods),
            ("scaledown_threshold", self.scaledown_threshold),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name, v)))
        .collect()
    }
}
