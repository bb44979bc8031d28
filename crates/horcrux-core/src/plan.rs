//! Backup plan record (spec section 3).

use serde::{Deserialize, Serialize};

use crate::steward::Steward;
use crate::Timestamp;

/// `{threshold t, stewards[], relays[], instructions?, version, status,
/// last_distributed_at?}` (spec section 3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupPlan {
    pub threshold: u8,
    pub stewards: Vec<Steward>,
    pub relays: Vec<String>,
    pub instructions: Option<String>,
    pub version: u64,
    pub status: PlanStatus,
    pub last_distributed_at: Option<Timestamp>,
    /// Whether shard-confirmation (kind 1342) is required before `status`
    /// may become `distributed` (spec section 9, open question resolved in
    /// SPEC_FULL.md section D).
    pub require_confirmations: bool,
}

impl BackupPlan {
    pub fn new(threshold: u8, stewards: Vec<Steward>, relays: Vec<String>) -> Self {
        Self {
            threshold,
            stewards,
            relays,
            instructions: None,
            version: 1,
            status: PlanStatus::Draft,
            last_distributed_at: None,
            require_confirmations: true,
        }
    }

    pub fn total_stewards(&self) -> usize {
        self.stewards.len()
    }

    /// Invariants from spec section 3: `1 ≤ t ≤ |stewards| ≤ MAX_STEWARDS`,
    /// `|relays| ≥ 1`.
    pub fn validate(&self) -> Result<(), String> {
        let n = self.stewards.len();
        if self.threshold < 1 {
            return Err("threshold must be at least 1".into());
        }
        if (self.threshold as usize) > n {
            return Err(format!("threshold {} exceeds steward count {n}", self.threshold));
        }
        if n > crate::MAX_STEWARDS {
            return Err(format!("steward count {n} exceeds MAX_STEWARDS"));
        }
        if self.relays.is_empty() {
            return Err("at least one relay is required".into());
        }
        Ok(())
    }

    /// All stewards have redeemed their invitation and hold a pubkey.
    pub fn all_accepted(&self) -> bool {
        self.stewards.iter().all(Steward::is_accepted)
    }

    /// Increment the version and mark the plan stale. Called on any mutation
    /// that invalidates outstanding shares: threshold, steward set, or vault
    /// content (spec section 4.7, "Redistribution").
    pub fn bump_version(&mut self) {
        self.version += 1;
        if self.status == PlanStatus::Distributed {
            self.status = PlanStatus::Stale;
        }
        for steward in &mut self.stewards {
            steward.confirmation_at = None;
        }
    }
}

/// `status ∈ {draft, ready, distributed, stale}` (spec section 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Draft,
    Ready,
    Distributed,
    Stale,
}
