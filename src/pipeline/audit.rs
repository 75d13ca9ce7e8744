//! Audit side-channel for rows the pipeline drops, remaps, or collapses.
//!
//! Nothing is ever silently discarded: every intervention is recorded here
//! and written out with the run's outputs for operator review.

use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// Pipeline stage that made the intervention
    pub stage: &'static str,
    pub reason: String,
    pub detail: serde_json::Value,
}

#[derive(Debug, Default, Serialize)]
pub struct AuditLog {
    pub entries: Vec<AuditEntry>,
}

impl AuditLog {
    pub fn record(&mut self, stage: &'static str, reason: impl Into<String>, detail: serde_json::Value) {
        self.entries.push(AuditEntry {
            stage,
            reason: reason.into(),
            detail,
        });
    }

    pub fn merge(&mut self, mut other: AuditLog) {
        self.entries.append(&mut other.entries);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "intervention_count": self.entries.len(),
            "entries": self.entries,
        })
    }
}
