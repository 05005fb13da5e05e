//! Pipeline execution stats.

use crate::context::RawContext;
use serde_json::json;
use std::collections::HashMap;

/// Counters accumulated over a whole run: every worker context is merged in
/// when its operator finishes.
#[derive(Clone, Debug, Default)]
pub struct PipelineStats {
    /// User counters from [`RawContext::inc_counter`].
    pub counters: HashMap<String, u64>,
    /// Records dropped because they failed to parse.
    pub parse_errors: u64,
    /// Records dispatched into handlers across all operators.
    pub map_calls: u64,
    /// Set when the run was stopped; output is partial but consistent.
    pub cancelled: bool,
}

impl PipelineStats {
    pub(crate) fn absorb(&mut self, cx: RawContext, calls: u64) {
        let (counters, parse_errors) = cx.into_parts();
        for (k, v) in counters {
            *self.counters.entry(k).or_insert(0) += v;
        }
        self.parse_errors += parse_errors;
        self.map_calls += calls;
    }

    /// A user counter's value, zero when never incremented.
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    /// JSON snapshot, one object per field plus the counter map.
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "counters": self.counters,
            "parse_errors": self.parse_errors,
            "map_calls": self.map_calls,
            "cancelled": self.cancelled,
        })
    }
}
