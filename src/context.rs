//! Execution contexts.
//!
//! A [`RawContext`] is the un-typed per-worker, per-operator state: user
//! counters, the parse-error tally, and the sole write entry point into the
//! operator's destination file set. A [`DoContext`] is the thin typed facade
//! handlers emit through: it applies the output's sharding function (or the
//! joiner's constant shard), serializes, and forwards to the raw context.

use crate::dest::DestFileSet;
use crate::output::Output;
use crate::record::{RawRecord, Record};
use crate::shard::ShardId;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-worker execution state for one operator.
pub struct RawContext {
    dest: Arc<DestFileSet>,
    binary: bool,
    counters: HashMap<String, u64>,
    parse_errors: u64,
    records_written: u64,
}

impl RawContext {
    pub(crate) fn new(dest: Arc<DestFileSet>, binary: bool) -> Self {
        Self {
            dest,
            binary,
            counters: HashMap::new(),
            parse_errors: 0,
            records_written: 0,
        }
    }

    /// Whether this operator's output wire format is binary.
    pub fn is_binary(&self) -> bool {
        self.binary
    }

    /// Route one serialized record to its shard. This is the only write
    /// path; typed contexts funnel through it.
    pub fn write(&mut self, sid: ShardId, rec: RawRecord) {
        self.records_written += 1;
        self.dest.get_or_create(&sid).write(rec);
    }

    /// Bump a user counter. Counters are per-worker and merged into the
    /// pipeline stats when the operator finishes.
    pub fn inc_counter(&mut self, name: &str, by: u64) {
        *self.counters.entry(name.to_string()).or_insert(0) += by;
    }

    /// Record one dropped, unparseable record.
    pub fn emit_parse_error(&mut self) {
        self.parse_errors += 1;
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Terminal hook before the context is retired. Pending compressed data
    /// lives in the destination handles and is flushed by their close, so
    /// there is nothing buffered here; the hook stays for symmetry with the
    /// executor lifecycle.
    pub(crate) fn flush(&mut self) {}

    pub(crate) fn into_parts(self) -> (HashMap<String, u64>, u64) {
        (self.counters, self.parse_errors)
    }
}

/// Typed emission facade handed to handlers.
pub struct DoContext<'a, T: Record> {
    out: &'a Output<T>,
    constant_shard: Option<&'a ShardId>,
    raw: &'a mut RawContext,
}

impl<'a, T: Record> DoContext<'a, T> {
    pub(crate) fn new(
        out: &'a Output<T>,
        constant_shard: Option<&'a ShardId>,
        raw: &'a mut RawContext,
    ) -> Self {
        Self {
            out,
            constant_shard,
            raw,
        }
    }

    /// Shard, serialize, and emit one record.
    pub fn write(&mut self, t: T) {
        let sid = match self.constant_shard {
            Some(sid) => sid.clone(),
            None => self.out.shard(&t),
        };
        let rec = t.serialize(self.raw.is_binary());
        self.raw.write(sid, rec);
    }

    /// The underlying raw context (counters live there).
    pub fn raw(&mut self) -> &mut RawContext {
        self.raw
    }
}
