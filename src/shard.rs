//! Shard identifiers.
//!
//! A shard is one partition of an operator's output. Shards are identified
//! either by a non-negative index (modulo-N sharding) or by a user-supplied
//! name (custom sharding). Equality and hashing are defined over the tagged
//! variant, so `Index(1)` and `Named("1")` are distinct shards.

use std::fmt;

/// Identifies one output shard of an operator.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShardId {
    /// Modulo-N shard index.
    Index(u32),
    /// Custom shard name produced by a user sharding function.
    Named(String),
}

impl ShardId {
    /// Canonical file title for this shard under the given base name.
    ///
    /// Index shards render as `<base>-NNNN` (zero-padded to four digits);
    /// named shards render as `<base>-<name>`. The result is stable, so a
    /// downstream stage's input expansion is deterministic and idempotent.
    pub fn title(&self, base: &str) -> String {
        match self {
            ShardId::Index(i) => format!("{base}-{i:04}"),
            ShardId::Named(s) => format!("{base}-{s}"),
        }
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardId::Index(i) => write!(f, "{i}"),
            ShardId::Named(s) => f.write_str(s),
        }
    }
}

impl From<u32> for ShardId {
    fn from(i: u32) -> Self {
        ShardId::Index(i)
    }
}

impl From<&str> for ShardId {
    fn from(s: &str) -> Self {
        ShardId::Named(s.to_string())
    }
}

impl From<String> for ShardId {
    fn from(s: String) -> Self {
        ShardId::Named(s)
    }
}
