//! Plain-data operator plan.
//!
//! The planning surface in [`crate::table`] builds these records; they are
//! frozen once [`Pipeline::run`](crate::Pipeline::run) starts. References
//! between stages are by output name, never by object edges, so the graph
//! stays acyclic plain data.

use crate::shard::ShardId;
use std::path::PathBuf;

/// On-disk representation of an operator's records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireFormat {
    /// Newline-delimited text records.
    Text,
    /// Framed, block-oriented list container (see [`crate::io::list_file`]).
    List,
}

impl WireFormat {
    /// Whether records on this wire are binary (list) or text lines.
    pub fn is_binary(self) -> bool {
        matches!(self, WireFormat::List)
    }

    pub(crate) fn extension(self, compressed: bool) -> &'static str {
        match (self, compressed) {
            (WireFormat::Text, false) => ".txt",
            (WireFormat::Text, true) => ".txt.gz",
            (WireFormat::List, _) => ".lst",
        }
    }
}

/// Output compression. List outputs compress per block instead and reject
/// stream compression at plan validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compression {
    /// Streaming gzip with the given deflate level (0 picks the default).
    Gzip { level: u32 },
}

/// How output records are routed to shards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShardKind {
    /// Everything lands in a single fixed shard.
    Constant,
    /// User function reduced modulo N into `ShardId::Index`.
    ModN(u32),
    /// User function produces `ShardId::Named` values.
    UserDefined,
}

/// Immutable output spec of one operator.
#[derive(Clone, Debug)]
pub struct OutputDef {
    pub name: String,
    pub format: WireFormat,
    pub compression: Option<Compression>,
    pub shard: ShardKind,
    /// When set, a shard file is rolled over to the next `-NNN` sub-shard
    /// once this many raw bytes have been appended. Must be fixed before the
    /// operator starts.
    pub max_raw_size: Option<u64>,
}

impl OutputDef {
    pub(crate) fn new(name: &str, format: WireFormat) -> Self {
        Self {
            name: name.to_string(),
            format,
            compression: None,
            shard: ShardKind::Constant,
            max_raw_size: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperatorKind {
    Read,
    Map,
    Group,
}

/// One node of the pipeline graph.
///
/// Invariants (checked at run start): every name in `inputs` resolves to a
/// root input or an earlier operator's output; `output.name` is unique across
/// the pipeline and doubles as the implicit input it feeds downstream.
#[derive(Clone, Debug)]
pub struct OperatorDef {
    pub name: String,
    pub kind: OperatorKind,
    pub inputs: Vec<String>,
    pub output: Option<OutputDef>,
}

/// One source of files for an input: either a glob to expand, or a resolved
/// path carrying its shard identity (how upstream outputs are registered).
#[derive(Clone, Debug)]
pub enum FileSpec {
    Glob(String),
    Sharded { path: PathBuf, shard: ShardId },
}

/// A named input stream of the pipeline.
#[derive(Clone, Debug)]
pub struct InputDef {
    pub name: String,
    pub format: WireFormat,
    /// Records to discard at the start of every file of this input.
    pub skip_header: u32,
    pub file_specs: Vec<FileSpec>,
}

impl InputDef {
    pub(crate) fn new(name: &str, format: WireFormat) -> Self {
        Self {
            name: name.to_string(),
            format,
            skip_header: 0,
            file_specs: Vec::new(),
        }
    }
}
